//! One outbound GET per call, always folded into an [`ActionResult`].

use async_trait::async_trait;
use std::fmt;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{reason_phrase, source_messages, ErrorCategory};
use crate::metrics::{
    status_code_label, FETCHES_IN_FLIGHT, FETCH_DURATION_SECONDS, FETCH_ERRORS_BY_CATEGORY,
    FETCH_STATUS_CODES,
};

/// Classified result of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Success {
        status: u16,
    },
    Failure {
        /// Present when the target answered with an error status.
        status: Option<u16>,
        category: ErrorCategory,
        reason: String,
    },
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }

    /// Builds the result for a response status.
    pub fn from_status(status: u16) -> Self {
        match ErrorCategory::from_status_code(status) {
            None => ActionResult::Success { status },
            Some(category) => ActionResult::Failure {
                status: Some(status),
                category,
                reason: reason_phrase(status).to_string(),
            },
        }
    }

    /// Builds the result for a transport error. The reason ends with the
    /// innermost cause ("Connection refused", a DNS failure, ...).
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        let reason = match source_messages(error).last() {
            Some(root) => format!("{}: {}", error, root),
            None => error.to_string(),
        };
        ActionResult::Failure {
            status: error.status().map(|s| s.as_u16()),
            category: ErrorCategory::from_reqwest_error(error),
            reason,
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionResult::Success { status } => write!(f, "SUCCESS {}", status),
            ActionResult::Failure {
                status: Some(status),
                reason,
                ..
            } => write!(f, "ERROR {} {}", status, reason),
            ActionResult::Failure {
                status: None,
                category,
                reason,
            } => write!(f, "ERROR N/A ({}) {}", category.label(), reason),
        }
    }
}

/// One loop tick's outcome, numbered from 1 within its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub ordinal: u64,
    pub result: ActionResult,
}

/// Performs a single action against a URL. Implementations must not fail.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn perform(&self, url: &str) -> ActionResult;
}

/// `Fetcher` backed by a shared reqwest client.
///
/// The client carries the timeout, so a hung target costs at most one timeout
/// per tick.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn perform(&self, url: &str) -> ActionResult {
        FETCHES_IN_FLIGHT.inc();
        let started = Instant::now();

        let result = match self.client.get(url).send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                FETCH_STATUS_CODES
                    .with_label_values(&[status_code_label(status)])
                    .inc();

                // Drain the body so the connection can be reused, without buffering it.
                while let Ok(Some(_chunk)) = response.chunk().await {}

                ActionResult::from_status(status)
            }
            Err(e) => {
                FETCH_STATUS_CODES.with_label_values(&["error"]).inc();
                ActionResult::from_reqwest_error(&e)
            }
        };

        if let ActionResult::Failure { category, .. } = &result {
            FETCH_ERRORS_BY_CATEGORY
                .with_label_values(&[category.label()])
                .inc();
        }

        FETCH_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        FETCHES_IN_FLIGHT.dec();

        debug!(url = %url, result = %result, "Fetch completed");
        result
    }
}
