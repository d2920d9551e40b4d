//! Error types and failure classification.
//!
//! Fetch failures are never errors in the `Result` sense: the fetch executor folds
//! them into an [`ErrorCategory`] so the traffic loop keeps running. The `thiserror`
//! enums here cover the cases a caller does need to branch on: rejected start
//! parameters, bad startup configuration and server bind failures.

use thiserror::Error;

/// Categories of failure a single fetch can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx responses
    ClientError,

    /// HTTP 5xx responses
    ServerError,

    /// DNS, connection refused, reset and friends
    NetworkError,

    /// The per-fetch timeout elapsed
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Anything else
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code. Returns `None` for 1xx-3xx.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            100..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest transport error.
    ///
    /// Only the source chain is inspected for TLS hints; reqwest's own message
    /// embeds the request URL.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }

        let causes = source_messages(error).join(": ").to_lowercase();
        let mentions_tls = ["certificate", "tls", "ssl"]
            .iter()
            .any(|hint| causes.contains(hint));

        if error.is_connect() {
            // Handshake failures are connect errors too.
            if mentions_tls {
                ErrorCategory::TlsError
            } else {
                ErrorCategory::NetworkError
            }
        } else if error.is_request() || error.is_body() || error.is_decode() {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else if mentions_tls {
            ErrorCategory::TlsError
        } else if causes.contains("dns") || causes.contains("connection") {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Prometheus label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }
}

/// Canonical reason phrase for a status code, used in failure log lines.
pub fn reason_phrase(status_code: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown Status")
}

/// Messages of every error below `error` in its source chain, outermost first.
pub fn source_messages(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        messages.push(cause.to_string());
        current = cause.source();
    }
    messages
}

/// A start request that cannot become a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("url must not be empty")]
    EmptyUrl,

    #[error("minDelay must be >= 0 (got {0})")]
    NegativeMinDelay(i64),

    #[error("maxDelay ({max}) must be >= minDelay ({min})")]
    InvertedDelays { min: i64, max: i64 },

    #[error("replicaCount must be > 0 (got {0})")]
    ReplicaCount(i64),

    #[error("lifetimeMs must be > 0 (got {0})")]
    Lifetime(i64),

    #[error("unknown mode '{0}', expected 'server' or 'browser'")]
    UnknownMode(String),
}

/// Startup configuration problems. The only errors that stop the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors from the HTTP/WebSocket command surface.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: hyper::Error,
    },

    #[error("Server error: {0}")]
    Server(#[from] hyper::Error),
}
