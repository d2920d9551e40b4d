//! Task configuration, the start-command boundary shape and the single task record.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::ValidationError;

/// Fallbacks applied when a start command omits a field or sends something
/// that is not a number.
pub const DEFAULT_MIN_DELAY_MS: i64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: i64 = 5000;
pub const DEFAULT_REPLICA_COUNT: i64 = 1;
pub const DEFAULT_LIFETIME_MS: i64 = 4000;

/// How replicas are created in browser-delegated mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaPlan {
    pub replica_count: u32,
    pub lifetime_ms: u64,
}

/// Who performs the repeated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// The server issues the GET requests itself.
    ServerDriven,
    /// Observers create short-lived replicas pointed at the URL.
    BrowserDelegated(ReplicaPlan),
}

impl TaskMode {
    pub const SERVER: &'static str = "server";
    pub const BROWSER: &'static str = "browser";

    /// Wire name, as used in `start-traffic` and `GET /api/status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::ServerDriven => Self::SERVER,
            TaskMode::BrowserDelegated(_) => Self::BROWSER,
        }
    }
}

/// A validated, immutable task configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    pub url: String,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub mode: TaskMode,
}

impl TaskConfig {
    /// Server-driven config, mainly for autostart and tests.
    pub fn server(url: impl Into<String>, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            url: url.into(),
            min_delay_ms,
            max_delay_ms,
            mode: TaskMode::ServerDriven,
        }
    }
}

/// A start command as received, before validation.
///
/// Numeric fields are signed so a negative delay can be reported back instead of
/// failing deserialization, and accept numeric strings as well as numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub min_delay: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub max_delay: Option<i64>,
    #[serde(default, alias = "iframeCount", deserialize_with = "lenient_int")]
    pub replica_count: Option<i64>,
    #[serde(default, alias = "closeDelay", deserialize_with = "lenient_int")]
    pub lifetime_ms: Option<i64>,
}

impl TaskRequest {
    pub fn server(url: impl Into<String>, min_delay: i64, max_delay: i64) -> Self {
        Self {
            mode: Some(TaskMode::SERVER.to_string()),
            url: Some(url.into()),
            min_delay: Some(min_delay),
            max_delay: Some(max_delay),
            ..Self::default()
        }
    }

    pub fn browser(
        url: impl Into<String>,
        min_delay: i64,
        max_delay: i64,
        replica_count: i64,
        lifetime_ms: i64,
    ) -> Self {
        Self {
            mode: Some(TaskMode::BROWSER.to_string()),
            url: Some(url.into()),
            min_delay: Some(min_delay),
            max_delay: Some(max_delay),
            replica_count: Some(replica_count),
            lifetime_ms: Some(lifetime_ms),
        }
    }

    /// Forces server-driven mode; the REST surface only starts server tasks.
    pub fn into_server_mode(mut self) -> Self {
        self.mode = Some(TaskMode::SERVER.to_string());
        self
    }

    /// Applies defaults and checks every constraint a running task relies on.
    pub fn validate(&self) -> Result<TaskConfig, ValidationError> {
        let mode_name = self
            .mode
            .as_deref()
            .map(|m| m.trim().to_lowercase())
            .unwrap_or_else(|| "server".to_string());
        let browser = match mode_name.as_str() {
            "server" | "server-driven" => false,
            "browser" | "browser-delegated" => true,
            _ => return Err(ValidationError::UnknownMode(mode_name)),
        };

        let url = self.url.as_deref().map(str::trim).unwrap_or_default();
        if url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }

        let min = self.min_delay.unwrap_or(DEFAULT_MIN_DELAY_MS);
        let max = self.max_delay.unwrap_or(DEFAULT_MAX_DELAY_MS);
        if min < 0 {
            return Err(ValidationError::NegativeMinDelay(min));
        }
        if max < min {
            return Err(ValidationError::InvertedDelays { min, max });
        }

        let mode = if browser {
            let count = self.replica_count.unwrap_or(DEFAULT_REPLICA_COUNT);
            let replica_count = u32::try_from(count)
                .ok()
                .filter(|c| *c > 0)
                .ok_or(ValidationError::ReplicaCount(count))?;
            let lifetime = self.lifetime_ms.unwrap_or(DEFAULT_LIFETIME_MS);
            if lifetime <= 0 {
                return Err(ValidationError::Lifetime(lifetime));
            }
            TaskMode::BrowserDelegated(ReplicaPlan {
                replica_count,
                lifetime_ms: lifetime as u64,
            })
        } else {
            TaskMode::ServerDriven
        };

        Ok(TaskConfig {
            url: url.to_string(),
            min_delay_ms: min as u64,
            max_delay_ms: max as u64,
            mode,
        })
    }
}

/// Accepts `12`, `12.7` and `"12px"` as 12; anything else counts as absent.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        }),
        Some(Value::String(s)) => leading_int(&s),
        _ => None,
    })
}

fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let digits_start = usize::from(s.starts_with(['-', '+']));
    let end = s[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |i| i + digits_start);
    if end == digits_start {
        return None;
    }
    s[..end].parse().ok()
}

/// The live part of a running task.
#[derive(Debug)]
pub struct ActiveRun {
    /// Distinguishes this run from any earlier or later one.
    pub generation: u64,
    pub config: TaskConfig,
    /// Cancelled on stop; no tick fires after that.
    pub cancel: CancellationToken,
    pub started_at: Instant,
    pub actions_completed: u64,
}

/// The single task record. `Idle` is `run == None`.
#[derive(Debug, Default)]
pub struct TaskState {
    run: Option<ActiveRun>,
}

impl TaskState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Moves to Running. The caller must have ended any previous run.
    pub fn begin(
        &mut self,
        generation: u64,
        config: TaskConfig,
        cancel: CancellationToken,
    ) -> &ActiveRun {
        debug_assert!(self.run.is_none(), "begin called while a run is active");
        self.run.insert(ActiveRun {
            generation,
            config,
            cancel,
            started_at: Instant::now(),
            actions_completed: 0,
        })
    }

    /// Moves back to Idle, handing the finished run to the caller.
    pub fn end(&mut self) -> Option<ActiveRun> {
        self.run.take()
    }

    /// Stores the completed-action count if `generation` is still the active run.
    pub fn record_action(&mut self, generation: u64, ordinal: u64) -> bool {
        match self.run.as_mut() {
            Some(run) if run.generation == generation => {
                run.actions_completed = ordinal;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        match &self.run {
            Some(run) => TaskSnapshot {
                is_running: true,
                mode: Some(run.config.mode.as_str()),
                url: run.config.url.clone(),
                actions_completed: run.actions_completed,
            },
            None => TaskSnapshot::idle(),
        }
    }
}

/// Read-only view published by `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub is_running: bool,
    pub mode: Option<&'static str>,
    pub url: String,
    pub actions_completed: u64,
}

impl TaskSnapshot {
    pub fn idle() -> Self {
        Self {
            is_running: false,
            mode: None,
            url: String::new(),
            actions_completed: 0,
        }
    }
}
