//! Push-channel message contract.
//!
//! Every frame on the channel is a JSON object `{"event": <name>, "data": <payload>}`.
//! Outbound events serialize straight from [`OutboundEvent`]; inbound frames are
//! parsed and checked by [`InboundCommand::parse`] before anything reaches the
//! scheduler.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::TaskRequest;
use crate::utils::single_line;

/// Who produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogOrigin {
    System,
    ServerLoop,
    BrowserOrchestration,
    RemoteObserver,
}

impl LogOrigin {
    pub fn tag(&self) -> &'static str {
        match self {
            LogOrigin::System => "SYSTEM",
            LogOrigin::ServerLoop => "SERVER",
            LogOrigin::BrowserOrchestration => "BROWSER",
            LogOrigin::RemoteObserver => "CLIENT",
        }
    }
}

/// One line for the observers' live log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "LogPayload")]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub origin: LogOrigin,
    pub text: String,
}

impl LogLine {
    pub fn new(origin: LogOrigin, text: impl AsRef<str>) -> Self {
        Self {
            timestamp: Local::now(),
            origin,
            text: single_line(text.as_ref()),
        }
    }

    /// `[HH:MM:SS] TAG - text`, always a single line.
    pub fn render(&self) -> String {
        format!(
            "[{}] {} - {}",
            self.timestamp.format("%H:%M:%S"),
            self.origin.tag(),
            self.text
        )
    }
}

#[derive(Serialize)]
struct LogPayload {
    text: String,
    origin: LogOrigin,
}

impl From<LogLine> for LogPayload {
    fn from(line: LogLine) -> Self {
        Self {
            text: line.render(),
            origin: line.origin,
        }
    }
}

/// Instruction for observers to run the replica loop locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedLoop {
    pub url: String,
    pub min_delay: u64,
    pub max_delay: u64,
    pub replica_count: u32,
    pub lifetime_ms: u64,
    /// Which scheduler tick produced this instruction, starting at 1.
    pub ordinal: u64,
}

/// Everything the server pushes to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "log")]
    Log(LogLine),

    #[serde(rename = "statusUpdate", rename_all = "camelCase")]
    StatusUpdate { is_running: bool },

    #[serde(rename = "start-delegated-loop")]
    StartDelegatedLoop(DelegatedLoop),

    #[serde(rename = "stop-delegated-loop")]
    StopDelegatedLoop {},
}

impl OutboundEvent {
    pub fn log(origin: LogOrigin, text: impl AsRef<str>) -> Self {
        OutboundEvent::Log(LogLine::new(origin, text))
    }

    pub fn status(is_running: bool) -> Self {
        OutboundEvent::StatusUpdate { is_running }
    }

    pub fn to_json(&self) -> String {
        // Every field is a plain string, number or bool, so this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Commands observers may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    StartTraffic(TaskRequest),
    StopTraffic,
    ClientLog { text: String },
}

/// Why an inbound frame was refused.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame is not a JSON event envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("invalid payload for '{event}': {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClientLogPayload {
    Bare(String),
    Object { text: String },
}

impl InboundCommand {
    /// Parses and checks one text frame.
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(frame).map_err(FrameError::Envelope)?;

        match envelope.event.as_str() {
            "start-traffic" => {
                let request = serde_json::from_value(envelope.data).map_err(|source| {
                    FrameError::Payload {
                        event: "start-traffic",
                        source,
                    }
                })?;
                Ok(InboundCommand::StartTraffic(request))
            }
            "stop-traffic" => Ok(InboundCommand::StopTraffic),
            "client-log" => {
                let payload: ClientLogPayload = serde_json::from_value(envelope.data)
                    .map_err(|source| FrameError::Payload {
                        event: "client-log",
                        source,
                    })?;
                let text = match payload {
                    ClientLogPayload::Bare(text) | ClientLogPayload::Object { text } => text,
                };
                Ok(InboundCommand::ClientLog { text })
            }
            other => Err(FrameError::UnknownEvent(other.to_string())),
        }
    }
}
