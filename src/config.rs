//! Process configuration.
//!
//! Precedence is environment variables > YAML file > defaults. The YAML file is
//! optional and located through `TRAFFICSIM_CONFIG`.

use serde::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use tokio::time::Duration;
use tracing::info;

use crate::broadcast::{DEFAULT_EVENT_BUFFER, MAX_EVENT_BUFFER};
use crate::client::ClientConfig;
use crate::errors::ConfigError;
use crate::task::TaskRequest;
use crate::utils::{parse_duration_string, parse_flag};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_USER_AGENT: &str = concat!("rust_trafficsim/", env!("CARGO_PKG_VERSION"));

/// Env var naming the optional YAML config file.
pub const CONFIG_PATH_VAR: &str = "TRAFFICSIM_CONFIG";

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{}'", other)),
        }
    }
}

/// Shape of the YAML config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<String>,
    pub fetch_timeout: Option<String>,
    pub skip_tls_verify: Option<bool>,
    pub custom_headers: Option<String>,
    pub user_agent: Option<String>,
    pub event_buffer: Option<usize>,
    pub log_format: Option<String>,
    pub autostart: Option<AutostartConfig>,
}

/// A server-driven task to start as soon as the process is up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutostartConfig {
    pub url: String,
    pub min_delay: Option<i64>,
    pub max_delay: Option<i64>,
}

impl FileConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Resolved process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub fetch_timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub user_agent: String,
    pub event_buffer: usize,
    pub log_format: LogFormat,
    pub autostart: Option<TaskRequest>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            skip_tls_verify: false,
            custom_headers: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            log_format: LogFormat::Pretty,
            autostart: None,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn parse_bind_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| invalid(field, format!("'{}' is not host:port ({})", value, e)))
}

fn parse_timeout(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let timeout = parse_duration_string(value).map_err(|e| invalid(field, e))?;
    if timeout.is_zero() {
        return Err(invalid(field, "timeout must be greater than zero"));
    }
    Ok(timeout)
}

fn parse_number<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| invalid(field, format!("'{}': {}", value, e)))
}

impl Config {
    /// Loads from the process environment and the YAML file it points at.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Some(FileConfig::from_file(path.trim())?),
            _ => None,
        };
        Self::from_sources(file, |key| env::var(key).ok())
    }

    /// Merges defaults, an optional file and an env-style lookup.
    pub fn from_sources<F>(file: Option<FileConfig>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let file = file.unwrap_or_default();

        // --- YAML layer ---
        if let Some(addr) = &file.bind_addr {
            config.bind_addr = parse_bind_addr("bindAddr", addr)?;
        }
        if let Some(timeout) = &file.fetch_timeout {
            config.fetch_timeout = parse_timeout("fetchTimeout", timeout)?;
        }
        if let Some(skip) = file.skip_tls_verify {
            config.skip_tls_verify = skip;
        }
        if let Some(headers) = &file.custom_headers {
            config.custom_headers = Some(headers.clone());
        }
        if let Some(agent) = &file.user_agent {
            config.user_agent = agent.clone();
        }
        if let Some(buffer) = file.event_buffer {
            config.event_buffer = buffer;
        }
        if let Some(format) = &file.log_format {
            config.log_format = format.parse().map_err(|e: String| invalid("logFormat", e))?;
        }
        if let Some(autostart) = &file.autostart {
            config.autostart = Some(TaskRequest::server(
                autostart.url.clone(),
                autostart.min_delay.unwrap_or(crate::task::DEFAULT_MIN_DELAY_MS),
                autostart.max_delay.unwrap_or(crate::task::DEFAULT_MAX_DELAY_MS),
            ));
        }

        // --- Environment layer ---
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = parse_bind_addr("BIND_ADDR", &addr)?;
        }
        if let Some(port) = var("PORT") {
            config.bind_addr.set_port(parse_number("PORT", &port)?);
        }
        if let Some(timeout) = var("FETCH_TIMEOUT") {
            config.fetch_timeout = parse_timeout("FETCH_TIMEOUT", &timeout)?;
        }
        if let Some(skip) = var("SKIP_TLS_VERIFY") {
            config.skip_tls_verify = parse_flag(&skip);
        }
        if let Some(headers) = var("CUSTOM_HEADERS") {
            config.custom_headers = Some(headers);
        }
        if let Some(agent) = var("USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(buffer) = var("EVENT_BUFFER") {
            config.event_buffer = parse_number("EVENT_BUFFER", &buffer)?;
        }
        if let Some(format) = var("LOG_FORMAT") {
            config.log_format = format.parse().map_err(|e: String| invalid("LOG_FORMAT", e))?;
        }
        if let Some(url) = var("TARGET_URL") {
            let min = match var("MIN_DELAY") {
                Some(v) => parse_number("MIN_DELAY", &v)?,
                None => crate::task::DEFAULT_MIN_DELAY_MS,
            };
            let max = match var("MAX_DELAY") {
                Some(v) => parse_number("MAX_DELAY", &v)?,
                None => crate::task::DEFAULT_MAX_DELAY_MS,
            };
            config.autostart = Some(TaskRequest::server(url, min, max));
        }

        if config.event_buffer == 0 || config.event_buffer > MAX_EVENT_BUFFER {
            return Err(invalid(
                "EVENT_BUFFER",
                format!(
                    "{} is out of range, expected 1..={}",
                    config.event_buffer, MAX_EVENT_BUFFER
                ),
            ));
        }
        if let Some(request) = &config.autostart {
            request
                .validate()
                .map_err(|e| invalid("autostart", e.to_string()))?;
        }

        Ok(config)
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: self.fetch_timeout,
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Logs the effective configuration.
    pub fn log_summary(&self) {
        info!(
            bind_addr = %self.bind_addr,
            fetch_timeout_ms = self.fetch_timeout.as_millis() as u64,
            skip_tls_verify = self.skip_tls_verify,
            custom_headers = self.custom_headers.is_some(),
            user_agent = %self.user_agent,
            event_buffer = self.event_buffer,
            "Configuration loaded"
        );
        if let Some(request) = &self.autostart {
            info!(
                url = request.url.as_deref().unwrap_or_default(),
                min_delay_ms = request.min_delay,
                max_delay_ms = request.max_delay,
                "Autostart task configured"
            );
        }
    }
}
