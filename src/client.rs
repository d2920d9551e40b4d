use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::utils::parse_headers_with_escapes;

/// Configuration for building the outbound HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bounds every fetch, connect included.
    pub timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub user_agent: String,
}

/// Builds the reqwest client shared by every fetch.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ConfigError> {
    let mut client_builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.as_str());

    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        info!(count = parsed_headers.len(), "Custom default headers configured");
        client_builder = client_builder.default_headers(parsed_headers);
    }

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification for outbound fetches");
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    client_builder.build().map_err(|e| ConfigError::InvalidValue {
        field: "http client".to_string(),
        message: e.to_string(),
    })
}

/// Parses `Name:Value` pairs separated by commas (`\,` for a literal comma).
pub fn configure_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ConfigError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for pair in parse_headers_with_escapes(headers_str) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let (name_str, value_str) = pair.split_once(':').ok_or_else(|| {
            header_error(format!("'{}' is not in 'Name:Value' form", pair))
        })?;
        let name_str = name_str.trim();
        if name_str.is_empty() {
            return Err(header_error(format!("header name cannot be empty in '{}'", pair)));
        }

        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| header_error(format!("invalid header name '{}': {}", name_str, e)))?;
        let header_value = HeaderValue::from_str(value_str.trim()).map_err(|e| {
            header_error(format!("invalid value for '{}': {}", name_str, e))
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

fn header_error(message: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: "CUSTOM_HEADERS".to_string(),
        message,
    }
}
