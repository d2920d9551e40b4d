//! Config loading from the real process environment and a YAML file on disk.
//!
//! Precedence: env > yaml > defaults. These tests mutate process-wide env vars,
//! so every one of them runs serially.

use rust_trafficsim::config::{Config, LogFormat, CONFIG_PATH_VAR};
use rust_trafficsim::task::TaskRequest;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Clears every variable the loader reads so tests cannot leak into each other.
fn clean_env() {
    for var in [
        CONFIG_PATH_VAR,
        "BIND_ADDR",
        "PORT",
        "FETCH_TIMEOUT",
        "SKIP_TLS_VERIFY",
        "CUSTOM_HEADERS",
        "USER_AGENT",
        "EVENT_BUFFER",
        "LOG_FORMAT",
        "TARGET_URL",
        "MIN_DELAY",
        "MAX_DELAY",
    ] {
        env::remove_var(var);
    }
}

fn yaml_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn defaults_when_nothing_is_set() {
    clean_env();
    let config = Config::load().unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 3000)));
    assert!(config.autostart.is_none());
}

#[test]
#[serial]
fn yaml_file_is_loaded_from_path_var() {
    clean_env();
    let file = yaml_file(
        r#"
bindAddr: "127.0.0.1:8080"
fetchTimeout: "750ms"
userAgent: "yaml-agent"
logFormat: json
autostart:
  url: "https://yaml.example.com"
  minDelay: 200
"#,
    );
    env::set_var(CONFIG_PATH_VAR, file.path());

    let config = Config::load().unwrap();
    assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
    assert_eq!(config.fetch_timeout, Duration::from_millis(750));
    assert_eq!(config.user_agent, "yaml-agent");
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(
        config.autostart,
        Some(TaskRequest::server("https://yaml.example.com", 200, 5000))
    );

    clean_env();
}

#[test]
#[serial]
fn env_wins_over_yaml() {
    clean_env();
    let file = yaml_file(
        r#"
bindAddr: "127.0.0.1:8080"
fetchTimeout: "10s"
autostart:
  url: "https://yaml.example.com"
"#,
    );
    env::set_var(CONFIG_PATH_VAR, file.path());
    env::set_var("PORT", "9090");
    env::set_var("FETCH_TIMEOUT", "2s");
    env::set_var("TARGET_URL", "https://env.example.com");
    env::set_var("MIN_DELAY", "10");
    env::set_var("MAX_DELAY", "20");

    let config = Config::load().unwrap();
    assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9090)));
    assert_eq!(config.fetch_timeout, Duration::from_secs(2));
    assert_eq!(
        config.autostart,
        Some(TaskRequest::server("https://env.example.com", 10, 20))
    );

    clean_env();
}

#[test]
#[serial]
fn missing_yaml_file_is_an_error() {
    clean_env();
    env::set_var(CONFIG_PATH_VAR, "/definitely/not/here.yaml");

    let err = Config::load().unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.yaml"), "{}", err);

    clean_env();
}

#[test]
#[serial]
fn invalid_env_values_are_reported() {
    clean_env();
    env::set_var("FETCH_TIMEOUT", "5");
    let err = Config::load().unwrap_err();
    assert!(err.to_string().contains("FETCH_TIMEOUT"), "{}", err);

    clean_env();
    env::set_var("TARGET_URL", "https://env.example.com");
    env::set_var("MIN_DELAY", "900");
    env::set_var("MAX_DELAY", "100");
    let err = Config::load().unwrap_err();
    assert!(err.to_string().contains("autostart"), "{}", err);

    clean_env();
}

#[test]
#[serial]
fn skip_tls_verify_flag_from_env() {
    clean_env();
    env::set_var("SKIP_TLS_VERIFY", "TRUE");
    env::set_var("CUSTOM_HEADERS", "X-Sim:1");

    let config = Config::load().unwrap();
    assert!(config.skip_tls_verify);
    let client_config = config.to_client_config();
    assert!(client_config.skip_tls_verify);
    assert_eq!(client_config.custom_headers.as_deref(), Some("X-Sim:1"));

    clean_env();
}
