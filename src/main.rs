use std::sync::Arc;
use tracing::{error, info};

use rust_trafficsim::api;
use rust_trafficsim::broadcast::Broadcaster;
use rust_trafficsim::client::build_client;
use rust_trafficsim::config::Config;
use rust_trafficsim::fetch::HttpFetcher;
use rust_trafficsim::gateway::Gateway;
use rust_trafficsim::logging::init_tracing;
use rust_trafficsim::metrics::register_metrics;
use rust_trafficsim::scheduler::Scheduler;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("All settings are optional.");
    eprintln!();
    eprintln!("Server:");
    eprintln!("  BIND_ADDR               - Listen address (default: 0.0.0.0:3000)");
    eprintln!("  PORT                    - Overrides only the port of BIND_ADDR");
    eprintln!("  EVENT_BUFFER            - Events buffered per observer before it lags (default: 256)");
    eprintln!("  LOG_FORMAT              - pretty or json (default: pretty); RUST_LOG sets the level");
    eprintln!();
    eprintln!("Outbound fetches:");
    eprintln!("  FETCH_TIMEOUT           - Per-fetch timeout: 800ms, 5s, 1m (default: 5s)");
    eprintln!("  USER_AGENT              - User-Agent header for fetches");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated Name:Value pairs (use \\, for literal commas)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!();
    eprintln!("Autostart (server-driven task started at boot):");
    eprintln!("  TARGET_URL              - URL to fetch");
    eprintln!("  MIN_DELAY / MAX_DELAY   - Delay bounds in ms (default: 1000 / 5000)");
    eprintln!();
    eprintln!("  TRAFFICSIM_CONFIG       - Path to a YAML file with the same settings; env wins");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: rust_trafficsim)");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    init_tracing(config.log_format);
    register_metrics()?;
    config.log_summary();

    let client = build_client(&config.to_client_config())?;
    let broadcaster = Broadcaster::new(config.event_buffer);
    let scheduler = Scheduler::new(broadcaster, Arc::new(HttpFetcher::new(client)));
    let gateway = Gateway::new(scheduler.clone());

    if let Some(request) = &config.autostart {
        let result = scheduler.start(request);
        info!(success = result.success, message = %result.message, "Autostart");
    }

    api::serve(config.bind_addr, gateway, shutdown_signal()).await?;

    scheduler.shutdown();
    info!("Server stopped");
    Ok(())
}
