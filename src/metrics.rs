use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::env;
use tracing::error;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "rust_trafficsim".to_string());

    // === Task lifecycle ===

    pub static ref TASKS_STARTED_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("tasks_started_total", "Tasks started, by mode")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["mode"]
        ).unwrap();

    pub static ref TASKS_REJECTED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("tasks_rejected_total", "Start commands rejected by validation")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TASK_RUNNING: IntGauge =
        IntGauge::with_opts(
            Opts::new("task_running", "1 while a task is active, 0 when idle")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref ACTIONS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("actions_total", "Loop ticks completed (fetches or delegated instructions), by mode")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["mode"]
        ).unwrap();

    // === Fetches ===

    pub static ref FETCH_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("fetch_status_codes_total", "Outbound GETs by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref FETCH_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("fetch_errors_total", "Failed outbound GETs by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref FETCHES_IN_FLIGHT: IntGauge =
        IntGauge::with_opts(
            Opts::new("fetches_in_flight", "Outbound GETs currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref FETCH_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "fetch_duration_seconds",
                "Outbound GET latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Observers ===

    pub static ref OBSERVERS_CONNECTED: IntGauge =
        IntGauge::with_opts(
            Opts::new("observers_connected", "Push-channel observers currently connected")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();

    registry.register(Box::new(TASKS_STARTED_TOTAL.clone()))?;
    registry.register(Box::new(TASKS_REJECTED_TOTAL.clone()))?;
    registry.register(Box::new(TASK_RUNNING.clone()))?;
    registry.register(Box::new(ACTIONS_TOTAL.clone()))?;

    registry.register(Box::new(FETCH_STATUS_CODES.clone()))?;
    registry.register(Box::new(FETCH_ERRORS_BY_CATEGORY.clone()))?;
    registry.register(Box::new(FETCHES_IN_FLIGHT.clone()))?;
    registry.register(Box::new(FETCH_DURATION_SECONDS.clone()))?;

    registry.register(Box::new(OBSERVERS_CONNECTED.clone()))?;

    Ok(())
}

/// Returns a static label for common status codes so the hot path does not allocate.
pub fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        201 => "201",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

/// Encodes every metric family in `registry` in the text exposition format.
pub fn gather_metrics_string(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# ERROR ENCODING METRICS");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "Metrics output was not UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}
