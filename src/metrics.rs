use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return a handle for `/metrics`
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "logql_requests_total",
        "Total number of natural-language query requests"
    );
    describe_histogram!(
        "logql_stage_duration_seconds",
        "Duration of each pipeline stage in seconds"
    );
    describe_counter!(
        "logql_synthesis_attempts_total",
        "Query synthesis attempts by validation outcome"
    );
    describe_counter!(
        "logql_backend_retries_total",
        "Retries issued against external collaborators"
    );
    describe_counter!(
        "logql_schema_refresh_total",
        "Schema snapshot refreshes by outcome"
    );
    describe_counter!(
        "logql_fallback_total",
        "Requests answered from degraded-mode templates"
    );
    describe_gauge!(
        "logql_gateway_info",
        "Gateway version and build information"
    );

    gauge!("logql_gateway_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a finished request
pub fn record_request(model: &str, outcome: &str) {
    counter!(
        "logql_requests_total",
        "model" => model.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

/// Record how long one pipeline stage took
pub fn record_stage_duration(stage: &'static str, duration: Duration) {
    histogram!("logql_stage_duration_seconds", "stage" => stage).record(duration.as_secs_f64());
}

/// Record a synthesis attempt and whether its output validated
pub fn record_synthesis_attempt(result: &'static str) {
    counter!("logql_synthesis_attempts_total", "result" => result).increment(1);
}

/// Record a retry against a collaborator
pub fn record_retry(backend: &str) {
    counter!("logql_backend_retries_total", "backend" => backend.to_string()).increment(1);
}

/// Record a schema refresh outcome: "success", "stale", "failure"
pub fn record_schema_refresh(outcome: &'static str) {
    counter!("logql_schema_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a degraded-mode translation
pub fn record_fallback(reason: &'static str) {
    counter!("logql_fallback_total", "reason" => reason).increment(1);
}
