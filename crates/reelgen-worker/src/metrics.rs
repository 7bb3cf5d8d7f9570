//! Pipeline metrics.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to install Prometheus exporter: {}", e)))
}

/// Metric name constants.
pub mod names {
    pub const GENERATIONS_TOTAL: &str = "reelgen_generations_total";
    pub const GENERATION_DURATION: &str = "reelgen_generation_duration_seconds";
    pub const ENTITLEMENTS_CONSUMED: &str = "reelgen_entitlements_consumed_total";
    pub const PROVIDER_CALLS: &str = "reelgen_provider_calls_total";
    pub const INVOICES_SETTLED: &str = "reelgen_invoices_settled_total";
    pub const SWEEP_DURATION: &str = "reelgen_payment_sweep_duration_seconds";
}

/// Record a generation lifecycle event: `started`, `completed` or `failed`.
pub fn record_generation(stage: &'static str) {
    counter!(names::GENERATIONS_TOTAL, "stage" => stage).increment(1);
}

pub fn record_generation_duration(seconds: f64) {
    histogram!(names::GENERATION_DURATION).record(seconds);
}

/// Record which entitlement source paid for a generation.
pub fn record_consumption(source: &'static str) {
    counter!(names::ENTITLEMENTS_CONSUMED, "source" => source).increment(1);
}

pub fn record_provider_call(provider: &'static str, success: bool) {
    counter!(
        names::PROVIDER_CALLS,
        "provider" => provider,
        "status" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

pub fn record_invoice_settled(kind: &'static str) {
    counter!(names::INVOICES_SETTLED, "kind" => kind).increment(1);
}

pub fn record_sweep_duration(seconds: f64) {
    histogram!(names::SWEEP_DURATION).record(seconds);
}
