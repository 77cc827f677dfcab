//! Observability metrics for the ingestion pipeline
//!
//! Tracks rate limiter pressure, proxy availability, catalog call outcomes
//! and ingestion cycles.
//!
//! ## Architecture
//!
//! - Uses the `metrics` crate; every call is a cheap no-op until a recorder
//!   is installed
//! - Optional Prometheus exporter for a scrape endpoint (`--metrics-addr`)

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::catalog::FailureKind;

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are ignored.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time callers were held before admission"
    );
    describe_gauge!(
        "rate_limit_calls_last_minute",
        Unit::Count,
        "Calls admitted in the trailing minute"
    );
    describe_gauge!(
        "rate_limit_calls_last_hour",
        Unit::Count,
        "Calls admitted in the trailing hour"
    );
    describe_gauge!(
        "rate_limit_backoff_seconds",
        Unit::Seconds,
        "Current failure backoff level"
    );
    describe_counter!(
        "proxy_acquisitions_total",
        Unit::Count,
        "Proxy lookups by outcome"
    );
    describe_counter!(
        "catalog_calls_total",
        Unit::Count,
        "Catalog search and fetch calls by outcome"
    );
    describe_histogram!(
        "catalog_call_duration_seconds",
        Unit::Seconds,
        "Catalog call duration, excluding admission wait"
    );
    describe_counter!(
        "ingest_cycles_total",
        Unit::Count,
        "Ingestion cycles by outcome"
    );
    describe_counter!(
        "ingest_items_total",
        Unit::Count,
        "Items seen by the ingestion loop, by disposition"
    );

    *initialized = true;
    info!("Metrics system initialized on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record one admission through the rate limiter
pub fn record_admission(waited: Duration, minute_calls: usize, hour_calls: usize) {
    histogram!("rate_limit_wait_seconds").record(waited.as_secs_f64());
    gauge!("rate_limit_calls_last_minute").set(minute_calls as f64);
    gauge!("rate_limit_calls_last_hour").set(hour_calls as f64);
}

/// Record the current backoff level
pub fn record_backoff(backoff: Duration) {
    gauge!("rate_limit_backoff_seconds").set(backoff.as_secs_f64());
}

/// Record a proxy lookup outcome
pub fn record_proxy_lookup(acquired: bool) {
    let outcome = if acquired { "acquired" } else { "unavailable" };
    counter!("proxy_acquisitions_total", "outcome" => outcome).increment(1);
}

/// Timing and outcome of one catalog call
pub struct CatalogCallMetrics {
    operation: &'static str,
    start_time: Instant,
}

impl CatalogCallMetrics {
    /// Start timing a call (`"search"` or `"fetch"`)
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start_time: Instant::now(),
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.record("success");
    }

    /// Record a failed call
    pub fn record_failure(&self, kind: FailureKind) {
        self.record(kind.label());
    }

    fn record(&self, outcome: &'static str) {
        let duration = self.start_time.elapsed();
        counter!(
            "catalog_calls_total",
            "operation" => self.operation,
            "outcome" => outcome,
        )
        .increment(1);
        histogram!("catalog_call_duration_seconds", "operation" => self.operation)
            .record(duration.as_secs_f64());
        debug!(
            operation = self.operation,
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Catalog call recorded"
        );
    }
}

/// Record a finished ingestion cycle
pub fn record_cycle(outcome: &'static str, discovered: usize, downloaded: usize, failed: usize) {
    counter!("ingest_cycles_total", "outcome" => outcome).increment(1);
    counter!("ingest_items_total", "disposition" => "discovered").increment(discovered as u64);
    counter!("ingest_items_total", "disposition" => "downloaded").increment(downloaded as u64);
    counter!("ingest_items_total", "disposition" => "failed").increment(failed as u64);
}
