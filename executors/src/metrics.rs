use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
};
use std::sync::{Arc, PoisonError, RwLock};

/// Metrics recorded by the transaction lifecycle
pub struct LifecycleMetrics {
    pub signing_duration: HistogramVec,
    pub sponsorship_wait_duration: HistogramVec,
    pub broadcast_to_confirmed_duration: HistogramVec,
    pub failed_attempts: IntCounterVec,
}

impl LifecycleMetrics {
    /// Create new lifecycle metrics with the provided registry
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        // Hardware wallets wait on a human, hence the long tail
        let signing_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "bridge_transaction_signing_duration_seconds",
                "Time from requesting a signature to receiving the signed transaction"
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["strategy", "network"],
            registry
        )?;

        let sponsorship_wait_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "bridge_transaction_sponsorship_wait_duration_seconds",
                "Time spent waiting for the gas tank to fund the sender"
            )
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["network"],
            registry
        )?;

        let broadcast_to_confirmed_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "bridge_transaction_broadcast_to_confirmed_duration_seconds",
                "Time from broadcasting a transaction to observing its receipt"
            )
            .buckets(vec![
                1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0
            ]),
            &["network"],
            registry
        )?;

        let failed_attempts = register_int_counter_vec_with_registry!(
            Opts::new(
                "bridge_transaction_failed_attempts_total",
                "Errors stored in a transaction attempt, by error code"
            ),
            &["error_code"],
            registry
        )?;

        Ok(LifecycleMetrics {
            signing_duration,
            sponsorship_wait_duration,
            broadcast_to_confirmed_duration,
            failed_attempts,
        })
    }
}

lazy_static! {
    /// Default metrics registry (fallback if no external registry provided)
    static ref DEFAULT_METRICS_REGISTRY: Registry = Registry::new();

    static ref DEFAULT_METRICS: Option<Arc<LifecycleMetrics>> =
        match LifecycleMetrics::new(&DEFAULT_METRICS_REGISTRY) {
            Ok(metrics) => Some(Arc::new(metrics)),
            Err(e) => {
                tracing::error!("Failed to create default lifecycle metrics: {e}");
                None
            }
        };

    /// Global metrics instance - can be set by the binary crate or uses default
    static ref METRICS_INSTANCE: RwLock<Option<Arc<LifecycleMetrics>>> = RwLock::new(None);
}

/// Initialize lifecycle metrics with a custom registry
/// This should be called once at application startup by the binary crate
pub fn initialize_metrics(metrics: LifecycleMetrics) {
    let mut instance = METRICS_INSTANCE
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *instance = Some(Arc::new(metrics));
}

/// Get the current metrics instance (either custom or default)
fn get_metrics() -> Option<Arc<LifecycleMetrics>> {
    let instance = METRICS_INSTANCE
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    instance.clone().or_else(|| DEFAULT_METRICS.clone())
}

/// Export metrics in Prometheus format from the default registry
pub fn export_default_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = DEFAULT_METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_signing_duration(strategy: &str, network: &str, duration_seconds: f64) {
    if let Some(metrics) = get_metrics() {
        metrics
            .signing_duration
            .with_label_values(&[strategy, network])
            .observe(duration_seconds);
    }
}

pub fn record_sponsorship_wait(network: &str, duration_seconds: f64) {
    if let Some(metrics) = get_metrics() {
        metrics
            .sponsorship_wait_duration
            .with_label_values(&[network])
            .observe(duration_seconds);
    }
}

pub fn record_broadcast_to_confirmed(network: &str, duration_seconds: f64) {
    if let Some(metrics) = get_metrics() {
        metrics
            .broadcast_to_confirmed_duration
            .with_label_values(&[network])
            .observe(duration_seconds);
    }
}

pub fn record_failed_attempt(error_code: &str) {
    if let Some(metrics) = get_metrics() {
        metrics
            .failed_attempts
            .with_label_values(&[error_code])
            .inc();
    }
}

/// Helper to calculate duration in seconds from unix timestamps (milliseconds)
pub fn calculate_duration_seconds(start_timestamp_ms: u64, end_timestamp_ms: u64) -> f64 {
    (end_timestamp_ms.saturating_sub(start_timestamp_ms)) as f64 / 1000.0
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
