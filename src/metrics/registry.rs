// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // CLIENT METRICS
    // ============================================================================

    /// Finished API requests by terminal outcome
    pub static ref API_REQUESTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("api_requests_total", "Total API requests by outcome"),
        &["method", "outcome"], // outcome: succeeded, failed, http_error, cancelled, timed_out, offline
        REGISTRY
    ).unwrap();

    /// API request duration histogram
    pub static ref API_REQUEST_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("api_request_duration_seconds", "API request duration in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["method"],
        REGISTRY
    ).unwrap();

    /// Requests that joined an identical in-flight request instead of hitting the network
    pub static ref API_REQUESTS_COALESCED: CounterVec = register_counter_vec_with_registry!(
        Opts::new("api_requests_coalesced_total", "Requests served by an in-flight duplicate"),
        &["method"],
        REGISTRY
    ).unwrap();

    /// Retries performed by the retry utility
    pub static ref RETRY_ATTEMPTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("retry_attempts_total", "Total retries scheduled"),
        &["operation"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache operations
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_operations_total", "Total cache operations"),
        &["operation"], // operation: hit, stale_hit, miss, revalidate, revalidate_error, expired, eviction
        REGISTRY
    ).unwrap();

    /// Current cache entries
    pub static ref CACHE_ENTRIES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("cache_entries_current", "Current number of cache entries"),
        &["type"], // type: active
        REGISTRY
    ).unwrap();

    // ============================================================================
    // AUTH METRICS
    // ============================================================================

    /// Session events raised by the auth interceptors
    pub static ref AUTH_EVENTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("auth_events_total", "Total session events"),
        &["event"], // event: token_cleared, login_redirect
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
