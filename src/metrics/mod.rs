// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    API_REQUESTS,
    API_REQUEST_DURATION,
    API_REQUESTS_COALESCED,
    AUTH_EVENTS,
    CACHE_ENTRIES,
    CACHE_OPERATIONS,
    RETRY_ATTEMPTS,
};

/// Helper to record a finished API request
pub fn record_request(method: &str, outcome: &str, duration_secs: f64) {
    API_REQUESTS.with_label_values(&[method, outcome]).inc();
    API_REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

pub fn record_coalesced(method: &str) {
    API_REQUESTS_COALESCED.with_label_values(&[method]).inc();
}

pub fn record_retry(operation: &str) {
    RETRY_ATTEMPTS.with_label_values(&[operation]).inc();
}

/// Helper to record response cache operations
pub fn record_cache_operation(operation: &str) {
    CACHE_OPERATIONS.with_label_values(&[operation]).inc();
}

pub fn record_cache_evictions(count: usize) {
    if count > 0 {
        CACHE_OPERATIONS
            .with_label_values(&["eviction"])
            .inc_by(count as f64);
    }
}

pub fn update_cache_entries(count: usize) {
    CACHE_ENTRIES.with_label_values(&["active"]).set(count as f64);
}

/// Helper to record session events
pub fn record_auth_event(event: &str) {
    AUTH_EVENTS.with_label_values(&[event]).inc();
}
