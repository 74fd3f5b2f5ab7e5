//! Metric names and recording helpers for the cache-aside path.
//!
//! These go through the `metrics` facade; without an installed recorder they
//! are no-ops, which is what unit tests run with.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";

    pub const UPSTREAM_REQUESTS_TOTAL: &str = "upstream_requests_total";
    pub const UPSTREAM_REQUEST_DURATION_SECONDS: &str = "upstream_request_duration_seconds";
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// `op` is one of `get`, `set`, `decode`.
pub fn record_cache_error(op: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "op" => op).increment(1);
}

pub fn record_upstream_request(outcome: &'static str, duration: Duration) {
    counter!(names::UPSTREAM_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::UPSTREAM_REQUEST_DURATION_SECONDS, "outcome" => outcome)
        .record(duration.as_secs_f64());
}
