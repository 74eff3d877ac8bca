//! Cache metrics recorded through the `metrics` facade.
//!
//! Nothing is exported unless the application installs a recorder.

use crate::key::FunctionId;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the cache wrappers.
pub mod names {
    /// Lookups answered from the store.
    pub const CACHE_HITS_TOTAL: &str = "redlab_cache_hits_total";
    /// Lookups that had to compute the value.
    pub const CACHE_MISSES_TOTAL: &str = "redlab_cache_misses_total";
    /// Store operations skipped because the store was unreachable.
    pub const CACHE_BYPASS_TOTAL: &str = "redlab_cache_bypass_total";
    /// Keys removed by invalidation.
    pub const CACHE_INVALIDATED_KEYS_TOTAL: &str = "redlab_cache_invalidated_keys_total";
    /// Time spent computing missed values.
    pub const CACHE_COMPUTE_SECONDS: &str = "redlab_cache_compute_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(
        names::CACHE_BYPASS_TOTAL,
        "Total number of store operations skipped while the store was unreachable"
    );
    describe_counter!(
        names::CACHE_INVALIDATED_KEYS_TOTAL,
        "Total number of cache keys removed by invalidation"
    );
    describe_histogram!(
        names::CACHE_COMPUTE_SECONDS,
        "Duration of computing values on cache misses in seconds"
    );
}

/// Cache metrics recorder.
#[derive(Clone)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn hit(function: FunctionId) {
        counter!(names::CACHE_HITS_TOTAL, "function" => function.as_str()).increment(1);
    }

    /// Record a miss and how long the value took to compute.
    pub fn miss(function: FunctionId, compute: Duration) {
        counter!(names::CACHE_MISSES_TOTAL, "function" => function.as_str()).increment(1);
        histogram!(names::CACHE_COMPUTE_SECONDS, "function" => function.as_str())
            .record(compute.as_secs_f64());
    }

    /// Record a store operation skipped after a store failure.
    pub fn bypass(operation: &'static str) {
        counter!(names::CACHE_BYPASS_TOTAL, "operation" => operation).increment(1);
    }

    pub fn invalidated(count: u64) {
        counter!(names::CACHE_INVALIDATED_KEYS_TOTAL).increment(count);
    }
}
