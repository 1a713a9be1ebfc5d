//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::services::acceptance::RejectReason;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Provider round-trip bucket boundaries (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600 ms
const GEOCODE_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];

const NUM_REJECT_REASONS: usize = RejectReason::ALL.len();

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn geocode_bucket_index(latency_ms: u64) -> usize {
    GEOCODE_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(
    buckets: &[u64; NUM_BUCKETS],
    bounds: &[u64; NUM_BUCKETS - 1],
    percentile: f64,
) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            // Overflow bucket reports 2x the last bound
            return bounds.get(i).copied().unwrap_or(bounds[NUM_BUCKETS - 2] * 2);
        }
    }
    bounds[NUM_BUCKETS - 2] * 2
}

fn new_buckets() -> [AtomicU64; NUM_BUCKETS] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Triggers ever received (monotonic)
    triggers_total: AtomicU64,
    /// Triggers since last report (reset on report)
    triggers_since_report: AtomicU64,
    /// Sum of trigger processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max trigger processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Trigger processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    triggers_accepted: AtomicU64,
    /// Rejections per `RejectReason`, indexed by `RejectReason::index`
    triggers_rejected: [AtomicU64; NUM_REJECT_REASONS],
    input_errors: AtomicU64,
    ticks_total: AtomicU64,
    status_transitions: AtomicU64,
    /// Provider calls made
    api_calls_requested: AtomicU64,
    /// Refreshes skipped because the provider switch was off
    api_calls_skipped: AtomicU64,
    /// Provider calls that had to wait for the global pacing slot
    api_calls_throttled: AtomicU64,
    api_error_count: AtomicU64,
    route_error_count: AtomicU64,
    geocode_applied: AtomicU64,
    /// Provider results that arrived after the person had moved on
    geocode_discarded: AtomicU64,
    /// Provider round-trip histogram buckets in ms (reset on report)
    geocode_latency_buckets: [AtomicU64; NUM_BUCKETS],
    ingress_dropped: AtomicU64,
    egress_dropped: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            triggers_total: AtomicU64::new(0),
            triggers_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: new_buckets(),
            triggers_accepted: AtomicU64::new(0),
            triggers_rejected: std::array::from_fn(|_| AtomicU64::new(0)),
            input_errors: AtomicU64::new(0),
            ticks_total: AtomicU64::new(0),
            status_transitions: AtomicU64::new(0),
            api_calls_requested: AtomicU64::new(0),
            api_calls_skipped: AtomicU64::new(0),
            api_calls_throttled: AtomicU64::new(0),
            api_error_count: AtomicU64::new(0),
            route_error_count: AtomicU64::new(0),
            geocode_applied: AtomicU64::new(0),
            geocode_discarded: AtomicU64::new(0),
            geocode_latency_buckets: new_buckets(),
            ingress_dropped: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record a processed trigger (lock-free)
    #[inline]
    pub fn record_trigger_processed(&self, latency_us: u64) {
        self.triggers_total.fetch_add(1, Ordering::Relaxed);
        self.triggers_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trigger_accepted(&self) {
        self.triggers_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trigger_rejected(&self, reason: RejectReason) {
        self.triggers_rejected[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_input_error(&self) {
        self.input_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_status_transition(&self) {
        self.status_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_api_requested(&self) {
        self.api_calls_requested.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_api_skipped(&self) {
        self.api_calls_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_api_throttled(&self) {
        self.api_calls_throttled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_api_error(&self) {
        self.api_error_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_route_error(&self) {
        self.route_error_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_geocode_applied(&self) {
        self.geocode_applied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_geocode_discarded(&self) {
        self.geocode_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_geocode_latency(&self, latency_ms: u64) {
        self.geocode_latency_buckets[geocode_bucket_index(latency_ms)]
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ingress_dropped(&self) {
        self.ingress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn triggers_total(&self) -> u64 {
        self.triggers_total.load(Ordering::Relaxed)
    }

    pub fn triggers_accepted(&self) -> u64 {
        self.triggers_accepted.load(Ordering::Relaxed)
    }

    pub fn triggers_rejected(&self, reason: RejectReason) -> u64 {
        self.triggers_rejected[reason.index()].load(Ordering::Relaxed)
    }

    pub fn input_errors(&self) -> u64 {
        self.input_errors.load(Ordering::Relaxed)
    }

    pub fn status_transitions(&self) -> u64 {
        self.status_transitions.load(Ordering::Relaxed)
    }

    pub fn api_calls_requested(&self) -> u64 {
        self.api_calls_requested.load(Ordering::Relaxed)
    }

    pub fn api_calls_skipped(&self) -> u64 {
        self.api_calls_skipped.load(Ordering::Relaxed)
    }

    pub fn api_calls_throttled(&self) -> u64 {
        self.api_calls_throttled.load(Ordering::Relaxed)
    }

    pub fn api_error_count(&self) -> u64 {
        self.api_error_count.load(Ordering::Relaxed)
    }

    pub fn route_error_count(&self) -> u64 {
        self.route_error_count.load(Ordering::Relaxed)
    }

    pub fn geocode_discarded(&self) -> u64 {
        self.geocode_discarded.load(Ordering::Relaxed)
    }

    pub fn ingress_dropped(&self) -> u64 {
        self.ingress_dropped.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, persons: usize) -> MetricsSummary {
        let triggers_count = self.triggers_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);
        let geocode_lat_buckets = swap_buckets(&self.geocode_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let triggers_per_sec = if elapsed.as_secs_f64() > 0.0 {
            triggers_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if triggers_count > 0 { latency_sum / triggers_count } else { 0 };

        let mut rejected = [0u64; NUM_REJECT_REASONS];
        for (slot, counter) in rejected.iter_mut().zip(self.triggers_rejected.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }

        MetricsSummary {
            triggers_total: self.triggers_total(),
            triggers_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, &BUCKET_BOUNDS, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, &BUCKET_BOUNDS, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, &BUCKET_BOUNDS, 0.99),
            lat_buckets,
            geocode_p95_ms: percentile_from_buckets(&geocode_lat_buckets, &GEOCODE_BOUNDS, 0.95),
            geocode_lat_buckets,
            triggers_accepted: self.triggers_accepted(),
            triggers_rejected: rejected,
            input_errors: self.input_errors(),
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            status_transitions: self.status_transitions(),
            api_calls_requested: self.api_calls_requested(),
            api_calls_skipped: self.api_calls_skipped(),
            api_calls_throttled: self.api_calls_throttled(),
            api_error_count: self.api_error_count(),
            route_error_count: self.route_error_count(),
            geocode_applied: self.geocode_applied.load(Ordering::Relaxed),
            geocode_discarded: self.geocode_discarded(),
            ingress_dropped: self.ingress_dropped(),
            egress_dropped: self.egress_dropped.load(Ordering::Relaxed),
            persons,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_GEOCODE_BOUNDS: [u64; 10] = GEOCODE_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub triggers_total: u64,
    pub triggers_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Trigger processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    /// Provider round-trip histogram buckets (ms)
    pub geocode_lat_buckets: [u64; NUM_BUCKETS],
    pub geocode_p95_ms: u64,
    pub triggers_accepted: u64,
    /// Rejections indexed by `RejectReason::index`
    pub triggers_rejected: [u64; NUM_REJECT_REASONS],
    pub input_errors: u64,
    pub ticks_total: u64,
    pub status_transitions: u64,
    pub api_calls_requested: u64,
    pub api_calls_skipped: u64,
    pub api_calls_throttled: u64,
    pub api_error_count: u64,
    pub route_error_count: u64,
    pub geocode_applied: u64,
    pub geocode_discarded: u64,
    pub ingress_dropped: u64,
    pub egress_dropped: u64,
    pub persons: usize,
}

impl MetricsSummary {
    pub fn rejected_total(&self) -> u64 {
        self.triggers_rejected.iter().sum()
    }

    pub fn log(&self) {
        info!(
            triggers_total = %self.triggers_total,
            triggers_per_sec = format!("{:.2}", self.triggers_per_sec),
            accepted = %self.triggers_accepted,
            rejected = %self.rejected_total(),
            p99_us = %self.lat_p99_us,
            persons = %self.persons,
            api_requested = %self.api_calls_requested,
            api_throttled = %self.api_calls_throttled,
            api_errors = %self.api_error_count,
            geocode_p95_ms = %self.geocode_p95_ms,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.triggers_total(), 0);
        assert_eq!(metrics.api_calls_requested(), 0);
    }

    #[test]
    fn test_record_trigger() {
        let metrics = Metrics::new();

        metrics.record_trigger_processed(100);
        metrics.record_trigger_processed(500);
        metrics.record_trigger_processed(50);

        assert_eq!(metrics.triggers_total(), 3);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_trigger_processed(150);
        metrics.record_trigger_processed(250);
        metrics.record_trigger_accepted();

        let summary = metrics.report(2);
        assert_eq!(summary.triggers_total, 2);
        assert_eq!(summary.avg_process_latency_us, 200);
        assert_eq!(summary.max_process_latency_us, 250);
        assert_eq!(summary.persons, 2);

        let summary = metrics.report(2);
        assert_eq!(summary.triggers_total, 2);
        assert_eq!(summary.avg_process_latency_us, 0);
        assert_eq!(summary.triggers_accepted, 1);
    }

    #[test]
    fn test_rejections_per_reason() {
        let metrics = Metrics::new();
        metrics.record_trigger_rejected(RejectReason::Stale);
        metrics.record_trigger_rejected(RejectReason::Stale);
        metrics.record_trigger_rejected(RejectReason::NotDirectional);

        assert_eq!(metrics.triggers_rejected(RejectReason::Stale), 2);
        assert_eq!(metrics.triggers_rejected(RejectReason::SelfUpdate), 0);
        assert_eq!(metrics.report(0).rejected_total(), 3);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_trigger_processed(i as u64);
                    m.record_api_requested();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.triggers_total(), 10_000);
        assert_eq!(metrics.api_calls_requested(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
        assert_eq!(geocode_bucket_index(50), 0);
        assert_eq!(geocode_bucket_index(30_000), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_trigger_processed(150);
        }
        metrics.record_geocode_latency(70_000);

        let summary = metrics.report(0);
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
        assert_eq!(summary.geocode_p95_ms, 51_200);
    }
}
