//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Reporting swaps the periodic counters to get a snapshot.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only; the in-flight gauge does not enforce the single-attempt rule.

use crate::domain::outcome::OutcomeKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for validation round trips (milliseconds)
/// Buckets: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800
const BUCKET_BOUNDS: [u64; 10] = [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800];
const NUM_BUCKETS: usize = 11;
const NUM_OUTCOMES: usize = OutcomeKind::ALL.len();

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Gate phase values for the Prometheus gauge
pub const GATE_PHASE_IDLE: u64 = 0;
pub const GATE_PHASE_SCANNING: u64 = 1;
pub const GATE_PHASE_VALIDATING: u64 = 2;
pub const GATE_PHASE_RESULT: u64 = 3;

/// Lock-free metrics collector
pub struct Metrics {
    /// Detections that produced a candidate code while scanning (monotonic)
    captures_accepted: AtomicU64,
    /// Detections discarded because the gate was busy or paused (monotonic)
    captures_dropped: AtomicU64,
    /// Validate requests issued (monotonic)
    validations_sent: AtomicU64,
    /// Validate requests currently outstanding
    validations_in_flight: AtomicU64,
    /// Responses that arrived after their attempt was cancelled (monotonic)
    late_responses_discarded: AtomicU64,
    /// Read-only lookups issued (monotonic)
    lookups_sent: AtomicU64,
    /// Outcome counters indexed by `OutcomeKind::index` (monotonic)
    outcomes: [AtomicU64; NUM_OUTCOMES],
    /// Validation round-trip histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    latency_sum_ms: AtomicU64,
    latency_max_ms: AtomicU64,
    /// Current gate phase (see GATE_PHASE_*)
    gate_phase: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            captures_accepted: AtomicU64::new(0),
            captures_dropped: AtomicU64::new(0),
            validations_sent: AtomicU64::new(0),
            validations_in_flight: AtomicU64::new(0),
            late_responses_discarded: AtomicU64::new(0),
            lookups_sent: AtomicU64::new(0),
            outcomes: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_ms: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
            gate_phase: AtomicU64::new(GATE_PHASE_IDLE),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_capture_accepted(&self) {
        self.captures_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capture_dropped(&self) {
        self.captures_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_validation_sent(&self) {
        self.validations_sent.fetch_add(1, Ordering::Relaxed);
        self.validations_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a validation that finished (or was aborted)
    #[inline]
    pub fn record_validation_finished(&self) {
        let _ = self.validations_in_flight.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            v.checked_sub(1)
        });
    }

    #[inline]
    pub fn record_late_response(&self) {
        self.late_responses_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lookup(&self) {
        self.lookups_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a classified outcome with its round-trip latency
    #[inline]
    pub fn record_outcome(&self, kind: OutcomeKind, latency_ms: u64) {
        self.outcomes[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn set_gate_phase(&self, phase: u64) {
        self.gate_phase.store(phase, Ordering::Relaxed);
    }

    #[inline]
    pub fn gate_phase(&self) -> u64 {
        self.gate_phase.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn captures_dropped(&self) -> u64 {
        self.captures_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn validations_sent(&self) -> u64 {
        self.validations_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn validations_in_flight(&self) -> u64 {
        self.validations_in_flight.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn late_responses_discarded(&self) -> u64 {
        self.late_responses_discarded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn outcome_total(&self, kind: OutcomeKind) -> u64 {
        self.outcomes[kind.index()].load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let latency_buckets = swap_buckets(&self.latency_buckets);
        let latency_sum = self.latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max_ms = self.latency_max_ms.swap(0, Ordering::Relaxed);
        let completed: u64 = latency_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let scans_per_min = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let mut outcomes = [0u64; NUM_OUTCOMES];
        for (i, counter) in self.outcomes.iter().enumerate() {
            outcomes[i] = counter.load(Ordering::Relaxed);
        }

        MetricsSummary {
            captures_accepted: self.captures_accepted.load(Ordering::Relaxed),
            captures_dropped: self.captures_dropped.load(Ordering::Relaxed),
            validations_sent: self.validations_sent.load(Ordering::Relaxed),
            validations_in_flight: self.validations_in_flight.load(Ordering::Relaxed),
            late_responses_discarded: self.late_responses_discarded.load(Ordering::Relaxed),
            lookups_sent: self.lookups_sent.load(Ordering::Relaxed),
            outcomes,
            scans_per_min,
            latency_buckets,
            latency_avg_ms: if completed > 0 { latency_sum / completed } else { 0 },
            latency_max_ms,
            latency_p50_ms: percentile_from_buckets(&latency_buckets, 0.50),
            latency_p99_ms: percentile_from_buckets(&latency_buckets, 0.99),
            gate_phase: self.gate_phase.load(Ordering::Relaxed),
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
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub captures_accepted: u64,
    pub captures_dropped: u64,
    pub validations_sent: u64,
    pub validations_in_flight: u64,
    pub late_responses_discarded: u64,
    pub lookups_sent: u64,
    /// Monotonic outcome totals indexed by `OutcomeKind::index`
    pub outcomes: [u64; NUM_OUTCOMES],
    pub scans_per_min: f64,
    /// Validation latency histogram since last report
    pub latency_buckets: [u64; NUM_BUCKETS],
    pub latency_avg_ms: u64,
    pub latency_max_ms: u64,
    pub latency_p50_ms: u64,
    pub latency_p99_ms: u64,
    pub gate_phase: u64,
}

impl MetricsSummary {
    pub fn outcome(&self, kind: OutcomeKind) -> u64 {
        self.outcomes[kind.index()]
    }

    pub fn log(&self) {
        info!(
            captures = %self.captures_accepted,
            dropped = %self.captures_dropped,
            validations = %self.validations_sent,
            authorized = %self.outcome(OutcomeKind::Authorized),
            already_used = %self.outcome(OutcomeKind::DeniedAlreadyUsed),
            voided = %self.outcome(OutcomeKind::DeniedVoided),
            not_found = %self.outcome(OutcomeKind::DeniedNotFound),
            connection_errors = %self.outcome(OutcomeKind::ConnectionError),
            scans_per_min = format!("{:.1}", self.scans_per_min),
            p50_ms = %self.latency_p50_ms,
            p99_ms = %self.latency_p99_ms,
            "metrics"
        );
    }
}
