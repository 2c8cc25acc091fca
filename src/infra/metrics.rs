//! Lock-free metrics collection and periodic reporting
//!
//! Counters are updated from the control loop, the link reader and the sink
//! workers without locking. The per-interval tick latency statistics are
//! swapped to zero on each `report()`; the lifetime histogram served to
//! Prometheus and everything else is monotonic.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistics
//! only and must not drive control decisions.

use crate::domain::types::{Channel, FusionOutput};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Tick latency bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

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

#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Telemetry destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Bus,
    LogStore,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Bus => "bus",
            SinkKind::LogStore => "log_store",
        }
    }

    fn index(&self) -> usize {
        match self {
            SinkKind::Bus => 0,
            SinkKind::LogStore => 1,
        }
    }
}

#[derive(Default)]
struct SinkCounters {
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Lock-free metrics collector
pub struct Metrics {
    ticks_total: AtomicU64,
    /// Ticks since last report (reset on report)
    ticks_since_report: AtomicU64,
    tick_latency_sum_us: AtomicU64,
    tick_latency_max_us: AtomicU64,
    tick_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Lifetime histogram, never reset
    tick_latency_total_sum_us: AtomicU64,
    tick_latency_total_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    frames_parsed: AtomicU64,
    frames_rejected: AtomicU64,
    recognitions: AtomicU64,
    camera_failures: AtomicU64,
    owner_commands: AtomicU64,
    session_commands: AtomicU64,
    sinks: [SinkCounters; 2],
    session_active: AtomicU64,
    owner_authorized: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_since_report: AtomicU64::new(0),
            tick_latency_sum_us: AtomicU64::new(0),
            tick_latency_max_us: AtomicU64::new(0),
            tick_latency_buckets: Default::default(),
            tick_latency_total_sum_us: AtomicU64::new(0),
            tick_latency_total_buckets: Default::default(),
            frames_parsed: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            recognitions: AtomicU64::new(0),
            camera_failures: AtomicU64::new(0),
            owner_commands: AtomicU64::new(0),
            session_commands: AtomicU64::new(0),
            sinks: Default::default(),
            session_active: AtomicU64::new(0),
            owner_authorized: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_tick(&self, latency_us: u64, output: &FusionOutput) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.ticks_since_report.fetch_add(1, Ordering::Relaxed);
        self.tick_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.tick_latency_max_us, latency_us);
        let bucket = bucket_index(latency_us);
        self.tick_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.tick_latency_total_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.tick_latency_total_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.session_active.store(output.session_active as u64, Ordering::Relaxed);
        self.owner_authorized.store(output.owner_authorized as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_parsed(&self) {
        self.frames_parsed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recognition(&self) {
        self.recognitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_camera_failure(&self) {
        self.camera_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command(&self, channel: Channel) {
        match channel {
            Channel::Owner => self.owner_commands.fetch_add(1, Ordering::Relaxed),
            Channel::Session => self.session_commands.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_sink_published(&self, sink: SinkKind) {
        self.sinks[sink.index()].published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink_failed(&self, sink: SinkKind) {
        self.sinks[sink.index()].failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Event discarded because the sink's queue was full
    #[inline]
    pub fn record_sink_dropped(&self, sink: SinkKind) {
        self.sinks[sink.index()].dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    /// Snapshot; resets the per-interval tick latency statistics
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Snapshot without resetting anything (for scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let (ticks_count, latency_sum, max_latency, tick_lat_buckets) = if reset {
            (
                self.ticks_since_report.swap(0, Ordering::Relaxed),
                self.tick_latency_sum_us.swap(0, Ordering::Relaxed),
                self.tick_latency_max_us.swap(0, Ordering::Relaxed),
                swap_buckets(&self.tick_latency_buckets),
            )
        } else {
            (
                self.ticks_since_report.load(Ordering::Relaxed),
                self.tick_latency_sum_us.load(Ordering::Relaxed),
                self.tick_latency_max_us.load(Ordering::Relaxed),
                load_buckets(&self.tick_latency_buckets),
            )
        };

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            if reset {
                *last = Instant::now();
            }
            elapsed
        };

        let ticks_per_sec = if elapsed.as_secs_f64() > 0.0 {
            ticks_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if ticks_count > 0 { latency_sum / ticks_count } else { 0 };

        let sink = |kind: SinkKind| {
            let counters = &self.sinks[kind.index()];
            SinkSummary {
                published: counters.published.load(Ordering::Relaxed),
                failed: counters.failed.load(Ordering::Relaxed),
                dropped: counters.dropped.load(Ordering::Relaxed),
            }
        };

        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_per_sec,
            avg_tick_latency_us: avg_latency,
            max_tick_latency_us: max_latency,
            tick_lat_buckets,
            tick_lat_p50_us: percentile_from_buckets(&tick_lat_buckets, 0.50),
            tick_lat_p99_us: percentile_from_buckets(&tick_lat_buckets, 0.99),
            tick_lat_total_buckets: load_buckets(&self.tick_latency_total_buckets),
            tick_lat_total_sum_us: self.tick_latency_total_sum_us.load(Ordering::Relaxed),
            frames_parsed: self.frames_parsed.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            recognitions: self.recognitions.load(Ordering::Relaxed),
            camera_failures: self.camera_failures.load(Ordering::Relaxed),
            owner_commands: self.owner_commands.load(Ordering::Relaxed),
            session_commands: self.session_commands.load(Ordering::Relaxed),
            bus: sink(SinkKind::Bus),
            log_store: sink(SinkKind::LogStore),
            session_active: self.session_active.load(Ordering::Relaxed) == 1,
            owner_authorized: self.owner_authorized.load(Ordering::Relaxed) == 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub published: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_sec: f64,
    pub avg_tick_latency_us: u64,
    pub max_tick_latency_us: u64,
    pub tick_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub tick_lat_p50_us: u64,
    pub tick_lat_p99_us: u64,
    /// Since startup; only ever grows
    pub tick_lat_total_buckets: [u64; METRICS_NUM_BUCKETS],
    pub tick_lat_total_sum_us: u64,
    pub frames_parsed: u64,
    pub frames_rejected: u64,
    pub recognitions: u64,
    pub camera_failures: u64,
    pub owner_commands: u64,
    pub session_commands: u64,
    pub bus: SinkSummary,
    pub log_store: SinkSummary,
    pub session_active: bool,
    pub owner_authorized: bool,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_sec = format!("{:.1}", self.ticks_per_sec),
            avg_tick_us = %self.avg_tick_latency_us,
            max_tick_us = %self.max_tick_latency_us,
            p99_tick_us = %self.tick_lat_p99_us,
            frames_parsed = %self.frames_parsed,
            frames_rejected = %self.frames_rejected,
            recognitions = %self.recognitions,
            camera_failures = %self.camera_failures,
            owner_cmds = %self.owner_commands,
            session_cmds = %self.session_commands,
            bus_published = %self.bus.published,
            bus_failed = %self.bus.failed,
            log_published = %self.log_store.published,
            log_failed = %self.log_store.failed,
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
        assert_eq!(metrics.ticks_total(), 0);
        let summary = metrics.report();
        assert_eq!(summary.frames_parsed, 0);
        assert_eq!(summary.tick_lat_p50_us, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(30_000), 9);
        assert_eq!(bucket_index(1_000_000), 10);
    }

    #[test]
    fn test_report_resets_tick_latency() {
        let metrics = Metrics::new();
        let output = FusionOutput { session_active: true, ..Default::default() };
        metrics.record_tick(150, &output);
        metrics.record_tick(250, &output);

        let summary = metrics.report();
        assert_eq!(summary.ticks_total, 2);
        assert_eq!(summary.avg_tick_latency_us, 200);
        assert_eq!(summary.max_tick_latency_us, 250);
        assert!(summary.session_active);

        let summary = metrics.report();
        assert_eq!(summary.ticks_total, 2);
        assert_eq!(summary.max_tick_latency_us, 0);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_tick(300, &FusionOutput::default());
        assert_eq!(metrics.snapshot().max_tick_latency_us, 300);
        assert_eq!(metrics.snapshot().tick_lat_buckets[2], 1);
        assert_eq!(metrics.report().max_tick_latency_us, 300);
        assert_eq!(metrics.snapshot().max_tick_latency_us, 0);
    }

    #[test]
    fn test_lifetime_histogram_survives_report() {
        let metrics = Metrics::new();
        metrics.record_tick(150, &FusionOutput::default());
        metrics.record_tick(900, &FusionOutput::default());
        let _ = metrics.report();
        metrics.record_tick(150, &FusionOutput::default());

        let summary = metrics.report();
        assert_eq!(summary.tick_lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(summary.tick_lat_total_buckets[1], 2);
        assert_eq!(summary.tick_lat_total_buckets[4], 1);
        assert_eq!(summary.tick_lat_total_sum_us, 1200);
    }

    #[test]
    fn test_sink_counters_are_separate() {
        let metrics = Metrics::new();
        metrics.record_sink_published(SinkKind::Bus);
        metrics.record_sink_published(SinkKind::Bus);
        metrics.record_sink_failed(SinkKind::LogStore);
        metrics.record_sink_dropped(SinkKind::LogStore);

        let summary = metrics.report();
        assert_eq!(summary.bus, SinkSummary { published: 2, failed: 0, dropped: 0 });
        assert_eq!(summary.log_store, SinkSummary { published: 0, failed: 1, dropped: 1 });
    }

    #[test]
    fn test_update_atomic_max() {
        let max = AtomicU64::new(10);
        update_atomic_max(&max, 5);
        assert_eq!(max.load(Ordering::Relaxed), 10);
        update_atomic_max(&max, 20);
        assert_eq!(max.load(Ordering::Relaxed), 20);
    }
}
