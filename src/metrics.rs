use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency percentiles over the most recent calls
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Sliding window over the latencies of the last `capacity` calls
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: Arc<Mutex<VecDeque<Duration>>>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest one once the window is full
    pub fn record(&self, elapsed: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nearest-rank percentiles of the current window, all zero when empty
    pub fn summary(&self) -> LatencySummary {
        let mut sorted: Vec<Duration> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return LatencySummary::default();
        }
        sorted.sort_unstable();
        let rank = |p: f64| {
            let idx = (sorted.len() as f64 * p).ceil() as usize;
            sorted[idx.clamp(1, sorted.len()) - 1]
        };
        LatencySummary {
            p50: rank(0.50),
            p95: rank(0.95),
            p99: rank(0.99),
        }
    }
}

/// Counters for one pipeline component.
///
/// Cloning is cheap and every clone observes the same counters, so a caller
/// can keep a handle while the component runs inside the pipeline.
#[derive(Debug, Clone)]
pub struct ComponentMetrics {
    /// Items produced (source) or successfully handled (stage, sink)
    processed: Arc<AtomicU64>,
    /// Errors tolerated under skip-on-error
    skipped: Arc<AtomicU64>,
    /// Fetch cycles (source) or admitted operations (stage, sink)
    operations: Arc<AtomicU64>,
    /// Highest inflight count observed at completion time
    peak_inflight: Arc<AtomicUsize>,
    /// Fetch or per-item call latency
    latency: LatencyWindow,
    start_time: Instant,
}

impl ComponentMetrics {
    pub fn new() -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
            operations: Arc::new(AtomicU64::new(0)),
            peak_inflight: Arc::new(AtomicUsize::new(0)),
            latency: LatencyWindow::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Add processed items and return the new cumulative total
    pub fn record_processed(&self, count: u64) -> u64 {
        self.processed.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the start of an operation and return its zero-based ordinal
    pub fn record_operation(&self) -> u64 {
        self.operations.fetch_add(1, Ordering::Relaxed)
    }

    pub fn observe_inflight(&self, inflight: usize) {
        self.peak_inflight.fetch_max(inflight, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.latency.record(elapsed);
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total_skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn total_operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    pub fn peak_inflight(&self) -> usize {
        self.peak_inflight.load(Ordering::Relaxed)
    }

    /// Calculate current throughput in items per second
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_processed() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_processed: self.total_processed(),
            total_skipped: self.total_skipped(),
            total_operations: self.total_operations(),
            peak_inflight: self.peak_inflight(),
            throughput: self.throughput(),
            latency: self.latency.summary(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for ComponentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub total_skipped: u64,
    pub total_operations: u64,
    pub peak_inflight: usize,
    pub throughput: f64,
    pub latency: LatencySummary,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Processed: {}, Skipped: {}, Operations: {}, Peak inflight: {}, \
             Throughput: {:.2} items/s, Latency P50: {:.2}ms, P95: {:.2}ms, P99: {:.2}ms, \
             Elapsed: {:.2}s",
            self.total_processed,
            self.total_skipped,
            self.total_operations,
            self.peak_inflight,
            self.throughput,
            ms(self.latency.p50),
            ms(self.latency.p95),
            ms(self.latency.p99),
            self.elapsed.as_secs_f64()
        )
    }
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
