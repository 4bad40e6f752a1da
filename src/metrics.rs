use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of timings kept per tracker
const DEFAULT_WINDOW: usize = 1000;

/// Sliding window of durations with percentile queries
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a tracker that keeps the last `window_size` samples
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size: window_size.max(1),
        }
    }

    /// Record one duration
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let mut samples = self.samples.lock();
        if samples.len() >= self.window_size {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    /// Median in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 95th percentile in microseconds
    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    /// 99th percentile in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = {
            let samples = self.samples.lock();
            if samples.is_empty() {
                return 0.0;
            }
            samples.iter().copied().collect()
        };
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Number of samples currently in the window
    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }
}

/// Timing and traffic counters for one stage.
///
/// Cloning shares the underlying counters, so the pipeline keeps one clone
/// while the worker thread records into another.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    processed: Arc<AtomicU64>,
    discarded: Arc<AtomicU64>,
    run_time: PercentileTracker,
    wait_time: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            discarded: Arc::new(AtomicU64::new(0)),
            run_time: PercentileTracker::new(DEFAULT_WINDOW),
            wait_time: PercentileTracker::new(DEFAULT_WINDOW),
            start_time: Instant::now(),
        }
    }

    /// Record an item handed to the downstream link
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an item rejected by a closed downstream link
    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent inside the user function
    pub fn record_run(&self, elapsed: Duration) {
        self.run_time.record(elapsed);
    }

    /// Record time spent waiting on the upstream link
    pub fn record_wait(&self, elapsed: Duration) {
        self.wait_time.record(elapsed);
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total_discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Items per second since the stage was created
    pub fn throughput_ips(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_processed() as f64 / elapsed
        }
    }

    /// Run-time tracker for the user function
    pub fn run_time(&self) -> &PercentileTracker {
        &self.run_time
    }

    /// Wait-time tracker for the upstream link
    pub fn wait_time(&self) -> &PercentileTracker {
        &self.wait_time
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_processed: self.total_processed(),
            total_discarded: self.total_discarded(),
            throughput_ips: self.throughput_ips(),
            run_p50_us: self.run_time.p50_us(),
            run_p95_us: self.run_time.p95_us(),
            run_p99_us: self.run_time.p99_us(),
            wait_p50_us: self.wait_time.p50_us(),
            wait_p99_us: self.wait_time.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a stage's metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub total_discarded: u64,
    pub throughput_ips: f64,
    pub run_p50_us: f64,
    pub run_p95_us: f64,
    pub run_p99_us: f64,
    pub wait_p50_us: f64,
    pub wait_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Human-readable one-line summary
    pub fn format(&self) -> String {
        format!(
            "Processed: {}, Discarded: {}, Throughput: {:.2} items/s, \
             Run P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, \
             Wait P50: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.total_processed,
            self.total_discarded,
            self.throughput_ips,
            self.run_p50_us,
            self.run_p95_us,
            self.run_p99_us,
            self.wait_p50_us,
            self.wait_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
