//! Metrics collection for dispatcher observability.
//!
//! A pluggable metrics system with a local in-memory implementation by
//! default. Recording happens on worker threads and on the thread draining
//! the main queue, so the backend API is synchronous.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A pluggable metrics backend trait.
///
/// Implement this trait to integrate with external metrics systems like
/// Prometheus or OpenTelemetry.
pub trait MetricsBackend: Send + Sync {
    /// Increment a counter metric by the given value
    fn increment_counter(&self, name: &str, value: u64);

    /// Set a gauge metric to the given value
    fn set_gauge(&self, name: &str, value: f64);

    /// Record a histogram observation (latencies are in milliseconds)
    fn record_histogram(&self, name: &str, value: f64);

    /// Get current counter value
    fn get_counter(&self, name: &str) -> Option<u64>;

    /// Get current gauge value
    fn get_gauge(&self, name: &str) -> Option<f64>;

    /// Get histogram statistics
    fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats>;

    /// Reset all metrics
    fn reset(&self);

    /// Export all metrics as a snapshot
    fn snapshot(&self) -> MetricsSnapshot;
}

/// Statistics for a histogram metric
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Percentile values over the retained sample window
    pub percentiles: HistogramPercentiles,
}

/// Percentile values for histogram
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Default for HistogramStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HistogramStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            mean: 0.0,
            percentiles: HistogramPercentiles::default(),
        }
    }
}

/// Samples retained per histogram for percentile estimation
const MAX_SAMPLES: usize = 4096;

#[derive(Debug, Clone)]
struct HistogramData {
    samples: VecDeque<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramData {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    fn record(&mut self, value: f64) {
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
        sorted[idx]
    }

    // Percentiles are computed on read; recording stays O(1).
    fn stats(&self) -> HistogramStats {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        HistogramStats {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean: if self.count == 0 {
                0.0
            } else {
                self.sum / self.count as f64
            },
            percentiles: HistogramPercentiles {
                p50: Self::percentile(&sorted, 0.50),
                p90: Self::percentile(&sorted, 0.90),
                p95: Self::percentile(&sorted, 0.95),
                p99: Self::percentile(&sorted, 0.99),
            },
        }
    }
}

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramStats>,
}

/// Local in-memory metrics implementation.
pub struct LocalMetrics {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, HistogramData>>,
}

impl LocalMetrics {
    /// Create a new local metrics instance
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for LocalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBackend for LocalMetrics {
    fn increment_counter(&self, name: &str, value: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().insert(name.to_string(), value);
    }

    fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(HistogramData::new)
            .record(value);
    }

    fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters.read().get(name).copied()
    }

    fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).copied()
    }

    fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats> {
        self.histograms.read().get(name).map(HistogramData::stats)
    }

    fn reset(&self) {
        self.counters.write().clear();
        self.gauges.write().clear();
        self.histograms.write().clear();
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.read().clone(),
            gauges: self.gauges.read().clone(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.stats()))
                .collect(),
        }
    }
}

/// Predefined metric names
pub mod metric_names {
    /// Counter: Total tasks submitted
    pub const TASKS_SUBMITTED: &str = "dispatch.tasks.submitted";
    /// Counter: Total tasks completed successfully
    pub const TASKS_COMPLETED: &str = "dispatch.tasks.completed";
    /// Counter: Total tasks failed (error or panic)
    pub const TASKS_FAILED: &str = "dispatch.tasks.failed";
    /// Counter: Main-queue drains performed
    pub const MAIN_QUEUE_DRAINS: &str = "dispatch.main.drains";

    /// Gauge: Live priority lanes
    pub const LANES_LIVE: &str = "dispatch.lanes.live";
    /// Gauge: Worker threads started
    pub const WORKERS: &str = "dispatch.workers";

    /// Histogram: Task execution time (ms)
    pub const TASK_EXECUTION: &str = "dispatch.task.execution_ms";
    /// Histogram: Task wait time in queue (ms)
    pub const TASK_WAIT_TIME: &str = "dispatch.task.wait_time_ms";
}

/// Dispatcher metrics collector wrapping a metrics backend.
///
/// Per-queue series are suffixed with the queue label (`main`, `p2`, `p-2`, ...).
#[derive(Clone)]
pub struct DispatchMetrics {
    backend: Arc<dyn MetricsBackend>,
}

impl DispatchMetrics {
    /// Create a new collector with the given backend
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }

    /// Create a new collector with a local in-memory backend
    pub fn local() -> Self {
        Self {
            backend: Arc::new(LocalMetrics::new()),
        }
    }

    /// Get the underlying metrics backend
    pub fn backend(&self) -> &Arc<dyn MetricsBackend> {
        &self.backend
    }

    fn increment_both(&self, name: &str, queue: &str) {
        self.backend.increment_counter(name, 1);
        self.backend
            .increment_counter(&format!("{}.{}", name, queue), 1);
    }

    /// Record a task submission
    pub fn record_submit(&self, queue: &str) {
        self.increment_both(metric_names::TASKS_SUBMITTED, queue);
    }

    /// Record a successful completion and its execution time
    pub fn record_complete(&self, queue: &str, execution_ms: f64) {
        self.increment_both(metric_names::TASKS_COMPLETED, queue);
        self.backend
            .record_histogram(metric_names::TASK_EXECUTION, execution_ms);
        self.backend.record_histogram(
            &format!("{}.{}", metric_names::TASK_EXECUTION, queue),
            execution_ms,
        );
    }

    /// Record a failed task
    pub fn record_failure(&self, queue: &str) {
        self.increment_both(metric_names::TASKS_FAILED, queue);
    }

    /// Record how long a task waited before it started
    pub fn record_wait_time(&self, queue: &str, wait_ms: f64) {
        self.backend
            .record_histogram(metric_names::TASK_WAIT_TIME, wait_ms);
        self.backend.record_histogram(
            &format!("{}.{}", metric_names::TASK_WAIT_TIME, queue),
            wait_ms,
        );
    }

    /// Record one main-queue drain
    pub fn record_main_drain(&self) {
        self.backend
            .increment_counter(metric_names::MAIN_QUEUE_DRAINS, 1);
    }

    /// Update live lane gauge
    pub fn set_live_lanes(&self, lanes: usize) {
        self.backend
            .set_gauge(metric_names::LANES_LIVE, lanes as f64);
    }

    /// Update worker gauge
    pub fn set_workers(&self, workers: usize) {
        self.backend.set_gauge(metric_names::WORKERS, workers as f64);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.backend.snapshot()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.backend.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_metrics_counter() {
        let metrics = LocalMetrics::new();

        assert_eq!(metrics.get_counter("test.counter"), None);

        metrics.increment_counter("test.counter", 1);
        metrics.increment_counter("test.counter", 5);
        assert_eq!(metrics.get_counter("test.counter"), Some(6));
    }

    #[test]
    fn test_local_metrics_gauge() {
        let metrics = LocalMetrics::new();

        assert_eq!(metrics.get_gauge("test.gauge"), None);

        metrics.set_gauge("test.gauge", 42.5);
        assert_eq!(metrics.get_gauge("test.gauge"), Some(42.5));

        metrics.set_gauge("test.gauge", 100.0);
        assert_eq!(metrics.get_gauge("test.gauge"), Some(100.0));
    }

    #[test]
    fn test_local_metrics_histogram() {
        let metrics = LocalMetrics::new();

        assert!(metrics.get_histogram_stats("test.histogram").is_none());

        metrics.record_histogram("test.histogram", 10.0);
        metrics.record_histogram("test.histogram", 20.0);
        metrics.record_histogram("test.histogram", 30.0);

        let stats = metrics.get_histogram_stats("test.histogram").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 60.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 20.0);
    }

    #[test]
    fn test_local_metrics_histogram_percentiles() {
        let metrics = LocalMetrics::new();

        for i in 1..=100 {
            metrics.record_histogram("test.histogram", i as f64);
        }

        let stats = metrics.get_histogram_stats("test.histogram").unwrap();
        assert_eq!(stats.count, 100);
        assert!(stats.percentiles.p50 >= 49.0 && stats.percentiles.p50 <= 51.0);
        assert!(stats.percentiles.p90 >= 89.0 && stats.percentiles.p90 <= 91.0);
        assert!(stats.percentiles.p99 >= 98.0 && stats.percentiles.p99 <= 100.0);
    }

    #[test]
    fn test_histogram_sample_window_is_bounded() {
        let mut data = HistogramData::new();
        for i in 0..(MAX_SAMPLES + 10) {
            data.record(i as f64);
        }

        assert_eq!(data.samples.len(), MAX_SAMPLES);
        let stats = data.stats();
        assert_eq!(stats.count, (MAX_SAMPLES + 10) as u64);
        assert_eq!(stats.min, 0.0);
    }

    #[test]
    fn test_local_metrics_reset() {
        let metrics = LocalMetrics::new();

        metrics.increment_counter("test.counter", 10);
        metrics.set_gauge("test.gauge", 50.0);
        metrics.record_histogram("test.histogram", 100.0);

        metrics.reset();

        assert_eq!(metrics.get_counter("test.counter"), None);
        assert_eq!(metrics.get_gauge("test.gauge"), None);
        assert!(metrics.get_histogram_stats("test.histogram").is_none());
    }

    #[test]
    fn test_dispatch_metrics_record_submit() {
        let metrics = DispatchMetrics::local();

        metrics.record_submit("p2");
        metrics.record_submit("p2");
        metrics.record_submit("main");

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.counters.get(metric_names::TASKS_SUBMITTED),
            Some(&3)
        );
        assert_eq!(
            snapshot
                .counters
                .get(&format!("{}.p2", metric_names::TASKS_SUBMITTED)),
            Some(&2)
        );
        assert_eq!(
            snapshot
                .counters
                .get(&format!("{}.main", metric_names::TASKS_SUBMITTED)),
            Some(&1)
        );
    }

    #[test]
    fn test_dispatch_metrics_record_complete() {
        let metrics = DispatchMetrics::local();

        metrics.record_complete("p0", 50.0);
        metrics.record_complete("p0", 100.0);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.counters.get(metric_names::TASKS_COMPLETED),
            Some(&2)
        );
        let stats = snapshot
            .histograms
            .get(metric_names::TASK_EXECUTION)
            .unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 75.0);
    }

    #[test]
    fn test_dispatch_metrics_failure_and_wait_time() {
        let metrics = DispatchMetrics::local();

        metrics.record_failure("main");
        metrics.record_wait_time("main", 25.0);
        metrics.record_wait_time("main", 75.0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters.get(metric_names::TASKS_FAILED), Some(&1));
        let wait = snapshot
            .histograms
            .get(&format!("{}.main", metric_names::TASK_WAIT_TIME))
            .unwrap();
        assert_eq!(wait.mean, 50.0);
    }

    #[test]
    fn test_dispatch_metrics_gauges() {
        let metrics = DispatchMetrics::local();

        metrics.set_live_lanes(3);
        metrics.set_workers(2);
        metrics.record_main_drain();

        let backend = metrics.backend();
        assert_eq!(backend.get_gauge(metric_names::LANES_LIVE), Some(3.0));
        assert_eq!(backend.get_gauge(metric_names::WORKERS), Some(2.0));
        assert_eq!(backend.get_counter(metric_names::MAIN_QUEUE_DRAINS), Some(1));
    }

    #[test]
    fn test_dispatch_metrics_clone_shares_backend() {
        let metrics = DispatchMetrics::local();
        metrics.record_submit("p0");

        let cloned = metrics.clone();
        cloned.record_submit("p0");

        assert_eq!(
            metrics.snapshot().counters.get(metric_names::TASKS_SUBMITTED),
            Some(&2)
        );
    }

    #[test]
    fn test_histogram_stats_default() {
        let stats = HistogramStats::default();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.sum, 0.0);
        assert_eq!(stats.mean, 0.0);
    }

    #[test]
    fn test_metrics_snapshot_default() {
        let snapshot = MetricsSnapshot::default();
        assert!(snapshot.counters.is_empty());
        assert!(snapshot.gauges.is_empty());
        assert!(snapshot.histograms.is_empty());
    }
}
