//! Coordinator metrics in Prometheus text format
//!
//! - Request counters and latency histograms per request kind
//! - Commit, conflict and membership transition counters
//! - Current config version and node gauges

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 9] = [0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value_ms: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative (upper bound, count) pairs, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            let le = self.boundaries.get(i).copied().unwrap_or(f64::INFINITY);
            result.push((le, cumulative));
        }
        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per request-kind metrics
#[derive(Debug, Default)]
pub struct RequestMetrics {
    pub total: Counter,
    pub errors: Counter,
    pub latency: Histogram,
}

/// Metrics registry owned by one coordinator instance
#[derive(Debug)]
pub struct CoordinatorMetrics {
    requests: Mutex<BTreeMap<String, Arc<RequestMetrics>>>,

    pub commits_total: Counter,
    pub commit_conflicts_total: Counter,
    pub contended_total: Counter,
    pub heartbeats_total: Counter,
    pub sweep_transitions_total: Counter,
    pub reconcile_commits_total: Counter,
    pub reconcile_errors_total: Counter,

    pub config_version: Gauge,
    pub config_nodes: Gauge,
    pub assigned_shards: Gauge,
    pub registered_nodes: Gauge,

    start_time: Instant,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(BTreeMap::new()),
            commits_total: Counter::new(),
            commit_conflicts_total: Counter::new(),
            contended_total: Counter::new(),
            heartbeats_total: Counter::new(),
            sweep_transitions_total: Counter::new(),
            reconcile_commits_total: Counter::new(),
            reconcile_errors_total: Counter::new(),
            config_version: Gauge::new(),
            config_nodes: Gauge::new(),
            assigned_shards: Gauge::new(),
            registered_nodes: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a request kind
    pub fn request(&self, kind: &str) -> Arc<RequestMetrics> {
        self.requests
            .lock()
            .entry(kind.to_string())
            .or_default()
            .clone()
    }

    pub fn record_request(&self, kind: &str, duration: Duration, success: bool) {
        let metrics = self.request(kind);
        metrics.total.inc();
        metrics.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            metrics.errors.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = [
            ("nvcache_commits_total", "Committed configuration versions", &self.commits_total),
            (
                "nvcache_commit_conflicts_total",
                "Commits rejected with a version conflict",
                &self.commit_conflicts_total,
            ),
            (
                "nvcache_contended_total",
                "Updates abandoned after retry",
                &self.contended_total,
            ),
            ("nvcache_heartbeats_total", "Accepted heartbeats", &self.heartbeats_total),
            (
                "nvcache_sweep_transitions_total",
                "Node status changes made by lease sweeps",
                &self.sweep_transitions_total,
            ),
            (
                "nvcache_reconcile_commits_total",
                "Versions committed by reconciliation",
                &self.reconcile_commits_total,
            ),
            (
                "nvcache_reconcile_errors_total",
                "Skipped reconciliation cycles",
                &self.reconcile_errors_total,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        let gauges = [
            ("nvcache_config_version", "Current configuration version", &self.config_version),
            ("nvcache_config_nodes", "Nodes in the current configuration", &self.config_nodes),
            ("nvcache_assigned_shards", "Shards with an owner", &self.assigned_shards),
            ("nvcache_registered_nodes", "Nodes holding a lease", &self.registered_nodes),
        ];
        for (name, help, gauge) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, gauge.get());
        }

        let _ = writeln!(out, "# TYPE nvcache_uptime_seconds gauge");
        let _ = writeln!(out, "nvcache_uptime_seconds {}", self.uptime_seconds());

        let requests = self.requests.lock();
        out.push_str("# TYPE nvcache_requests_total counter\n");
        for (kind, m) in requests.iter() {
            let _ = writeln!(out, "nvcache_requests_total{{kind=\"{}\"}} {}", kind, m.total.get());
        }
        out.push_str("# TYPE nvcache_request_errors_total counter\n");
        for (kind, m) in requests.iter() {
            let _ = writeln!(
                out,
                "nvcache_request_errors_total{{kind=\"{}\"}} {}",
                kind,
                m.errors.get()
            );
        }
        out.push_str("# TYPE nvcache_request_duration_ms histogram\n");
        for (kind, m) in requests.iter() {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "nvcache_request_duration_ms_bucket{{kind=\"{}\",le=\"{}\"}} {}",
                    kind, le, count
                );
            }
            let _ = writeln!(
                out,
                "nvcache_request_duration_ms_sum{{kind=\"{}\"}} {}",
                kind,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "nvcache_request_duration_ms_count{{kind=\"{}\"}} {}",
                kind,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();
        hist.observe(0.05);
        hist.observe(7.0);
        hist.observe(5000.0);

        assert_eq!(hist.count(), 3);
        let buckets = hist.get_buckets();
        assert_eq!(buckets.first(), Some(&(0.1, 1)));
        assert_eq!(buckets.last().map(|b| b.1), Some(3));
        assert!(buckets.last().map(|b| b.0.is_infinite()).unwrap_or(false));
    }

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);

        let gauge = Gauge::new();
        gauge.set(12);
        assert_eq!(gauge.get(), 12);
    }

    #[test]
    fn test_record_request_and_render() {
        let metrics = CoordinatorMetrics::new();
        metrics.record_request("read_config", Duration::from_micros(200), true);
        metrics.record_request("heartbeat", Duration::from_millis(2), false);
        metrics.config_version.set(3);

        assert_eq!(metrics.request("read_config").total.get(), 1);
        assert_eq!(metrics.request("heartbeat").errors.get(), 1);

        let text = metrics.to_prometheus();
        assert!(text.contains("nvcache_config_version 3"));
        assert!(text.contains("nvcache_requests_total{kind=\"read_config\"} 1"));
        assert!(text.contains("nvcache_request_errors_total{kind=\"heartbeat\"} 1"));
        assert!(text.contains("le=\"+Inf\""));
    }
}
