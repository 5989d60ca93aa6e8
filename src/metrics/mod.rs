//! Per-connector operational metrics.
//!
//! Counters are lock-free atomics; latency samples go through a small
//! mutex-guarded reservoir that is only touched once per recorded operation.

mod exporter;

pub use exporter::{AggregateMetrics, PrometheusExporter};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Cap on retained latency samples. On overflow the oldest half is dropped,
/// keeping recent behavior representative without unbounded growth.
const MAX_HISTOGRAM_SAMPLES: usize = 10_000;

pub struct ConnectorMetrics {
    connector_type: String,
    queries: AtomicU64,
    executes: AtomicU64,
    errors: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    query_duration_ns: AtomicU64,
    execute_duration_ns: AtomicU64,
    connected: AtomicBool,
    query_latency: LatencyHistogram,
    execute_latency: LatencyHistogram,
}

impl ConnectorMetrics {
    pub fn new(connector_type: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            queries: AtomicU64::new(0),
            executes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            query_duration_ns: AtomicU64::new(0),
            execute_duration_ns: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            query_latency: LatencyHistogram::default(),
            execute_latency: LatencyHistogram::default(),
        }
    }

    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    pub fn record_query(&self, duration: Duration, success: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.query_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.query_latency.record(duration);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_execute(&self, duration: Duration, success: bool) {
        self.executes.fetch_add(1, Ordering::Relaxed);
        self.execute_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.execute_latency.record(duration);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let queries = self.queries.load(Ordering::Relaxed);
        let executes = self.executes.load(Ordering::Relaxed);
        let query_duration = Duration::from_nanos(self.query_duration_ns.load(Ordering::Relaxed));
        let execute_duration =
            Duration::from_nanos(self.execute_duration_ns.load(Ordering::Relaxed));

        MetricsSnapshot {
            connector_type: self.connector_type.clone(),
            queries,
            executes,
            errors: self.errors.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            avg_query_duration: checked_avg(query_duration, queries),
            avg_execute_duration: checked_avg(execute_duration, executes),
            query_p50: self.query_latency.percentile(0.50),
            query_p95: self.query_latency.percentile(0.95),
            query_p99: self.query_latency.percentile(0.99),
            execute_p50: self.execute_latency.percentile(0.50),
            execute_p95: self.execute_latency.percentile(0.95),
            execute_p99: self.execute_latency.percentile(0.99),
        }
    }

    /// Zeroes all counters and drops latency samples. Connection state is
    /// left alone.
    pub fn reset(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.executes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.connects.store(0, Ordering::Relaxed);
        self.disconnects.store(0, Ordering::Relaxed);
        self.query_duration_ns.store(0, Ordering::Relaxed);
        self.execute_duration_ns.store(0, Ordering::Relaxed);
        self.query_latency.reset();
        self.execute_latency.reset();
    }
}

fn checked_avg(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        total / count as u32
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub connector_type: String,
    pub queries: u64,
    pub executes: u64,
    pub errors: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub connected: bool,
    pub avg_query_duration: Duration,
    pub avg_execute_duration: Duration,
    pub query_p50: Duration,
    pub query_p95: Duration,
    pub query_p99: Duration,
    pub execute_p50: Duration,
    pub execute_p95: Duration,
    pub execute_p99: Duration,
}

/// Bounded reservoir of latency samples supporting percentile queries.
#[derive(Default)]
pub struct LatencyHistogram {
    samples: Mutex<Vec<Duration>>,
}

impl LatencyHistogram {
    pub fn record(&self, duration: Duration) {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() >= MAX_HISTOGRAM_SAMPLES {
            let half = samples.len() / 2;
            samples.drain(..half);
        }
        samples.push(duration);
    }

    /// Percentile over the retained samples, `p` in `[0.0, 1.0]`. Zero when
    /// no samples were recorded.
    pub fn percentile(&self, p: f64) -> Duration {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = samples.clone();
        sorted.sort();
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx]
    }

    pub fn count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn reset(&self) {
        self.samples.lock().unwrap().clear();
    }
}
