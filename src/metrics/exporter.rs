//! Prometheus text exposition and cross-connector aggregation.

use super::{ConnectorMetrics, MetricsSnapshot};
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::Arc;

/// Renders registered connector metrics in the Prometheus text format.
pub struct PrometheusExporter {
    namespace: String,
    metrics: DashMap<String, Arc<ConnectorMetrics>>,
}

impl PrometheusExporter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: sanitize_name(&namespace.into()),
            metrics: DashMap::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, metrics: Arc<ConnectorMetrics>) {
        self.metrics.insert(name.into(), metrics);
    }

    pub fn unregister(&self, name: &str) {
        self.metrics.remove(name);
    }

    /// Text exposition of every registered connector.
    pub fn export(&self) -> String {
        let ns = &self.namespace;
        let mut out = String::new();

        let _ = writeln!(out, "# HELP {ns}_queries_total Total queries issued.");
        let _ = writeln!(out, "# TYPE {ns}_queries_total counter");
        for entry in self.metrics.iter() {
            let snapshot = entry.value().snapshot();
            let _ = writeln!(
                out,
                "{ns}_queries_total{{connector=\"{}\"}} {}",
                sanitize_name(entry.key()),
                snapshot.queries
            );
        }

        let _ = writeln!(out, "# HELP {ns}_executes_total Total commands executed.");
        let _ = writeln!(out, "# TYPE {ns}_executes_total counter");
        for entry in self.metrics.iter() {
            let snapshot = entry.value().snapshot();
            let _ = writeln!(
                out,
                "{ns}_executes_total{{connector=\"{}\"}} {}",
                sanitize_name(entry.key()),
                snapshot.executes
            );
        }

        let _ = writeln!(out, "# HELP {ns}_errors_total Total failed operations.");
        let _ = writeln!(out, "# TYPE {ns}_errors_total counter");
        for entry in self.metrics.iter() {
            let snapshot = entry.value().snapshot();
            let _ = writeln!(
                out,
                "{ns}_errors_total{{connector=\"{}\"}} {}",
                sanitize_name(entry.key()),
                snapshot.errors
            );
        }

        let _ = writeln!(out, "# HELP {ns}_connected Whether the connector is connected.");
        let _ = writeln!(out, "# TYPE {ns}_connected gauge");
        for entry in self.metrics.iter() {
            let snapshot = entry.value().snapshot();
            let _ = writeln!(
                out,
                "{ns}_connected{{connector=\"{}\"}} {}",
                sanitize_name(entry.key()),
                if snapshot.connected { 1 } else { 0 }
            );
        }

        let _ = writeln!(out, "# HELP {ns}_query_latency_seconds Query latency quantiles.");
        let _ = writeln!(out, "# TYPE {ns}_query_latency_seconds summary");
        for entry in self.metrics.iter() {
            let snapshot = entry.value().snapshot();
            let connector = sanitize_name(entry.key());
            for (quantile, value) in [
                ("0.5", snapshot.query_p50),
                ("0.95", snapshot.query_p95),
                ("0.99", snapshot.query_p99),
            ] {
                let _ = writeln!(
                    out,
                    "{ns}_query_latency_seconds{{connector=\"{connector}\",quantile=\"{quantile}\"}} {}",
                    value.as_secs_f64()
                );
            }
        }

        let _ = writeln!(out, "# HELP {ns}_execute_latency_seconds Execute latency quantiles.");
        let _ = writeln!(out, "# TYPE {ns}_execute_latency_seconds summary");
        for entry in self.metrics.iter() {
            let snapshot = entry.value().snapshot();
            let connector = sanitize_name(entry.key());
            for (quantile, value) in [
                ("0.5", snapshot.execute_p50),
                ("0.95", snapshot.execute_p95),
                ("0.99", snapshot.execute_p99),
            ] {
                let _ = writeln!(
                    out,
                    "{ns}_execute_latency_seconds{{connector=\"{connector}\",quantile=\"{quantile}\"}} {}",
                    value.as_secs_f64()
                );
            }
        }

        out
    }
}

/// Replaces characters outside `[a-zA-Z0-9_]` with underscores.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Holds metrics for a fleet of connectors and sums them on demand.
pub struct AggregateMetrics {
    connectors: DashMap<String, Arc<ConnectorMetrics>>,
}

impl AggregateMetrics {
    pub fn new() -> Self {
        Self {
            connectors: DashMap::new(),
        }
    }

    pub fn add(&self, name: impl Into<String>, metrics: Arc<ConnectorMetrics>) {
        self.connectors.insert(name.into(), metrics);
    }

    pub fn remove(&self, name: &str) {
        self.connectors.remove(name);
    }

    /// Per-connector snapshots keyed by registered name.
    pub fn all_snapshots(&self) -> Vec<(String, MetricsSnapshot)> {
        let mut snapshots: Vec<_> = self
            .connectors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Counters summed across every connector. `connected` is true when any
    /// member is connected; latency fields are left zero since percentiles
    /// do not compose across connectors.
    pub fn total(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot {
            connector_type: "aggregate".to_string(),
            ..Default::default()
        };
        for entry in self.connectors.iter() {
            let snapshot = entry.value().snapshot();
            total.queries += snapshot.queries;
            total.executes += snapshot.executes;
            total.errors += snapshot.errors;
            total.connects += snapshot.connects;
            total.disconnects += snapshot.disconnects;
            total.connected |= snapshot.connected;
        }
        total
    }
}

impl Default for AggregateMetrics {
    fn default() -> Self {
        Self::new()
    }
}
