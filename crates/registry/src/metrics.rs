//! Prometheus metrics for the service registry.

use crate::types::Status;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for probe result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    /// Classified status (up, down)
    pub status: String,
}

/// Labels for registry operation metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Operation (register, deregister)
    pub operation: String,
}

/// Metrics registry with all service registry metrics
pub struct RegistryMetrics {
    /// Prometheus registry
    pub registry: Registry,

    /// Probes performed, by classification
    probes_total: Family<ProbeLabels, Counter>,
    /// Probe latency
    probe_duration_seconds: Histogram,
    /// Health-check tasks currently running
    tasks_active: Gauge,
    /// Failed status writes from health-check tasks
    status_write_failures_total: Counter,
    /// Register/deregister calls that changed the table
    operations_total: Family<OperationLabels, Counter>,
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let probes_total = Family::<ProbeLabels, Counter>::default();
        registry.register(
            "keeper_probes",
            "Total health probes performed",
            probes_total.clone(),
        );

        // 1ms to ~16s
        let probe_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 15));
        registry.register(
            "keeper_probe_duration_seconds",
            "Health probe duration in seconds",
            probe_duration_seconds.clone(),
        );

        let tasks_active = Gauge::default();
        registry.register(
            "keeper_health_tasks_active",
            "Number of running health-check tasks",
            tasks_active.clone(),
        );

        let status_write_failures_total = Counter::default();
        registry.register(
            "keeper_status_write_failures",
            "Total failed status writes from health-check tasks",
            status_write_failures_total.clone(),
        );

        let operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "keeper_registry_operations",
            "Total registry table operations",
            operations_total.clone(),
        );

        Self {
            registry,
            probes_total,
            probe_duration_seconds,
            tasks_active,
            status_write_failures_total,
            operations_total,
        }
    }

    /// Record a probe classification and its latency
    pub fn record_probe(&self, status: Status, duration: Duration) {
        self.probes_total
            .get_or_create(&ProbeLabels {
                status: status.as_str().to_ascii_lowercase(),
            })
            .inc();
        self.probe_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn task_started(&self) {
        self.tasks_active.inc();
    }

    pub fn task_stopped(&self) {
        self.tasks_active.dec();
    }

    pub fn record_status_write_failure(&self) {
        self.status_write_failures_total.inc();
    }

    pub fn record_operation(&self, operation: &str) {
        self.operations_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    pub fn tasks_active(&self) -> i64 {
        self.tasks_active.get()
    }

    pub fn probes(&self, status: Status) -> u64 {
        self.probes_total
            .get_or_create(&ProbeLabels {
                status: status.as_str().to_ascii_lowercase(),
            })
            .get()
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
