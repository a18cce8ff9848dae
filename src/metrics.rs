//! Prometheus metrics for cluster operations.
//!
//! The CLI runs one operation per process, so metrics are written once to a
//! textfile for the node-exporter textfile collector instead of being served.

use std::path::Path;
use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::error::{KcoError, Result};

/// Labels for operation outcome metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub cluster_name: String,
    pub operation: String,
    pub result: String,
}

/// Labels for operation duration metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationKindLabels {
    pub operation: String,
}

/// Labels for per-step remote command metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StepLabels {
    pub cluster_name: String,
    pub step: String,
}

/// Labels for per-cluster node metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub cluster_name: String,
}

/// All Prometheus metrics for the orchestrator.
#[derive(Clone)]
pub struct Metrics {
    pub operation_total: Family<OperationLabels, Counter>,
    pub operation_duration_seconds: Family<OperationKindLabels, Histogram>,
    pub remote_retry_total: Family<StepLabels, Counter>,
    pub node_upgraded_total: Family<ClusterLabels, Counter>,
}

/// Operations take from seconds (delete) up to the upgrade timeout.
const OPERATION_DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let operation_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "kco_operation",
            "Total number of cluster operations by result",
            operation_total.clone(),
        );

        let operation_duration_seconds =
            Family::<OperationKindLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(OPERATION_DURATION_BUCKETS.iter().copied())
            });
        registry.register(
            "kco_operation_duration_seconds",
            "Duration of cluster operations in seconds",
            operation_duration_seconds.clone(),
        );

        let remote_retry_total = Family::<StepLabels, Counter>::default();
        registry.register(
            "kco_remote_retry",
            "Total number of retried remote commands",
            remote_retry_total.clone(),
        );

        let node_upgraded_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "kco_node_upgraded",
            "Total number of nodes upgraded and verified",
            node_upgraded_total.clone(),
        );

        Self {
            operation_total,
            operation_duration_seconds,
            remote_retry_total,
            node_upgraded_total,
        }
    }

    /// Record the outcome and duration of a finished operation.
    pub fn record_operation(
        &self,
        cluster_name: &str,
        operation: &str,
        succeeded: bool,
        elapsed: Duration,
    ) {
        let result = if succeeded { "success" } else { "failure" };
        self.operation_total
            .get_or_create(&OperationLabels {
                cluster_name: cluster_name.to_string(),
                operation: operation.to_string(),
                result: result.to_string(),
            })
            .inc();
        self.operation_duration_seconds
            .get_or_create(&OperationKindLabels {
                operation: operation.to_string(),
            })
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_retry(&self, cluster_name: &str, step: &str) {
        self.remote_retry_total
            .get_or_create(&StepLabels {
                cluster_name: cluster_name.to_string(),
                step: step.to_string(),
            })
            .inc();
    }

    pub fn record_node_upgraded(&self, cluster_name: &str) {
        self.node_upgraded_total
            .get_or_create(&ClusterLabels {
                cluster_name: cluster_name.to_string(),
            })
            .inc();
    }
}

/// Encode the registry as OpenMetrics text.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let mut buf = String::new();
    encode(&mut buf, registry)
        .map_err(|e| KcoError::Persistence(format!("Failed to encode metrics: {e}")))?;
    Ok(buf)
}

/// Write the registry to a textfile, replacing it atomically.
pub async fn write_textfile(registry: &Registry, path: &Path) -> Result<()> {
    let content = encode_text(registry)?;
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
