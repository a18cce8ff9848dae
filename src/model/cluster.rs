//! Cluster and supported-version records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ClusterState, NodeRole};
use crate::error::{KcoError, Result};

/// Per-role references (compute offering or image template).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd: Option<String>,
}

impl RoleRefs {
    /// Reference for the given role.
    pub fn for_role(&self, role: NodeRole) -> Option<&str> {
        match role {
            NodeRole::Control => self.control.as_deref(),
            NodeRole::Worker => self.worker.as_deref(),
            NodeRole::Etcd => self.etcd.as_deref(),
        }
    }
}

/// Autoscaling bounds for the worker pool.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Autoscaling {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

/// A Kubernetes cluster running on tenant VMs.
///
/// The lifecycle `state` has no public setter: it only changes when the store
/// applies a transition accepted by [`crate::state::transition`].
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub domain_id: String,
    #[serde(default)]
    pub zone_id: String,

    /// Number of control plane nodes.
    pub control_node_count: u64,
    /// Number of worker nodes.
    pub node_count: u64,
    /// Number of dedicated etcd nodes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_node_count: Option<u64>,

    #[serde(default)]
    pub service_offerings: RoleRefs,
    #[serde(default)]
    pub templates: RoleRefs,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    /// Reference to the supported version the cluster runs.
    pub kubernetes_version_id: String,

    #[serde(default)]
    pub autoscaling: Autoscaling,

    /// CNI configuration reference. `None` means the default CNI is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni_config_id: Option<String>,

    #[serde(default)]
    state: ClusterState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,

    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<DateTime<Utc>>,
}

impl Cluster {
    /// Create a cluster record in the `Created` state with one control node
    /// and one worker node.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kubernetes_version_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            account_id: String::new(),
            domain_id: String::new(),
            zone_id: String::new(),
            control_node_count: 1,
            node_count: 1,
            etcd_node_count: None,
            service_offerings: RoleRefs::default(),
            templates: RoleRefs::default(),
            network_id: None,
            kubernetes_version_id: kubernetes_version_id.into(),
            autoscaling: Autoscaling::default(),
            cni_config_id: None,
            state: ClusterState::Created,
            key_pair: None,
            endpoint: None,
            dashboard_url: None,
            created: Utc::now(),
            removed: None,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> ClusterState {
        self.state
    }

    /// Only the store applies validated transitions.
    pub(crate) const fn apply_state(&mut self, state: ClusterState) {
        self.state = state;
    }

    /// Total number of nodes: control + worker + etcd.
    pub fn total_node_count(&self) -> u64 {
        self.control_node_count + self.node_count + self.etcd_node_count.unwrap_or(0)
    }

    /// Desired node count for a role.
    pub fn node_count_for(&self, role: NodeRole) -> u64 {
        match role {
            NodeRole::Control => self.control_node_count,
            NodeRole::Worker => self.node_count,
            NodeRole::Etcd => self.etcd_node_count.unwrap_or(0),
        }
    }

    /// Validate a desired worker count against the autoscaling bounds.
    pub fn validate_worker_count(&self, size: u64) -> Result<()> {
        if size < 1 {
            return Err(KcoError::InvalidSize(format!(
                "cluster {} needs at least one worker node",
                self.name
            )));
        }
        if !self.autoscaling.enabled {
            return Ok(());
        }
        if let Some(min) = self.autoscaling.min_size
            && size < min
        {
            return Err(KcoError::InvalidSize(format!(
                "worker count {size} is below autoscaling minimum {min}"
            )));
        }
        if let Some(max) = self.autoscaling.max_size
            && size > max
        {
            return Err(KcoError::InvalidSize(format!(
                "worker count {size} is above autoscaling maximum {max}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A Kubernetes version the platform can deploy.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesVersion {
    pub id: String,
    pub name: String,
    /// Semantic version, e.g. `1.20.0`.
    pub semantic_version: String,
    /// Bootstrap ISO carrying the binaries for this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_id: Option<String>,
}
