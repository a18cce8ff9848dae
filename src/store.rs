//! Collaborator interfaces the orchestrator depends on.
//!
//! The platform owns persistence, the VM registry and provisioning. Workers
//! only see these traits; [`inventory::InventoryStore`] implements all of them
//! on top of an inventory document kept in memory or in a YAML file.

pub mod inventory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Cluster, KubernetesVersion, ManagementEndpoint, NodeMapping, NodeRole, Vm};
use crate::state::Transition;

pub use inventory::{Inventory, InventoryStore};

/// Persistence of cluster records and supported versions.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn find_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>>;

    async fn find_version(&self, version_id: &str) -> Result<Option<KubernetesVersion>>;

    /// Atomically set the state to `transition.to` if it still equals
    /// `transition.from`, and record the transition. Fails with
    /// [`crate::error::KcoError::StateConflict`] otherwise.
    async fn apply_transition(&self, cluster_id: &str, transition: &Transition)
    -> Result<Cluster>;

    async fn update_version(&self, cluster_id: &str, version_id: &str) -> Result<()>;

    async fn update_node_count(&self, cluster_id: &str, node_count: u64) -> Result<()>;

    async fn update_endpoint(&self, cluster_id: &str, endpoint: &str) -> Result<()>;

    async fn mark_removed(&self, cluster_id: &str) -> Result<()>;
}

/// Persistence of VM-to-cluster memberships.
#[async_trait]
pub trait NodeMappingStore: Send + Sync {
    /// Mappings of a cluster in the order they were created.
    async fn list_mappings(&self, cluster_id: &str) -> Result<Vec<NodeMapping>>;

    async fn find_mapping(&self, vm_id: &str) -> Result<Option<NodeMapping>>;

    async fn add_mapping(&self, mapping: NodeMapping) -> Result<()>;

    async fn remove_mapping(&self, vm_id: &str) -> Result<()>;
}

/// Read access to VMs and the network addressing of a cluster.
#[async_trait]
pub trait VmRegistry: Send + Sync {
    async fn find_vm(&self, vm_id: &str) -> Result<Option<Vm>>;

    /// Public address and SSH port of the cluster, if one is assigned.
    async fn management_endpoint(&self, cluster: &Cluster) -> Result<Option<ManagementEndpoint>>;
}

/// "Give me N running VMs with network access".
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, cluster: &Cluster, role: NodeRole, count: u64) -> Result<Vec<Vm>>;

    async fn destroy(&self, vm: &Vm) -> Result<()>;
}
