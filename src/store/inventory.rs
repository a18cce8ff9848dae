//! Inventory-backed implementation of the collaborator traits.
//!
//! One document holds clusters, versions, VMs, memberships, endpoints,
//! attached media and the transition log. It lives in memory, optionally
//! mirrored to a YAML file that is rewritten after every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ClusterStore, NodeMappingStore, Provisioner, VmRegistry};
use crate::bootstrap::{BootstrapMedia, BootstrapParameters};
use crate::error::{KcoError, Result};
use crate::model::{Cluster, KubernetesVersion, ManagementEndpoint, NodeMapping, NodeRole, Vm};
use crate::state::{Transition, TransitionRecord};

/// Serializable inventory document.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub versions: Vec<KubernetesVersion>,
    #[serde(default)]
    pub vms: Vec<Vm>,
    #[serde(default)]
    pub mappings: Vec<NodeMapping>,
    /// Management endpoint per cluster id.
    #[serde(default)]
    pub endpoints: BTreeMap<String, ManagementEndpoint>,
    /// VM id to the cluster id it has been handed out to.
    #[serde(default)]
    pub allocations: BTreeMap<String, String>,
    /// VM id to the bootstrap parameters currently attached.
    #[serde(default)]
    pub attached_media: BTreeMap<String, BootstrapParameters>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl Inventory {
    fn cluster_mut(&mut self, cluster_id: &str) -> Result<&mut Cluster> {
        self.clusters
            .iter_mut()
            .find(|c| c.id == cluster_id)
            .ok_or_else(|| KcoError::ClusterNotFound(cluster_id.to_string()))
    }
}

/// Inventory store, in memory or mirrored to a YAML file.
pub struct InventoryStore {
    path: Option<PathBuf>,
    inner: Mutex<Inventory>,
}

impl InventoryStore {
    /// Keep the inventory in memory only.
    pub fn in_memory(inventory: Inventory) -> Self {
        Self {
            path: None,
            inner: Mutex::new(inventory),
        }
    }

    /// Load the inventory from a YAML file and persist changes back to it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = tokio::fs::read_to_string(&path).await?;
        let inventory: Inventory = serde_yaml::from_str(&content).map_err(|e| {
            KcoError::Persistence(format!("Failed to parse {}: {e}", path.display()))
        })?;
        info!(
            path = %path.display(),
            clusters = inventory.clusters.len(),
            vms = inventory.vms.len(),
            "Loaded inventory"
        );
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(inventory),
        })
    }

    /// Copy of the current inventory document.
    pub async fn snapshot(&self) -> Inventory {
        self.inner.lock().await.clone()
    }

    /// Run `f` on a copy of the locked inventory, persist the copy, then
    /// make it current.
    ///
    /// A failing `f` or a failed write leaves the inventory untouched.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Inventory) -> Result<T>) -> Result<T> {
        let mut current = self.inner.lock().await;
        let mut next = current.clone();
        let value = f(&mut next)?;
        self.persist(&next).await?;
        *current = next;
        Ok(value)
    }

    async fn persist(&self, inventory: &Inventory) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_yaml::to_string(inventory)
            .map_err(|e| KcoError::Persistence(format!("Failed to serialize inventory: {e}")))?;

        // Write-then-rename: the file on disk is always a complete inventory.
        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Persisted inventory");
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for InventoryStore {
    async fn find_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        let inventory = self.inner.lock().await;
        Ok(inventory.clusters.iter().find(|c| c.id == cluster_id).cloned())
    }

    async fn find_version(&self, version_id: &str) -> Result<Option<KubernetesVersion>> {
        let inventory = self.inner.lock().await;
        Ok(inventory
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .cloned())
    }

    async fn apply_transition(
        &self,
        cluster_id: &str,
        transition: &Transition,
    ) -> Result<Cluster> {
        self.mutate(|inventory| {
            let cluster = inventory.cluster_mut(cluster_id)?;
            if cluster.state() != transition.from {
                return Err(KcoError::StateConflict {
                    cluster: cluster_id.to_string(),
                    expected: transition.from,
                    actual: cluster.state(),
                });
            }
            cluster.apply_state(transition.to);
            let updated = cluster.clone();
            inventory.transitions.push(TransitionRecord {
                cluster_id: cluster_id.to_string(),
                event: transition.event,
                from: transition.from,
                to: transition.to,
                at: Utc::now(),
            });
            Ok(updated)
        })
        .await
    }

    async fn update_version(&self, cluster_id: &str, version_id: &str) -> Result<()> {
        self.mutate(|inventory| {
            if !inventory.versions.iter().any(|v| v.id == version_id) {
                return Err(KcoError::VersionNotFound(version_id.to_string()));
            }
            inventory.cluster_mut(cluster_id)?.kubernetes_version_id = version_id.to_string();
            Ok(())
        })
        .await
    }

    async fn update_node_count(&self, cluster_id: &str, node_count: u64) -> Result<()> {
        self.mutate(|inventory| {
            inventory.cluster_mut(cluster_id)?.node_count = node_count;
            Ok(())
        })
        .await
    }

    async fn update_endpoint(&self, cluster_id: &str, endpoint: &str) -> Result<()> {
        self.mutate(|inventory| {
            inventory.cluster_mut(cluster_id)?.endpoint = Some(endpoint.to_string());
            Ok(())
        })
        .await
    }

    async fn mark_removed(&self, cluster_id: &str) -> Result<()> {
        self.mutate(|inventory| {
            inventory.cluster_mut(cluster_id)?.removed = Some(Utc::now());
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl NodeMappingStore for InventoryStore {
    async fn list_mappings(&self, cluster_id: &str) -> Result<Vec<NodeMapping>> {
        let inventory = self.inner.lock().await;
        Ok(inventory
            .mappings
            .iter()
            .filter(|m| m.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    async fn find_mapping(&self, vm_id: &str) -> Result<Option<NodeMapping>> {
        let inventory = self.inner.lock().await;
        Ok(inventory.mappings.iter().find(|m| m.vm_id == vm_id).cloned())
    }

    async fn add_mapping(&self, mapping: NodeMapping) -> Result<()> {
        self.mutate(|inventory| {
            if let Some(existing) = inventory.mappings.iter().find(|m| m.vm_id == mapping.vm_id) {
                return Err(KcoError::Persistence(format!(
                    "VM {} already belongs to cluster {}",
                    mapping.vm_id, existing.cluster_id
                )));
            }
            inventory.mappings.push(mapping);
            Ok(())
        })
        .await
    }

    async fn remove_mapping(&self, vm_id: &str) -> Result<()> {
        self.mutate(|inventory| {
            inventory.mappings.retain(|m| m.vm_id != vm_id);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl VmRegistry for InventoryStore {
    async fn find_vm(&self, vm_id: &str) -> Result<Option<Vm>> {
        let inventory = self.inner.lock().await;
        Ok(inventory.vms.iter().find(|v| v.id == vm_id).cloned())
    }

    async fn management_endpoint(&self, cluster: &Cluster) -> Result<Option<ManagementEndpoint>> {
        let inventory = self.inner.lock().await;
        Ok(inventory.endpoints.get(&cluster.id).cloned())
    }
}

/// Hands out pre-registered VMs that are neither mapped nor allocated.
#[async_trait]
impl Provisioner for InventoryStore {
    async fn provision(&self, cluster: &Cluster, role: NodeRole, count: u64) -> Result<Vec<Vm>> {
        self.mutate(|inventory| {
            let wanted = usize::try_from(count)
                .map_err(|_| KcoError::Provisioning(format!("cannot provision {count} VMs")))?;
            let free: Vec<Vm> = inventory
                .vms
                .iter()
                .filter(|vm| {
                    !inventory.allocations.contains_key(&vm.id)
                        && !inventory.mappings.iter().any(|m| m.vm_id == vm.id)
                })
                .take(wanted)
                .cloned()
                .collect();

            if free.len() < wanted {
                return Err(KcoError::Provisioning(format!(
                    "cluster {} needs {wanted} {role} VMs, only {} available",
                    cluster.name,
                    free.len()
                )));
            }
            for vm in &free {
                inventory
                    .allocations
                    .insert(vm.id.clone(), cluster.id.clone());
            }
            Ok(free)
        })
        .await
    }

    async fn destroy(&self, vm: &Vm) -> Result<()> {
        self.mutate(|inventory| {
            inventory.allocations.remove(&vm.id);
            inventory.attached_media.remove(&vm.id);
            inventory.vms.retain(|v| v.id != vm.id);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BootstrapMedia for InventoryStore {
    async fn attach(&self, vm: &Vm, params: &BootstrapParameters) -> Result<()> {
        self.mutate(|inventory| {
            if !inventory.vms.iter().any(|v| v.id == vm.id) {
                return Err(KcoError::Media {
                    vm: vm.id.clone(),
                    message: "VM is not registered".to_string(),
                });
            }
            inventory
                .attached_media
                .insert(vm.id.clone(), params.clone());
            Ok(())
        })
        .await
    }

    async fn detach(&self, vm: &Vm) -> Result<()> {
        self.mutate(|inventory| {
            inventory.attached_media.remove(&vm.id);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterEvent, ClusterState, HypervisorType};

    fn vm(id: &str) -> Vm {
        Vm {
            id: id.to_string(),
            host_name: id.to_string(),
            display_name: String::new(),
            private_ip: None,
            public_ip: None,
            hypervisor: HypervisorType::KVM,
        }
    }

    fn version(id: &str, semantic_version: &str) -> KubernetesVersion {
        KubernetesVersion {
            id: id.to_string(),
            name: semantic_version.to_string(),
            semantic_version: semantic_version.to_string(),
            iso_id: None,
        }
    }

    fn store() -> InventoryStore {
        InventoryStore::in_memory(Inventory {
            clusters: vec![Cluster::new("c-1", "prod", "v-1")],
            versions: vec![version("v-1", "1.20.0"), version("v-2", "1.21.0")],
            vms: vec![vm("a"), vm("b"), vm("c")],
            ..Default::default()
        })
    }

    fn start() -> Transition {
        Transition {
            event: ClusterEvent::StartRequested,
            from: ClusterState::Created,
            to: ClusterState::Starting,
        }
    }

    #[tokio::test]
    async fn test_apply_transition_records_history() {
        let store = store();
        let cluster = store.apply_transition("c-1", &start()).await.unwrap();
        assert_eq!(cluster.state(), ClusterState::Starting);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.transitions.len(), 1);
        assert_eq!(snapshot.transitions[0].event, ClusterEvent::StartRequested);
    }

    #[tokio::test]
    async fn test_apply_transition_compare_and_swap() {
        let store = store();
        store.apply_transition("c-1", &start()).await.unwrap();

        // Second writer still believes the cluster is Created
        let err = store.apply_transition("c-1", &start()).await.unwrap_err();
        assert!(matches!(
            err,
            KcoError::StateConflict {
                expected: ClusterState::Created,
                actual: ClusterState::Starting,
                ..
            }
        ));
        assert_eq!(store.snapshot().await.transitions.len(), 1);
    }

    #[tokio::test]
    async fn test_update_version_requires_known_version() {
        let store = store();
        assert!(matches!(
            store.update_version("c-1", "v-missing").await,
            Err(KcoError::VersionNotFound(_))
        ));
        store.update_version("c-1", "v-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_provision_hands_out_distinct_free_vms() {
        let store = store();
        let cluster = store.find_cluster("c-1").await.unwrap().unwrap();

        let control = store.provision(&cluster, NodeRole::Control, 1).await.unwrap();
        let workers = store.provision(&cluster, NodeRole::Worker, 2).await.unwrap();
        assert_eq!(control[0].id, "a");
        assert_eq!(workers.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(), ["b", "c"]);

        let err = store.provision(&cluster, NodeRole::Worker, 1).await.unwrap_err();
        assert!(matches!(err, KcoError::Provisioning(_)));
    }

    #[tokio::test]
    async fn test_add_mapping_rejects_vm_in_other_cluster() {
        let store = store();
        store
            .add_mapping(NodeMapping::new("c-1", "a", NodeRole::Control))
            .await
            .unwrap();
        assert!(
            store
                .add_mapping(NodeMapping::new("c-2", "a", NodeRole::Worker))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        let inventory = store().snapshot().await;
        std::fs::write(&path, serde_yaml::to_string(&inventory).unwrap()).unwrap();

        let store = InventoryStore::open(&path).await.unwrap();
        store.apply_transition("c-1", &start()).await.unwrap();
        store.update_endpoint("c-1", "https://203.0.113.10:6443/").await.unwrap();

        let reopened = InventoryStore::open(&path).await.unwrap();
        let cluster = reopened.find_cluster("c-1").await.unwrap().unwrap();
        assert_eq!(cluster.state(), ClusterState::Starting);
        assert_eq!(cluster.endpoint.as_deref(), Some("https://203.0.113.10:6443/"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_inventory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        let inventory = store().snapshot().await;
        std::fs::write(&path, serde_yaml::to_string(&inventory).unwrap()).unwrap();
        let store = InventoryStore::open(&path).await.unwrap();

        // A directory in place of the temp file makes the next write fail
        let blocker = dir.path().join("inventory.yaml.tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(store.update_version("c-1", "v-2").await.is_err());
        assert!(store.apply_transition("c-1", &start()).await.is_err());

        let cluster = store.find_cluster("c-1").await.unwrap().unwrap();
        assert_eq!(cluster.kubernetes_version_id, "v-1");
        assert_eq!(cluster.state(), ClusterState::Created);
        assert!(store.snapshot().await.transitions.is_empty());

        std::fs::remove_dir(&blocker).unwrap();
        store.apply_transition("c-1", &start()).await.unwrap();

        let reopened = InventoryStore::open(&path).await.unwrap();
        let cluster = reopened.find_cluster("c-1").await.unwrap().unwrap();
        assert_eq!(cluster.state(), ClusterState::Starting);
        assert_eq!(cluster.kubernetes_version_id, "v-1");
    }
}
