//! Node membership mapper: which VMs form a cluster, in which role, and
//! which of them the operator keeps out of automated upgrades.

use tracing::debug;

use crate::error::{KcoError, Result};
use crate::model::{NodeMapping, Vm};
use crate::store::{NodeMappingStore, VmRegistry};

/// A cluster member with its position in membership order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterVm {
    pub vm: Vm,
    pub mapping: NodeMapping,
    /// Position in the unfiltered membership order. Drives SSH addressing.
    pub index: usize,
}

impl ClusterVm {
    pub const fn is_manual_upgrade(&self) -> bool {
        self.mapping.manual_upgrade
    }
}

/// Membership lookups over the mapping store and the VM registry.
#[derive(Clone, Copy)]
pub struct MembershipMapper<'a> {
    mappings: &'a dyn NodeMappingStore,
    registry: &'a dyn VmRegistry,
}

impl<'a> MembershipMapper<'a> {
    pub fn new(mappings: &'a dyn NodeMappingStore, registry: &'a dyn VmRegistry) -> Self {
        Self { mappings, registry }
    }

    /// All members of a cluster: control nodes first, then etcd, then
    /// workers, each group in creation order.
    pub async fn cluster_vms(&self, cluster_id: &str) -> Result<Vec<ClusterVm>> {
        let mut mappings = self.mappings.list_mappings(cluster_id).await?;
        // Stable sort keeps creation order within a role.
        mappings.sort_by_key(|m| m.role.rank());

        let mut members = Vec::with_capacity(mappings.len());
        for (index, mapping) in mappings.into_iter().enumerate() {
            let vm = self
                .registry
                .find_vm(&mapping.vm_id)
                .await?
                .ok_or_else(|| KcoError::VmNotFound(mapping.vm_id.clone()))?;
            members.push(ClusterVm { vm, mapping, index });
        }

        debug!(
            cluster_id = %cluster_id,
            members = members.len(),
            "Resolved cluster membership"
        );
        Ok(members)
    }

    /// Membership of a single VM, if it belongs to any cluster.
    pub async fn find_membership(&self, vm_id: &str) -> Result<Option<NodeMapping>> {
        self.mappings.find_mapping(vm_id).await
    }

    /// True when the VM is opted out of automated upgrades. VMs outside any
    /// cluster are not.
    pub async fn is_manual_upgrade(&self, vm_id: &str) -> Result<bool> {
        Ok(self
            .find_membership(vm_id)
            .await?
            .is_some_and(|m| m.manual_upgrade))
    }
}

/// Members eligible for automated upgrade, order and indices preserved.
pub fn filter_manual_upgrade(members: &[ClusterVm]) -> Vec<ClusterVm> {
    members
        .iter()
        .filter(|m| {
            if m.is_manual_upgrade() {
                debug!(vm = %m.vm, "Skipping node opted out of automated upgrade");
                false
            } else {
                true
            }
        })
        .cloned()
        .collect()
}
