//! VM, node-mapping and management-endpoint records.

use serde::{Deserialize, Serialize};

use super::types::{HypervisorType, NodeRole};

/// Default SSH port. When the management endpoint uses it, nodes other than
/// the first are reached directly on their private address.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Registry view of a VM.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub id: String,
    pub host_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub hypervisor: HypervisorType,
}

impl Vm {
    /// Kubernetes node name for this VM (host names are registered lowercase).
    pub fn node_name(&self) -> String {
        self.host_name.to_lowercase()
    }

    pub fn is_vmware(&self) -> bool {
        self.hypervisor == HypervisorType::VMware
    }
}

impl std::fmt::Display for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.host_name)
        } else {
            write!(f, "{}", self.display_name)
        }
    }
}

/// Membership of a VM in a cluster.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeMapping {
    pub cluster_id: String,
    pub vm_id: String,
    pub role: NodeRole,
    /// Operator opted this node out of automated upgrades.
    #[serde(default)]
    pub manual_upgrade: bool,
}

impl NodeMapping {
    pub fn new(cluster_id: impl Into<String>, vm_id: impl Into<String>, role: NodeRole) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            vm_id: vm_id.into(),
            role,
            manual_upgrade: false,
        }
    }
}

/// Public address and SSH port through which a cluster is managed.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagementEndpoint {
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

const fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl ManagementEndpoint {
    pub fn new(address: impl Into<String>, ssh_port: u16) -> Self {
        Self {
            address: address.into(),
            ssh_port,
        }
    }

    /// True when node SSH ports are forwarded from one shared address.
    pub const fn is_multiplexed(&self) -> bool {
        self.ssh_port != DEFAULT_SSH_PORT
    }

    /// Host and port reaching the node at `index` in membership order.
    ///
    /// Multiplexed: shared address, port `base + index`. Direct: the control
    /// node (index 0) on the shared address, every other node on its own
    /// private address, port 22.
    pub fn node_address(&self, vm: &Vm, index: usize) -> (String, u16) {
        if self.is_multiplexed() {
            let offset = u16::try_from(index).unwrap_or(u16::MAX);
            return (self.address.clone(), self.ssh_port.saturating_add(offset));
        }
        if index == 0 {
            return (self.address.clone(), self.ssh_port);
        }
        let host = vm
            .private_ip
            .clone()
            .unwrap_or_else(|| self.address.clone());
        (host, self.ssh_port)
    }
}
