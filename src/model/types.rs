//! Enum types for cluster lifecycle states, events, node roles and hypervisors.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a Kubernetes cluster.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClusterState {
    #[default]
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Scaling,
    Upgrading,
    Alert,
    Recovering,
    Destroying,
    Destroyed,
    Error,
}

impl ClusterState {
    /// States held by an active operation. Entering one of these is the
    /// per-cluster lock.
    pub const fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Starting
                | Self::Stopping
                | Self::Scaling
                | Self::Upgrading
                | Self::Recovering
                | Self::Destroying
        )
    }

    /// States no event can leave.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Scaling => write!(f, "Scaling"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::Alert => write!(f, "Alert"),
            Self::Recovering => write!(f, "Recovering"),
            Self::Destroying => write!(f, "Destroying"),
            Self::Destroyed => write!(f, "Destroyed"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Named event driving a cluster state transition.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    StartRequested,
    StopRequested,
    ScaleUpRequested,
    ScaleDownRequested,
    UpgradeRequested,
    DestroyRequested,
    RecoveryRequested,
    OperationSucceeded,
    OperationFailed,
    CreateFailed,
    FaultsDetected,
}

impl std::fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartRequested => write!(f, "StartRequested"),
            Self::StopRequested => write!(f, "StopRequested"),
            Self::ScaleUpRequested => write!(f, "ScaleUpRequested"),
            Self::ScaleDownRequested => write!(f, "ScaleDownRequested"),
            Self::UpgradeRequested => write!(f, "UpgradeRequested"),
            Self::DestroyRequested => write!(f, "DestroyRequested"),
            Self::RecoveryRequested => write!(f, "RecoveryRequested"),
            Self::OperationSucceeded => write!(f, "OperationSucceeded"),
            Self::OperationFailed => write!(f, "OperationFailed"),
            Self::CreateFailed => write!(f, "CreateFailed"),
            Self::FaultsDetected => write!(f, "FaultsDetected"),
        }
    }
}

/// Role a VM plays inside a cluster.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Control,
    Etcd,
    Worker,
}

impl NodeRole {
    /// Position of the role in upgrade/addressing order.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Control => 0,
            Self::Etcd => 1,
            Self::Worker => 2,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Etcd => write!(f, "etcd"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Hypervisor hosting a VM.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HypervisorType {
    #[default]
    KVM,
    VMware,
    XenServer,
    Hyperv,
    Simulator,
}
