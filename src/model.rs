//! Domain records: clusters, versions, VMs and node mappings.

pub mod cluster;
pub mod node;
pub mod types;

pub use cluster::{Autoscaling, Cluster, KubernetesVersion, RoleRefs};
pub use node::{DEFAULT_SSH_PORT, ManagementEndpoint, NodeMapping, Vm};
pub use types::{ClusterEvent, ClusterState, HypervisorType, NodeRole};
