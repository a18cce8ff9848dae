//! Bootstrap media delivery.
//!
//! Cluster nodes read version binaries and bootstrap parameters from a
//! removable medium attached to the VM. Media is attached for the duration of
//! an operation and detached afterwards, on success and on failure alike.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{Cluster, KubernetesVersion, Vm};

/// Parameters carried on the bootstrap medium.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapParameters {
    pub cluster_id: String,
    pub version_id: String,
    pub semantic_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_id: Option<String>,
}

impl BootstrapParameters {
    pub fn new(cluster: &Cluster, version: &KubernetesVersion) -> Self {
        Self {
            cluster_id: cluster.id.clone(),
            version_id: version.id.clone(),
            semantic_version: version.semantic_version.clone(),
            iso_id: version.iso_id.clone(),
        }
    }
}

/// Attaches and detaches bootstrap media on VMs.
#[async_trait]
pub trait BootstrapMedia: Send + Sync {
    async fn attach(&self, vm: &Vm, params: &BootstrapParameters) -> Result<()>;

    /// Detaching a VM that has no medium attached succeeds without effect.
    async fn detach(&self, vm: &Vm) -> Result<()>;
}

/// Attach media to every VM, stopping at the first failure.
pub async fn attach_all(
    media: &dyn BootstrapMedia,
    vms: &[Vm],
    params: &BootstrapParameters,
) -> Result<()> {
    for vm in vms {
        debug!(vm = %vm, version = %params.semantic_version, "Attaching bootstrap media");
        media.attach(vm, params).await?;
    }
    info!(
        cluster_id = %params.cluster_id,
        vm_count = vms.len(),
        version = %params.semantic_version,
        "Attached bootstrap media"
    );
    Ok(())
}

/// Detach media from every VM. Failures are logged and counted, never raised,
/// so cleanup always visits all VMs.
pub async fn detach_all(media: &dyn BootstrapMedia, vms: &[Vm]) -> usize {
    let mut failures = 0;
    for vm in vms {
        if let Err(e) = media.detach(vm).await {
            failures += 1;
            warn!(vm = %vm, error = %e, "Failed to detach bootstrap media");
        }
    }
    debug!(
        vm_count = vms.len(),
        failures = failures,
        "Detached bootstrap media"
    );
    failures
}
