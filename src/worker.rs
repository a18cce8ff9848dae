//! Action workers.
//!
//! One worker per requested operation. Every worker follows the same
//! skeleton: resolve the cluster and check preconditions, enter the
//! in-progress state through [`Operation::begin`], run the body, then leave
//! it through [`Operation::finish`], which emits the outcome event and
//! cleans up bootstrap media on failure.

pub mod create;
pub mod delete;
pub mod scale;
pub mod upgrade;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::bootstrap::{self, BootstrapMedia};
use crate::error::{KcoError, Result};
use crate::membership::MembershipMapper;
use crate::metrics::Metrics;
use crate::model::{Cluster, ClusterEvent, ManagementEndpoint, NodeMapping, NodeRole, Vm};
use crate::remote::kubectl;
use crate::remote::{self, RemoteShell, SshTarget, Timeouts};
use crate::retry::{self, Deadline, RetryPolicy};
use crate::state;
use crate::store::{ClusterStore, InventoryStore, NodeMappingStore, Provisioner, VmRegistry};

/// Default retries after the first attempt of a remote call.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default interval between polls of node state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Policy values shared by all workers.
#[derive(Clone, Debug)]
pub struct OperationSettings {
    pub retries: u32,
    pub create_timeout: Duration,
    pub scale_timeout: Duration,
    pub upgrade_timeout: Duration,
    pub delete_timeout: Duration,
    pub poll_interval: Duration,
    /// Login user on cluster nodes.
    pub ssh_user: String,
    pub ssh_key: Option<PathBuf>,
    /// Directory holding node scripts such as the upgrade script.
    pub scripts_dir: PathBuf,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            create_timeout: Duration::from_secs(3600),
            scale_timeout: Duration::from_secs(3600),
            upgrade_timeout: Duration::from_secs(600),
            delete_timeout: Duration::from_secs(600),
            poll_interval: DEFAULT_POLL_INTERVAL,
            ssh_user: "cloud".to_string(),
            ssh_key: None,
            scripts_dir: PathBuf::from("/usr/share/kco/scripts"),
        }
    }
}

impl OperationSettings {
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries)
    }
}

/// Collaborators and settings a worker runs with.
#[derive(Clone)]
pub struct WorkerContext {
    pub clusters: Arc<dyn ClusterStore>,
    pub mappings: Arc<dyn NodeMappingStore>,
    pub registry: Arc<dyn VmRegistry>,
    pub provisioner: Arc<dyn Provisioner>,
    pub media: Arc<dyn BootstrapMedia>,
    pub shell: Arc<dyn RemoteShell>,
    pub settings: OperationSettings,
    pub metrics: Metrics,
}

impl WorkerContext {
    /// Context where the inventory store provides every collaborator except
    /// the remote shell.
    pub fn with_inventory(
        store: Arc<InventoryStore>,
        shell: Arc<dyn RemoteShell>,
        settings: OperationSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            clusters: store.clone(),
            mappings: store.clone(),
            registry: store.clone(),
            provisioner: store.clone(),
            media: store,
            shell,
            settings,
            metrics,
        }
    }

    pub fn membership(&self) -> MembershipMapper<'_> {
        MembershipMapper::new(self.mappings.as_ref(), self.registry.as_ref())
    }

    pub async fn load_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        self.clusters
            .find_cluster(cluster_id)
            .await?
            .ok_or_else(|| KcoError::ClusterNotFound(cluster_id.to_string()))
    }

    /// Management endpoint of the cluster; a cluster without one cannot be
    /// operated on remotely.
    pub async fn require_endpoint(&self, cluster: &Cluster) -> Result<ManagementEndpoint> {
        self.registry
            .management_endpoint(cluster)
            .await?
            .ok_or_else(|| {
                KcoError::precondition(&cluster.name, "unable to retrieve associated public IP")
            })
    }

    pub fn ssh_target(&self, host: impl Into<String>, port: u16) -> SshTarget {
        SshTarget::new(host, port, self.settings.ssh_user.clone())
            .with_key(self.settings.ssh_key.clone())
    }

    /// Shell on the control node, where cluster-management commands run.
    pub fn control_target(&self, endpoint: &ManagementEndpoint) -> SshTarget {
        self.ssh_target(endpoint.address.clone(), endpoint.ssh_port)
    }
}

/// Kind of a cluster operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Scale,
    Upgrade,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Scale => "scale",
            Self::Upgrade => "upgrade",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation that holds its cluster in an in-progress state.
pub struct Operation {
    kind: OperationKind,
    cluster: Cluster,
    deadline: Deadline,
    started: std::time::Instant,
    /// VMs that may carry bootstrap media and must be cleaned up on failure.
    media_vms: Vec<Vm>,
}

impl Operation {
    /// Emit `requested` and start the operation clock.
    ///
    /// Fails with [`KcoError::IllegalTransition`] or
    /// [`KcoError::StateConflict`] if another operation holds the cluster.
    pub async fn begin(
        ctx: &WorkerContext,
        kind: OperationKind,
        cluster_id: &str,
        requested: ClusterEvent,
        timeout: Duration,
    ) -> Result<Self> {
        let cluster = state::transit(ctx.clusters.as_ref(), cluster_id, requested).await?;
        info!(
            cluster = %cluster,
            operation = %kind,
            timeout_secs = timeout.as_secs(),
            "Started cluster operation"
        );
        Ok(Self {
            kind,
            cluster,
            deadline: Deadline::after(timeout),
            started: std::time::Instant::now(),
            media_vms: Vec::new(),
        })
    }

    pub const fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub const fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Remember VMs whose media must be detached if the operation fails.
    pub fn track_media(&mut self, vms: impl IntoIterator<Item = Vm>) {
        for vm in vms {
            if !self.media_vms.iter().any(|v| v.id == vm.id) {
                self.media_vms.push(vm);
            }
        }
    }

    /// Leave the in-progress state according to `outcome`.
    ///
    /// On failure, media is detached from every tracked VM, the failure event
    /// is emitted, and the body error is returned wrapped in
    /// [`KcoError::OperationFailed`]. A success that cannot be recorded is
    /// turned into `OperationFailed` as well.
    pub async fn finish<T>(self, ctx: &WorkerContext, outcome: Result<T>) -> Result<T> {
        let elapsed = self.started.elapsed();
        let cluster_name = self.cluster.name.clone();

        match outcome {
            Ok(value) => {
                let finished = state::transit(
                    ctx.clusters.as_ref(),
                    &self.cluster.id,
                    ClusterEvent::OperationSucceeded,
                )
                .await;
                ctx.metrics.record_operation(
                    &cluster_name,
                    self.kind.as_str(),
                    finished.is_ok(),
                    elapsed,
                );
                if let Err(e) = finished {
                    error!(
                        cluster = %self.cluster,
                        operation = %self.kind,
                        error = %e,
                        "Failed to record operation success"
                    );
                    self.emit_failure(ctx, ClusterEvent::OperationFailed).await;
                    return Err(self.wrap(e));
                }
                info!(
                    cluster = %self.cluster,
                    operation = %self.kind,
                    elapsed_secs = elapsed.as_secs(),
                    "Cluster operation succeeded"
                );
                Ok(value)
            }
            Err(e) => {
                error!(
                    cluster = %self.cluster,
                    operation = %self.kind,
                    error = %e,
                    "Cluster operation failed"
                );
                bootstrap::detach_all(ctx.media.as_ref(), &self.media_vms).await;

                self.emit_failure(ctx, failure_event(self.kind, &e)).await;
                ctx.metrics
                    .record_operation(&cluster_name, self.kind.as_str(), false, elapsed);
                Err(self.wrap(e))
            }
        }
    }

    /// Best effort: a cluster that cannot be moved out of its in-progress
    /// state is logged and left for an operator.
    async fn emit_failure(&self, ctx: &WorkerContext, event: ClusterEvent) {
        if let Err(e) = state::transit(ctx.clusters.as_ref(), &self.cluster.id, event).await {
            error!(
                cluster = %self.cluster,
                event = %event,
                error = %e,
                "Failed to record operation failure"
            );
        }
    }

    fn wrap(&self, source: KcoError) -> KcoError {
        KcoError::OperationFailed {
            operation: self.kind.as_str(),
            cluster: self.cluster.name.clone(),
            source: Box::new(source),
        }
    }
}

/// A create that fails while VMs are still being provisioned ends in
/// `Error`; every other failure ends in `Alert`.
fn failure_event(kind: OperationKind, error: &KcoError) -> ClusterEvent {
    match (kind, error) {
        (OperationKind::Create, KcoError::Provisioning(_)) => ClusterEvent::CreateFailed,
        _ => ClusterEvent::OperationFailed,
    }
}

/// Map freshly provisioned VMs to `cluster` under `role`.
///
/// If a mapping fails, the VMs not yet mapped are destroyed before the error
/// is returned. Mapped VMs stay with the cluster and go away on delete.
pub(crate) async fn map_provisioned(
    ctx: &WorkerContext,
    cluster: &Cluster,
    role: NodeRole,
    vms: &[Vm],
) -> Result<()> {
    for (i, vm) in vms.iter().enumerate() {
        let mapping = NodeMapping::new(&cluster.id, &vm.id, role);
        if let Err(e) = ctx.mappings.add_mapping(mapping).await {
            for unmapped in &vms[i..] {
                if let Err(de) = ctx.provisioner.destroy(unmapped).await {
                    warn!(
                        cluster = %cluster,
                        vm = %unmapped,
                        error = %de,
                        "Failed to release unmapped VM"
                    );
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Drain a node from the control node, retried within the operation budget.
pub(crate) async fn drain_node(
    ctx: &WorkerContext,
    op: &Operation,
    control: &SshTarget,
    vm: &Vm,
) -> Result<()> {
    let node_name = vm.node_name();
    let command = kubectl::drain(&node_name);
    let command = command.as_str();
    let step = format!("drain of node {node_name}");

    retry::retry_with_deadline(
        ctx.settings.retry_policy(),
        op.deadline(),
        &step,
        move |attempt| {
            if attempt > 1 {
                ctx.metrics.record_retry(&op.cluster().name, "drain");
            }
            remote::run_checked(ctx.shell.as_ref(), control, command, &Timeouts::COMMAND)
        },
    )
    .await?;
    info!(cluster = %op.cluster(), node = %node_name, "Drained node");
    Ok(())
}

/// Wait until at least `expected` nodes report Ready.
pub(crate) async fn wait_for_ready_nodes(
    ctx: &WorkerContext,
    op: &Operation,
    control: &SshTarget,
    expected: u64,
) -> Result<()> {
    let command = kubectl::list_nodes();
    let command = command.as_str();
    let ready = retry::poll_until(
        op.deadline(),
        ctx.settings.poll_interval,
        "cluster node readiness",
        move || async move {
            let output =
                remote::run_checked(ctx.shell.as_ref(), control, command, &Timeouts::COMMAND)
                    .await?;
            let count = kubectl::count_ready_nodes(&output) as u64;
            if count < expected {
                warn!(
                    cluster = %op.cluster(),
                    ready = count,
                    expected = expected,
                    "Waiting for cluster nodes to become Ready"
                );
            }
            Ok(count >= expected)
        },
    )
    .await?;

    if !ready {
        return Err(KcoError::Verification(format!(
            "{expected} nodes did not become Ready before the deadline"
        )));
    }
    Ok(())
}
