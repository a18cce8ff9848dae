//! Scale worker: changes the number of worker nodes.

use tracing::info;

use super::{Operation, OperationKind, WorkerContext};
use crate::bootstrap::{self, BootstrapParameters};
use crate::error::{KcoError, Result};
use crate::membership::ClusterVm;
use crate::model::{Cluster, ClusterEvent, KubernetesVersion, ManagementEndpoint, NodeRole};
use crate::remote::{self, SshTarget, Timeouts, kubectl};
use crate::retry;

/// Resize the worker pool of a running cluster to `size` nodes.
///
/// Scaling down removes the most recently added workers first.
pub async fn execute(ctx: &WorkerContext, cluster_id: &str, size: u64) -> Result<Cluster> {
    let cluster = ctx.load_cluster(cluster_id).await?;
    if size == cluster.node_count {
        return Err(KcoError::InvalidSize(format!(
            "cluster {} already has {size} worker nodes",
            cluster.name
        )));
    }
    cluster.validate_worker_count(size)?;
    let endpoint = ctx.require_endpoint(&cluster).await?;

    info!(
        cluster = %cluster,
        from = cluster.node_count,
        to = size,
        "Scaling Kubernetes cluster"
    );

    if size > cluster.node_count {
        scale_up(ctx, &cluster, &endpoint, size).await?;
    } else {
        scale_down(ctx, &cluster, &endpoint, size).await?;
    }
    ctx.load_cluster(cluster_id).await
}

async fn scale_up(
    ctx: &WorkerContext,
    cluster: &Cluster,
    endpoint: &ManagementEndpoint,
    size: u64,
) -> Result<()> {
    let version = ctx
        .clusters
        .find_version(&cluster.kubernetes_version_id)
        .await?
        .ok_or_else(|| KcoError::VersionNotFound(cluster.kubernetes_version_id.clone()))?;

    let mut op = Operation::begin(
        ctx,
        OperationKind::Scale,
        &cluster.id,
        ClusterEvent::ScaleUpRequested,
        ctx.settings.scale_timeout,
    )
    .await?;
    let outcome = add_workers(ctx, &mut op, &version, endpoint, size).await;
    op.finish(ctx, outcome).await
}

async fn add_workers(
    ctx: &WorkerContext,
    op: &mut Operation,
    version: &KubernetesVersion,
    endpoint: &ManagementEndpoint,
    size: u64,
) -> Result<()> {
    let cluster = op.cluster().clone();
    let delta = size - cluster.node_count;

    let vms = ctx
        .provisioner
        .provision(&cluster, NodeRole::Worker, delta)
        .await?;
    super::map_provisioned(ctx, &cluster, NodeRole::Worker, &vms).await?;
    op.deadline().ensure("provisioning of worker nodes")?;

    op.track_media(vms.iter().cloned());
    let params = BootstrapParameters::new(&cluster, version);
    bootstrap::attach_all(ctx.media.as_ref(), &vms, &params).await?;

    let expected = cluster.total_node_count() + delta;
    let control = ctx.control_target(endpoint);
    super::wait_for_ready_nodes(ctx, op, &control, expected).await?;
    bootstrap::detach_all(ctx.media.as_ref(), &vms).await;

    ctx.clusters.update_node_count(&cluster.id, size).await?;
    info!(cluster = %cluster, added = vms.len(), node_count = size, "Added worker nodes");
    Ok(())
}

async fn scale_down(
    ctx: &WorkerContext,
    cluster: &Cluster,
    endpoint: &ManagementEndpoint,
    size: u64,
) -> Result<()> {
    let delta = usize::try_from(cluster.node_count - size)
        .map_err(|_| KcoError::InvalidSize(format!("cannot remove down to {size} nodes")))?;

    let workers: Vec<ClusterVm> = ctx
        .membership()
        .cluster_vms(&cluster.id)
        .await?
        .into_iter()
        .filter(|m| m.mapping.role == NodeRole::Worker)
        .collect();
    if workers.len() < delta {
        return Err(KcoError::precondition(
            &cluster.name,
            format!(
                "cannot remove {delta} worker nodes, only {} are mapped",
                workers.len()
            ),
        ));
    }
    // Newest first.
    let victims: Vec<ClusterVm> = workers.into_iter().rev().take(delta).collect();

    let op = Operation::begin(
        ctx,
        OperationKind::Scale,
        &cluster.id,
        ClusterEvent::ScaleDownRequested,
        ctx.settings.scale_timeout,
    )
    .await?;
    let outcome = remove_workers(ctx, &op, endpoint, &victims).await;
    op.finish(ctx, outcome).await
}

async fn remove_workers(
    ctx: &WorkerContext,
    op: &Operation,
    endpoint: &ManagementEndpoint,
    victims: &[ClusterVm],
) -> Result<()> {
    let control = ctx.control_target(endpoint);
    let mut node_count = op.cluster().node_count;
    for member in victims {
        let vm = &member.vm;
        super::drain_node(ctx, op, &control, vm).await?;
        delete_node(ctx, op, &control, &vm.node_name()).await?;

        ctx.provisioner.destroy(vm).await?;
        ctx.mappings.remove_mapping(&vm.id).await?;
        // The recorded count follows the mapped workers after every removal.
        node_count -= 1;
        ctx.clusters
            .update_node_count(&op.cluster().id, node_count)
            .await?;
        info!(cluster = %op.cluster(), vm = %vm, node_count, "Removed worker node");
    }
    Ok(())
}

async fn delete_node(
    ctx: &WorkerContext,
    op: &Operation,
    control: &SshTarget,
    node_name: &str,
) -> Result<()> {
    let command = kubectl::delete_node(node_name);
    let command = command.as_str();
    let shell = ctx.shell.as_ref();

    retry::retry_with_deadline(
        ctx.settings.retry_policy(),
        op.deadline(),
        &format!("removal of node {node_name}"),
        move |_| async move {
            remote::run_checked(shell, control, command, &Timeouts::COMMAND)
                .await
                .map(drop)
        },
    )
    .await
}
