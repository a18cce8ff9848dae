//! Delete worker: tears a cluster down and releases its VMs.

use tracing::{info, warn};

use super::{Operation, OperationKind, WorkerContext};
use crate::bootstrap;
use crate::error::Result;
use crate::membership::ClusterVm;
use crate::model::{Cluster, ClusterEvent, Vm};

/// Destroy a cluster and every VM mapped to it.
pub async fn execute(ctx: &WorkerContext, cluster_id: &str) -> Result<Cluster> {
    let cluster = ctx.load_cluster(cluster_id).await?;
    let members = ctx.membership().cluster_vms(&cluster.id).await?;
    info!(cluster = %cluster, nodes = members.len(), "Deleting Kubernetes cluster");

    let mut op = Operation::begin(
        ctx,
        OperationKind::Delete,
        &cluster.id,
        ClusterEvent::DestroyRequested,
        ctx.settings.delete_timeout,
    )
    .await?;
    op.track_media(members.iter().map(|m| m.vm.clone()));

    let outcome = destroy_members(ctx, &op, &members).await;
    op.finish(ctx, outcome).await?;

    ctx.load_cluster(cluster_id).await
}

async fn destroy_members(ctx: &WorkerContext, op: &Operation, members: &[ClusterVm]) -> Result<()> {
    let vms: Vec<Vm> = members.iter().map(|m| m.vm.clone()).collect();
    let failures = bootstrap::detach_all(ctx.media.as_ref(), &vms).await;
    if failures > 0 {
        warn!(cluster = %op.cluster(), failures = failures, "Some bootstrap media could not be detached");
    }

    for member in members {
        op.deadline().ensure("destruction of cluster VMs")?;
        ctx.provisioner.destroy(&member.vm).await?;
        ctx.mappings.remove_mapping(&member.vm.id).await?;
        info!(cluster = %op.cluster(), vm = %member.vm, role = %member.mapping.role, "Destroyed VM");
    }

    ctx.clusters.mark_removed(&op.cluster().id).await?;
    Ok(())
}
