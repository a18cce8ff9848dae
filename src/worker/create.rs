//! Create worker: provisions the nodes of a new cluster and waits for them
//! to join.

use tracing::info;

use super::{Operation, OperationKind, WorkerContext};
use crate::bootstrap::{self, BootstrapParameters};
use crate::error::{KcoError, Result};
use crate::model::{Cluster, ClusterEvent, KubernetesVersion, ManagementEndpoint, NodeRole, Vm};

/// Port of the Kubernetes API server on the control node.
pub const API_SERVER_PORT: u16 = 6443;

/// Start a cluster in `Created` or `Stopped`.
///
/// Failures while provisioning VMs end in `Error`; later failures end in
/// `Alert`.
pub async fn execute(ctx: &WorkerContext, cluster_id: &str) -> Result<Cluster> {
    let cluster = ctx.load_cluster(cluster_id).await?;
    let version = ctx
        .clusters
        .find_version(&cluster.kubernetes_version_id)
        .await?
        .ok_or_else(|| KcoError::VersionNotFound(cluster.kubernetes_version_id.clone()))?;

    if cluster.control_node_count < 1 {
        return Err(KcoError::InvalidSize(format!(
            "cluster {} needs at least one control node",
            cluster.name
        )));
    }
    cluster.validate_worker_count(cluster.node_count)?;
    let endpoint = ctx.require_endpoint(&cluster).await?;
    if !ctx.mappings.list_mappings(&cluster.id).await?.is_empty() {
        return Err(KcoError::precondition(
            &cluster.name,
            "cluster already has provisioned nodes",
        ));
    }

    info!(
        cluster = %cluster,
        version = %version.semantic_version,
        control_nodes = cluster.control_node_count,
        etcd_nodes = cluster.etcd_node_count.unwrap_or(0),
        worker_nodes = cluster.node_count,
        "Creating Kubernetes cluster"
    );

    let mut op = Operation::begin(
        ctx,
        OperationKind::Create,
        &cluster.id,
        ClusterEvent::StartRequested,
        ctx.settings.create_timeout,
    )
    .await?;
    let outcome = start_cluster(ctx, &mut op, &version, &endpoint).await;
    op.finish(ctx, outcome).await?;

    ctx.load_cluster(cluster_id).await
}

async fn start_cluster(
    ctx: &WorkerContext,
    op: &mut Operation,
    version: &KubernetesVersion,
    endpoint: &ManagementEndpoint,
) -> Result<()> {
    let cluster = op.cluster().clone();
    let vms = provision_nodes(ctx, &cluster).await?;
    op.deadline().ensure("provisioning of cluster nodes")?;

    op.track_media(vms.iter().cloned());
    let params = BootstrapParameters::new(&cluster, version);
    bootstrap::attach_all(ctx.media.as_ref(), &vms, &params).await?;

    let control = ctx.control_target(endpoint);
    super::wait_for_ready_nodes(ctx, op, &control, cluster.total_node_count()).await?;
    bootstrap::detach_all(ctx.media.as_ref(), &vms).await;

    let api_url = format!("https://{}:{API_SERVER_PORT}/", endpoint.address);
    ctx.clusters.update_endpoint(&cluster.id, &api_url).await?;
    info!(cluster = %cluster, endpoint = %api_url, "Kubernetes cluster is ready");
    Ok(())
}

/// Provision and map the VMs of every role, control nodes first.
///
/// Any failure here is reported as [`KcoError::Provisioning`].
async fn provision_nodes(ctx: &WorkerContext, cluster: &Cluster) -> Result<Vec<Vm>> {
    let mut all = Vec::new();
    for role in [NodeRole::Control, NodeRole::Etcd, NodeRole::Worker] {
        let count = cluster.node_count_for(role);
        if count == 0 {
            continue;
        }

        let vms = ctx
            .provisioner
            .provision(cluster, role, count)
            .await
            .map_err(as_provisioning)?;
        super::map_provisioned(ctx, cluster, role, &vms)
            .await
            .map_err(as_provisioning)?;
        info!(cluster = %cluster, role = %role, count = vms.len(), "Provisioned nodes");
        all.extend(vms);
    }
    Ok(all)
}

fn as_provisioning(error: KcoError) -> KcoError {
    match error {
        e @ KcoError::Provisioning(_) => e,
        other => KcoError::Provisioning(other.to_string()),
    }
}
