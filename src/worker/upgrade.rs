//! Upgrade worker.
//!
//! Rolls a new Kubernetes version through the cluster one node at a time,
//! control node first: drain, run the upgrade script, uncordon, then wait
//! until the node reports the target version. The cluster's version
//! reference is written only after every node has been verified.

use std::path::PathBuf;

use tracing::info;

use super::{Operation, OperationKind, WorkerContext};
use crate::bootstrap::{self, BootstrapParameters};
use crate::error::{KcoError, Result};
use crate::membership::{self, ClusterVm};
use crate::model::{Cluster, ClusterEvent, KubernetesVersion, ManagementEndpoint, NodeRole, Vm};
use crate::remote::kubectl;
use crate::remote::script::{UPGRADE_SCRIPT, UPGRADE_SCRIPT_MODE};
use crate::remote::{self, SshTarget, Timeouts, UpgradeScriptInvocation};
use crate::retry;
use crate::version;

/// Everything resolved before the cluster enters `Upgrading`.
struct UpgradePlan {
    endpoint: ManagementEndpoint,
    control: SshTarget,
    target: KubernetesVersion,
    legacy_mode: bool,
    no_cni_config: bool,
    script: PathBuf,
}

/// Upgrade a cluster to the supported version `version_id`.
///
/// Precondition failures leave the cluster state untouched. Once the cluster
/// is `Upgrading`, any failure detaches bootstrap media, moves the cluster to
/// `Alert` and keeps the previous version reference.
pub async fn execute(ctx: &WorkerContext, cluster_id: &str, version_id: &str) -> Result<Cluster> {
    let cluster = ctx.load_cluster(cluster_id).await?;
    let target = find_version(ctx, version_id).await?;
    let current = find_version(ctx, &cluster.kubernetes_version_id).await?;

    let endpoint = ctx.require_endpoint(&cluster).await?;
    let members = ctx.membership().cluster_vms(&cluster.id).await?;
    if members.is_empty() {
        return Err(KcoError::precondition(
            &cluster.name,
            "unable to retrieve VMs for cluster",
        ));
    }
    let eligible = membership::filter_manual_upgrade(&members);

    version::check_upgrade_path(&current.semantic_version, &target.semantic_version)?;
    let legacy_mode = version::is_legacy_version(&target.semantic_version)?;

    let script = ctx.settings.scripts_dir.join(UPGRADE_SCRIPT);
    if !tokio::fs::try_exists(&script).await? {
        return Err(KcoError::precondition(
            &cluster.name,
            format!("upgrade script {} not found", script.display()),
        ));
    }

    info!(
        cluster = %cluster,
        from = %current.semantic_version,
        to = %target.semantic_version,
        nodes = members.len(),
        skipped = members.len() - eligible.len(),
        legacy_mode = legacy_mode,
        "Upgrading Kubernetes cluster"
    );

    let mut op = Operation::begin(
        ctx,
        OperationKind::Upgrade,
        &cluster.id,
        ClusterEvent::UpgradeRequested,
        ctx.settings.upgrade_timeout,
    )
    .await?;
    op.track_media(members.iter().map(|m| m.vm.clone()));

    let plan = UpgradePlan {
        control: ctx.control_target(&endpoint),
        endpoint,
        target,
        legacy_mode,
        no_cni_config: cluster.cni_config_id.is_none(),
        script,
    };
    let outcome = upgrade_nodes(ctx, &op, &plan, &members, &eligible).await;
    op.finish(ctx, outcome).await?;

    ctx.load_cluster(cluster_id).await
}

async fn find_version(ctx: &WorkerContext, version_id: &str) -> Result<KubernetesVersion> {
    ctx.clusters
        .find_version(version_id)
        .await?
        .ok_or_else(|| KcoError::VersionNotFound(version_id.to_string()))
}

async fn upgrade_nodes(
    ctx: &WorkerContext,
    op: &Operation,
    plan: &UpgradePlan,
    members: &[ClusterVm],
    eligible: &[ClusterVm],
) -> Result<()> {
    let params = BootstrapParameters::new(op.cluster(), &plan.target);
    let eligible_vms: Vec<Vm> = eligible.iter().map(|m| m.vm.clone()).collect();
    bootstrap::attach_all(ctx.media.as_ref(), &eligible_vms, &params).await?;

    for (position, member) in eligible.iter().enumerate() {
        upgrade_node(ctx, op, plan, position, member).await?;
    }

    let all_vms: Vec<Vm> = members.iter().map(|m| m.vm.clone()).collect();
    bootstrap::detach_all(ctx.media.as_ref(), &all_vms).await;

    ctx.clusters
        .update_version(&op.cluster().id, &plan.target.id)
        .await?;
    info!(
        cluster = %op.cluster(),
        version = %plan.target.semantic_version,
        "Persisted cluster version"
    );
    Ok(())
}

async fn upgrade_node(
    ctx: &WorkerContext,
    op: &Operation,
    plan: &UpgradePlan,
    position: usize,
    member: &ClusterVm,
) -> Result<()> {
    let vm = &member.vm;
    let node_name = vm.node_name();
    let step = format!("upgrade of node {node_name}");
    info!(
        cluster = %op.cluster(),
        node = %node_name,
        version = %plan.target.semantic_version,
        "Upgrading node"
    );

    super::drain_node(ctx, op, &plan.control, vm).await?;
    op.deadline().ensure(&step)?;

    let (host, port) = plan.endpoint.node_address(vm, member.index);
    let node = ctx.ssh_target(host, port);
    let invocation = UpgradeScriptInvocation {
        version: plan.target.semantic_version.clone(),
        is_first_node: position == 0 && member.mapping.role == NodeRole::Control,
        legacy_mode: plan.legacy_mode,
        is_vmware: vm.is_vmware(),
        no_cni_config: plan.no_cni_config,
    };
    run_upgrade_script(ctx, op, plan, &node, &invocation).await?;
    op.deadline().ensure(&step)?;

    uncordon_node(ctx, op, &plan.control, &node_name).await?;
    if position == 0 {
        wait_for_node_ready(ctx, op, &plan.control, &node_name).await?;
    }
    wait_for_node_version(ctx, op, &plan.control, &node_name, &plan.target.semantic_version)
        .await?;

    ctx.metrics.record_node_upgraded(&op.cluster().name);
    info!(
        cluster = %op.cluster(),
        node = %node_name,
        version = %plan.target.semantic_version,
        "Upgraded node"
    );
    Ok(())
}

/// Copy the upgrade script to the node and run it, retried as one unit.
async fn run_upgrade_script(
    ctx: &WorkerContext,
    op: &Operation,
    plan: &UpgradePlan,
    node: &SshTarget,
    invocation: &UpgradeScriptInvocation,
) -> Result<()> {
    let command = invocation.to_string();
    let command = command.as_str();
    let script = plan.script.as_path();
    let shell = ctx.shell.as_ref();
    let cluster_name = op.cluster().name.as_str();

    retry::retry_with_deadline(
        ctx.settings.retry_policy(),
        op.deadline(),
        &format!("upgrade script on {node}"),
        move |attempt| async move {
            if attempt > 1 {
                ctx.metrics.record_retry(cluster_name, "upgrade_script");
            }
            shell
                .copy_file(node, script, UPGRADE_SCRIPT, UPGRADE_SCRIPT_MODE)
                .await?;
            remote::run_checked(shell, node, command, &Timeouts::SCRIPT)
                .await
                .map(drop)
        },
    )
    .await
}

async fn uncordon_node(
    ctx: &WorkerContext,
    op: &Operation,
    control: &SshTarget,
    node_name: &str,
) -> Result<()> {
    let command = kubectl::uncordon(node_name);
    let command = command.as_str();
    let shell = ctx.shell.as_ref();

    let uncordoned = retry::poll_until(
        op.deadline(),
        ctx.settings.poll_interval,
        "uncordon",
        move || async move {
            remote::run_checked(shell, control, command, &Timeouts::COMMAND)
                .await
                .map(|_| true)
        },
    )
    .await?;

    if !uncordoned {
        return Err(KcoError::Verification(format!(
            "unable to uncordon node {node_name}"
        )));
    }
    Ok(())
}

async fn wait_for_node_ready(
    ctx: &WorkerContext,
    op: &Operation,
    control: &SshTarget,
    node_name: &str,
) -> Result<()> {
    let command = kubectl::node_ready(node_name);
    let command = command.as_str();
    let shell = ctx.shell.as_ref();

    let ready = retry::poll_until(
        op.deadline(),
        ctx.settings.poll_interval,
        "node readiness",
        move || async move {
            let output = remote::run_checked(shell, control, command, &Timeouts::COMMAND).await?;
            Ok(kubectl::parse_ready(&output))
        },
    )
    .await?;

    if !ready {
        return Err(KcoError::Verification(format!(
            "control node {node_name} did not become Ready"
        )));
    }
    Ok(())
}

async fn wait_for_node_version(
    ctx: &WorkerContext,
    op: &Operation,
    control: &SshTarget,
    node_name: &str,
    target: &str,
) -> Result<()> {
    let command = kubectl::node_version(node_name);
    let command = command.as_str();
    let shell = ctx.shell.as_ref();

    let matched = retry::poll_until(
        op.deadline(),
        ctx.settings.poll_interval,
        "node version",
        move || async move {
            let output = remote::run_checked(shell, control, command, &Timeouts::COMMAND).await?;
            Ok(version::versions_match(
                kubectl::parse_kubelet_version(&output),
                target,
            ))
        },
    )
    .await?;

    if !matched {
        return Err(KcoError::Verification(format!(
            "node {node_name} did not report version {target}"
        )));
    }
    Ok(())
}
