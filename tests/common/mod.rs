#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use prometheus_client::registry::Registry;
use tempfile::TempDir;

use kco::error::{KcoError, Result};
use kco::metrics::Metrics;
use kco::model::{
    Cluster, ClusterEvent, HypervisorType, KubernetesVersion, ManagementEndpoint, NodeMapping,
    NodeRole, Vm,
};
use kco::remote::{CommandOutput, RemoteShell, SshTarget, Timeouts};
use kco::state::{self, Transition};
use kco::store::{ClusterStore, Inventory, InventoryStore, NodeMappingStore};
use kco::worker::{OperationSettings, WorkerContext};

pub const CLUSTER_ID: &str = "c-1";
pub const PUBLIC_IP: &str = "203.0.113.10";
pub const BASE_SSH_PORT: u16 = 2222;

/// A remote command or file copy seen by [`FakeShell`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub host: String,
    pub port: u16,
    pub command: String,
}

struct FailureRule {
    patterns: Vec<String>,
    /// `None` fails forever.
    remaining: Option<u32>,
}

struct DelayRule {
    patterns: Vec<String>,
    duration: Duration,
}

fn matches_all(command: &str, patterns: &[String]) -> bool {
    patterns.iter().all(|p| command.contains(p.as_str()))
}

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(ToString::to_string).collect()
}

/// Scripted remote shell that records every call.
pub struct FakeShell {
    calls: Mutex<Vec<Call>>,
    copies: Mutex<Vec<Call>>,
    failures: Mutex<Vec<FailureRule>>,
    delays: Mutex<Vec<DelayRule>>,
    reported_version: Mutex<String>,
    ready_nodes: Mutex<usize>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            delays: Mutex::new(Vec::new()),
            reported_version: Mutex::new("v1.20.0".to_string()),
            ready_nodes: Mutex::new(0),
        }
    }

    /// Commands containing every pattern exit non-zero, forever.
    pub fn fail_always(&self, patterns: &[&str]) {
        self.failures.lock().unwrap().push(FailureRule {
            patterns: owned(patterns),
            remaining: None,
        });
    }

    /// Commands containing every pattern exit non-zero `times` times.
    pub fn fail_times(&self, patterns: &[&str], times: u32) {
        self.failures.lock().unwrap().push(FailureRule {
            patterns: owned(patterns),
            remaining: Some(times),
        });
    }

    /// The first command containing every pattern takes `duration`.
    pub fn delay_once(&self, patterns: &[&str], duration: Duration) {
        self.delays.lock().unwrap().push(DelayRule {
            patterns: owned(patterns),
            duration,
        });
    }

    pub fn set_reported_version(&self, version: &str) {
        *self.reported_version.lock().unwrap() = version.to_string();
    }

    pub fn set_ready_nodes(&self, count: usize) {
        *self.ready_nodes.lock().unwrap() = count;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<Call> {
        self.copies.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.command.contains(pattern))
            .collect()
    }

    pub fn script_runs(&self) -> Vec<Call> {
        self.calls_matching("upgrade-kubernetes.sh")
    }

    pub fn drains(&self) -> Vec<Call> {
        self.calls_matching(" drain ")
    }

    fn take_delay(&self, command: &str) -> Option<Duration> {
        let mut delays = self.delays.lock().unwrap();
        let index = delays
            .iter()
            .position(|d| matches_all(command, &d.patterns))?;
        Some(delays.remove(index).duration)
    }

    fn should_fail(&self, command: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        for rule in failures.iter_mut() {
            if !matches_all(command, &rule.patterns) {
                continue;
            }
            match rule.remaining {
                None => return true,
                Some(0) => {}
                Some(n) => {
                    rule.remaining = Some(n - 1);
                    return true;
                }
            }
        }
        false
    }

    fn respond(&self, command: &str) -> String {
        if command.contains("kubeletVersion") {
            self.reported_version.lock().unwrap().clone()
        } else if command.contains("conditions") {
            "True".to_string()
        } else if command.contains("get nodes --no-headers") {
            let ready = *self.ready_nodes.lock().unwrap();
            (1..=ready)
                .map(|i| format!("node-{i}   Ready   <none>   1d   v1.20.0\n"))
                .collect()
        } else {
            String::new()
        }
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn copy_file(
        &self,
        target: &SshTarget,
        _local: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<()> {
        assert_eq!(mode, 0o755);
        self.copies.lock().unwrap().push(Call {
            host: target.host.clone(),
            port: target.port,
            command: remote_path.to_string(),
        });
        Ok(())
    }

    async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        _timeouts: &Timeouts,
    ) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call {
            host: target.host.clone(),
            port: target.port,
            command: command.to_string(),
        });

        if let Some(delay) = self.take_delay(command) {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail(command) {
            return Ok(CommandOutput {
                success: false,
                output: "simulated failure".to_string(),
            });
        }
        Ok(CommandOutput {
            success: true,
            output: self.respond(command),
        })
    }
}

/// Cluster store that fails selected writes and delegates the rest.
pub struct FaultyClusterStore {
    pub inner: Arc<InventoryStore>,
    fail_version_update: bool,
    rejected_event: Option<ClusterEvent>,
}

impl FaultyClusterStore {
    /// Every version update fails.
    pub fn failing_version_update(inner: Arc<InventoryStore>) -> Self {
        Self {
            inner,
            fail_version_update: true,
            rejected_event: None,
        }
    }

    /// Every transition carrying `event` fails.
    pub fn rejecting(inner: Arc<InventoryStore>, event: ClusterEvent) -> Self {
        Self {
            inner,
            fail_version_update: false,
            rejected_event: Some(event),
        }
    }
}

#[async_trait]
impl ClusterStore for FaultyClusterStore {
    async fn find_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        self.inner.find_cluster(cluster_id).await
    }

    async fn find_version(&self, version_id: &str) -> Result<Option<KubernetesVersion>> {
        self.inner.find_version(version_id).await
    }

    async fn apply_transition(
        &self,
        cluster_id: &str,
        transition: &Transition,
    ) -> Result<Cluster> {
        if self.rejected_event == Some(transition.event) {
            return Err(KcoError::Persistence("database unavailable".to_string()));
        }
        self.inner.apply_transition(cluster_id, transition).await
    }

    async fn update_version(&self, cluster_id: &str, version_id: &str) -> Result<()> {
        if self.fail_version_update {
            return Err(KcoError::Persistence("database unavailable".to_string()));
        }
        self.inner.update_version(cluster_id, version_id).await
    }

    async fn update_node_count(&self, cluster_id: &str, node_count: u64) -> Result<()> {
        self.inner.update_node_count(cluster_id, node_count).await
    }

    async fn update_endpoint(&self, cluster_id: &str, endpoint: &str) -> Result<()> {
        self.inner.update_endpoint(cluster_id, endpoint).await
    }

    async fn mark_removed(&self, cluster_id: &str) -> Result<()> {
        self.inner.mark_removed(cluster_id).await
    }
}

/// Mapping store that refuses to map one VM.
pub struct FailingMappingStore {
    pub inner: Arc<InventoryStore>,
    pub vm_id: String,
}

#[async_trait]
impl NodeMappingStore for FailingMappingStore {
    async fn list_mappings(&self, cluster_id: &str) -> Result<Vec<NodeMapping>> {
        self.inner.list_mappings(cluster_id).await
    }

    async fn find_mapping(&self, vm_id: &str) -> Result<Option<NodeMapping>> {
        self.inner.find_mapping(vm_id).await
    }

    async fn add_mapping(&self, mapping: NodeMapping) -> Result<()> {
        if mapping.vm_id == self.vm_id {
            return Err(KcoError::Persistence(format!(
                "cannot map VM {}",
                mapping.vm_id
            )));
        }
        self.inner.add_mapping(mapping).await
    }

    async fn remove_mapping(&self, vm_id: &str) -> Result<()> {
        self.inner.remove_mapping(vm_id).await
    }
}

pub fn vm(id: &str, private_ip: &str) -> Vm {
    Vm {
        id: id.to_string(),
        host_name: id.to_uppercase(),
        display_name: id.to_string(),
        private_ip: Some(private_ip.to_string()),
        public_ip: None,
        hypervisor: HypervisorType::KVM,
    }
}

pub fn version(id: &str, semantic_version: &str) -> KubernetesVersion {
    KubernetesVersion {
        id: id.to_string(),
        name: format!("v{semantic_version}"),
        semantic_version: semantic_version.to_string(),
        iso_id: Some(format!("iso-{id}")),
    }
}

/// Cluster `c-1` on 1.19.4 with one control node and `workers` workers,
/// all mapped, reached through a multiplexed endpoint.
pub fn inventory(workers: usize) -> Inventory {
    let mut cluster = Cluster::new(CLUSTER_ID, "prod", "v-119");
    cluster.node_count = workers as u64;

    let mut vms = vec![vm("control-1", "10.1.0.10")];
    let mut mappings = vec![NodeMapping::new(CLUSTER_ID, "control-1", NodeRole::Control)];
    for i in 1..=workers {
        let id = format!("worker-{i}");
        vms.push(vm(&id, &format!("10.1.0.{}", 10 + i)));
        mappings.push(NodeMapping::new(CLUSTER_ID, &id, NodeRole::Worker));
    }

    let mut inventory = Inventory {
        clusters: vec![cluster],
        versions: vec![
            version("v-113", "1.13.5"),
            version("v-114", "1.14.9"),
            version("v-119", "1.19.4"),
            version("v-120", "1.20.0"),
            version("v-122", "1.22.0"),
        ],
        vms,
        mappings,
        ..Inventory::default()
    };
    inventory.endpoints.insert(
        CLUSTER_ID.to_string(),
        ManagementEndpoint::new(PUBLIC_IP, BASE_SSH_PORT),
    );
    inventory
}

/// Settings with a short retry budget and a scripts directory holding the
/// upgrade script.
pub fn settings(scripts_dir: &Path) -> OperationSettings {
    OperationSettings {
        retries: 2,
        create_timeout: Duration::from_secs(600),
        scale_timeout: Duration::from_secs(600),
        upgrade_timeout: Duration::from_secs(600),
        delete_timeout: Duration::from_secs(600),
        poll_interval: Duration::from_secs(15),
        ssh_user: "cloud".to_string(),
        ssh_key: None,
        scripts_dir: scripts_dir.to_path_buf(),
    }
}

/// Workers wired to an in-memory inventory and a [`FakeShell`].
pub struct Harness {
    pub store: Arc<InventoryStore>,
    pub shell: Arc<FakeShell>,
    pub ctx: WorkerContext,
    pub registry: Registry,
    _scripts: TempDir,
}

impl Harness {
    pub fn new(inventory: Inventory) -> Self {
        let scripts = tempfile::tempdir().unwrap();
        std::fs::write(
            scripts.path().join("upgrade-kubernetes.sh"),
            "#!/bin/bash\nexit 0\n",
        )
        .unwrap();

        let store = Arc::new(InventoryStore::in_memory(inventory));
        let shell = Arc::new(FakeShell::new());
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        let ctx = WorkerContext::with_inventory(
            store.clone(),
            shell.clone(),
            settings(scripts.path()),
            metrics,
        );

        Self {
            store,
            shell,
            ctx,
            registry,
            _scripts: scripts,
        }
    }

    /// Harness whose cluster `c-1` has already been started.
    pub async fn running(inventory: Inventory) -> Self {
        let harness = Self::new(inventory);
        harness
            .drive(&[ClusterEvent::StartRequested, ClusterEvent::OperationSucceeded])
            .await;
        harness
    }

    pub async fn drive(&self, events: &[ClusterEvent]) {
        for event in events {
            state::transit(self.store.as_ref(), CLUSTER_ID, *event)
                .await
                .unwrap();
        }
    }

    pub async fn cluster(&self) -> Cluster {
        self.store.find_cluster(CLUSTER_ID).await.unwrap().unwrap()
    }

    pub async fn snapshot(&self) -> Inventory {
        self.store.snapshot().await
    }

    /// Events recorded for `c-1`, oldest first.
    pub async fn events(&self) -> Vec<ClusterEvent> {
        self.snapshot()
            .await
            .transitions
            .iter()
            .filter(|t| t.cluster_id == CLUSTER_ID)
            .map(|t| t.event)
            .collect()
    }
}
