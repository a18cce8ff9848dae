//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;
use crate::worker::OperationSettings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("GIT_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Kubernetes cluster lifecycle orchestrator.
///
/// Runs one lifecycle operation against a cluster described in an inventory
/// file and records the result back into it.
#[derive(Parser, Debug, Clone)]
#[command(name = "kco", version, about = "Kubernetes cluster lifecycle orchestrator")]
pub struct Config {
    /// Inventory file holding clusters, versions, VMs and node mappings
    #[arg(long, global = true, env = "KCO_INVENTORY", default_value = "inventory.yaml")]
    pub inventory: PathBuf,

    /// Login user on cluster nodes
    #[arg(long, global = true, env = "KCO_SSH_USER", default_value = "cloud")]
    pub ssh_user: String,

    /// Private key used to reach cluster nodes
    #[arg(long, global = true, env = "KCO_SSH_KEY")]
    pub ssh_key: Option<PathBuf>,

    /// Directory holding node scripts (upgrade-kubernetes.sh)
    #[arg(
        long,
        global = true,
        env = "KCO_SCRIPTS_DIR",
        default_value = "/usr/share/kco/scripts"
    )]
    pub scripts_dir: PathBuf,

    /// Retries after the first attempt of each remote command
    #[arg(long, global = true, env = "KCO_RETRIES", default_value = "3")]
    pub retries: u32,

    /// Create operation timeout in seconds
    #[arg(long, global = true, env = "KCO_CREATE_TIMEOUT_SECONDS", default_value = "3600")]
    pub create_timeout_seconds: u64,

    /// Scale operation timeout in seconds
    #[arg(long, global = true, env = "KCO_SCALE_TIMEOUT_SECONDS", default_value = "3600")]
    pub scale_timeout_seconds: u64,

    /// Upgrade operation timeout in seconds
    #[arg(long, global = true, env = "KCO_UPGRADE_TIMEOUT_SECONDS", default_value = "600")]
    pub upgrade_timeout_seconds: u64,

    /// Delete operation timeout in seconds
    #[arg(long, global = true, env = "KCO_DELETE_TIMEOUT_SECONDS", default_value = "600")]
    pub delete_timeout_seconds: u64,

    /// Interval between node state polls in seconds
    #[arg(long, global = true, env = "KCO_POLL_INTERVAL_SECONDS", default_value = "15")]
    pub poll_interval_seconds: u64,

    /// Write Prometheus metrics to this file when the operation ends
    #[arg(long, global = true, env = "KCO_METRICS_TEXTFILE")]
    pub metrics_textfile: Option<PathBuf>,

    /// Log format
    #[arg(
        long,
        global = true,
        env = "LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value_t = LogFormat::Json
    )]
    pub log_format: LogFormat,

    /// Log level
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Lifecycle operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Provision the nodes of a cluster in Created state and bring it up
    Create {
        /// Cluster id
        cluster: String,
    },

    /// Change the number of worker nodes
    Scale {
        /// Cluster id
        cluster: String,

        /// Desired worker node count
        #[arg(long)]
        size: u64,
    },

    /// Upgrade a running cluster to another supported Kubernetes version
    #[command(after_help = r#"Examples:
  kco upgrade c-1 --version v-1-20-0   Upgrade cluster c-1 to version record v-1-20-0"#)]
    Upgrade {
        /// Cluster id
        cluster: String,

        /// Target Kubernetes version id
        #[arg(long)]
        version: String,
    },

    /// Destroy a cluster and all its VMs
    Delete {
        /// Cluster id
        cluster: String,
    },
}

impl Command {
    pub fn cluster_id(&self) -> &str {
        match self {
            Self::Create { cluster }
            | Self::Scale { cluster, .. }
            | Self::Upgrade { cluster, .. }
            | Self::Delete { cluster } => cluster,
        }
    }
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Worker policy values derived from the configuration.
    pub fn operation_settings(&self) -> OperationSettings {
        OperationSettings {
            retries: self.retries,
            create_timeout: Duration::from_secs(self.create_timeout_seconds),
            scale_timeout: Duration::from_secs(self.scale_timeout_seconds),
            upgrade_timeout: Duration::from_secs(self.upgrade_timeout_seconds),
            delete_timeout: Duration::from_secs(self.delete_timeout_seconds),
            poll_interval: Duration::from_secs(self.poll_interval_seconds.max(1)),
            ssh_user: self.ssh_user.clone(),
            ssh_key: self.ssh_key.clone(),
            scripts_dir: self.scripts_dir.clone(),
        }
    }

    pub fn display(&self) {
        tracing::info!(
            inventory = %self.inventory.display(),
            ssh_user = %self.ssh_user,
            ssh_key_configured = self.ssh_key.is_some(),
            scripts_dir = %self.scripts_dir.display(),
            retries = self.retries,
            upgrade_timeout_seconds = self.upgrade_timeout_seconds,
            poll_interval_seconds = self.poll_interval_seconds,
            log_format = %self.log_format,
            log_level = %self.log_level,
            "Configuration initialized"
        );

        if self.ssh_key.is_none() {
            tracing::warn!("No SSH key configured - relying on the ssh client's default identities");
        }
    }
}
