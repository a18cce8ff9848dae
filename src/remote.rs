//! Remote node executor.
//!
//! Workers reach cluster nodes over a remote shell: copy a file, run a
//! command, read back whether it succeeded and what it printed. Each call is
//! a single attempt; retrying is done by [`crate::retry`].

pub mod kubectl;
pub mod script;
pub mod ssh;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{KcoError, Result};

pub use script::UpgradeScriptInvocation;
pub use ssh::OpenSshShell;

/// Host, port and credentials of one remote shell endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key file. `None` uses the client's default identities.
    pub key_path: Option<PathBuf>,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            key_path: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key_path: Option<PathBuf>) -> Self {
        self.key_path = key_path;
        self
    }
}

impl std::fmt::Display for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Per-call timeouts of a remote command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub total: Duration,
}

impl Timeouts {
    /// Cluster-management commands: drain, uncordon, readiness, version.
    pub const COMMAND: Self = Self::from_millis(10_000, 10_000, 60_000);

    /// Upgrade script run, which downloads and restarts node components.
    pub const SCRIPT: Self = Self::from_millis(10_000, 10_000, 600_000);

    pub const fn from_millis(connect: u64, read: u64, total: u64) -> Self {
        Self {
            connect: Duration::from_millis(connect),
            read: Duration::from_millis(read),
            total: Duration::from_millis(total),
        }
    }
}

/// Result of one remote command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

/// Remote shell channel to cluster nodes.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Copy `local` to `remote_path` on the target and set its file mode.
    async fn copy_file(
        &self,
        target: &SshTarget,
        local: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<()>;

    /// Run `command` on the target.
    ///
    /// A command that ran and exited non-zero is `Ok` with `success: false`.
    /// `Err` means the command could not be run at all.
    async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        timeouts: &Timeouts,
    ) -> Result<CommandOutput>;
}

/// Run `command` and turn a non-zero exit into a transient remote error.
pub async fn run_checked(
    shell: &dyn RemoteShell,
    target: &SshTarget,
    command: &str,
    timeouts: &Timeouts,
) -> Result<String> {
    let result = shell.execute(target, command, timeouts).await?;
    if result.success {
        Ok(result.output)
    } else {
        Err(KcoError::remote(
            &target.host,
            format!("`{command}` failed: {}", result.output.trim()),
        ))
    }
}
