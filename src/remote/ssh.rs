//! OpenSSH transport.
//!
//! Runs the system `ssh` and `scp` clients as child processes. Connect and
//! read timeouts map onto client options; the total timeout is enforced here
//! and kills the child when it expires.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, RemoteShell, SshTarget, Timeouts};
use crate::error::{KcoError, Result};

/// Remote shell backed by the OpenSSH client binaries.
#[derive(Clone, Debug)]
pub struct OpenSshShell {
    ssh_program: String,
    scp_program: String,
    /// Timeouts for `scp` and the follow-up `chmod`.
    copy_timeouts: Timeouts,
}

impl Default for OpenSshShell {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            copy_timeouts: Timeouts::COMMAND,
        }
    }
}

impl OpenSshShell {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_copy_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.copy_timeouts = timeouts;
        self
    }

    /// Options shared by `ssh` and `scp`.
    fn common_options(target: &SshTarget, timeouts: &Timeouts) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", whole_secs(timeouts.connect)),
            "-o".to_string(),
            format!("ServerAliveInterval={}", whole_secs(timeouts.read)),
            "-o".to_string(),
            "ServerAliveCountMax=1".to_string(),
        ];
        if let Some(key) = &target.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    fn ssh_args(target: &SshTarget, command: &str, timeouts: &Timeouts) -> Vec<String> {
        let mut args = Self::common_options(target, timeouts);
        args.extend([
            "-p".to_string(),
            target.port.to_string(),
            format!("{}@{}", target.user, target.host),
            command.to_string(),
        ]);
        args
    }

    fn scp_args(target: &SshTarget, local: &Path, remote_path: &str, timeouts: &Timeouts) -> Vec<String> {
        let mut args = Self::common_options(target, timeouts);
        args.extend([
            "-P".to_string(),
            target.port.to_string(),
            local.display().to_string(),
            format!("{}@{}:{remote_path}", target.user, target.host),
        ]);
        args
    }

    async fn run(&self, program: &str, args: Vec<String>, host: &str, total: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %program, host = %host, "Running remote command");

        let output = tokio::time::timeout(total, cmd.output())
            .await
            .map_err(|_| {
                KcoError::remote(host, format!("timed out after {}s", total.as_secs()))
            })?
            .map_err(|e| KcoError::remote(host, format!("failed to run {program}: {e}")))?;

        let success = output.status.success();
        let stream = if success || output.stderr.is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        Ok(CommandOutput {
            success,
            output: String::from_utf8_lossy(stream).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn copy_file(
        &self,
        target: &SshTarget,
        local: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<()> {
        let args = Self::scp_args(target, local, remote_path, &self.copy_timeouts);
        let copied = self
            .run(&self.scp_program, args, &target.host, self.copy_timeouts.total)
            .await?;
        if !copied.success {
            return Err(KcoError::remote(
                &target.host,
                format!("copy of {} failed: {}", local.display(), copied.output.trim()),
            ));
        }

        let chmod = format!("chmod {mode:o} {remote_path}");
        let changed = self.execute(target, &chmod, &self.copy_timeouts).await?;
        if !changed.success {
            return Err(KcoError::remote(
                &target.host,
                format!("`{chmod}` failed: {}", changed.output.trim()),
            ));
        }
        debug!(target = %target, file = %remote_path, "Copied file");
        Ok(())
    }

    async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        timeouts: &Timeouts,
    ) -> Result<CommandOutput> {
        let args = Self::ssh_args(target, command, timeouts);
        self.run(&self.ssh_program, args, &target.host, timeouts.total)
            .await
    }
}

/// Client options take whole seconds, at least one.
fn whole_secs(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target() -> SshTarget {
        SshTarget::new("203.0.113.10", 2223, "cloud")
            .with_key(Some(PathBuf::from("/etc/kco/id_rsa")))
    }

    #[test]
    fn test_ssh_args() {
        let args = OpenSshShell::ssh_args(&target(), "uptime", &Timeouts::COMMAND);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"ServerAliveInterval=10".to_string()));
        assert!(args.windows(2).any(|w| w == ["-i", "/etc/kco/id_rsa"]));
        assert!(args.windows(2).any(|w| w == ["-p", "2223"]));
        assert_eq!(args[args.len() - 2], "cloud@203.0.113.10");
        assert_eq!(args[args.len() - 1], "uptime");
    }

    #[test]
    fn test_scp_args_use_capital_port_flag() {
        let args = OpenSshShell::scp_args(
            &target(),
            Path::new("/usr/share/kco/upgrade-kubernetes.sh"),
            "upgrade-kubernetes.sh",
            &Timeouts::COMMAND,
        );
        assert!(args.windows(2).any(|w| w == ["-P", "2223"]));
        assert_eq!(
            args[args.len() - 1],
            "cloud@203.0.113.10:upgrade-kubernetes.sh"
        );
    }

    #[test]
    fn test_whole_secs_never_zero() {
        assert_eq!(whole_secs(Duration::from_millis(500)), 1);
        assert_eq!(whole_secs(Duration::from_secs(30)), 30);
    }

    #[tokio::test]
    async fn test_missing_program_is_transient_error() {
        let shell = OpenSshShell {
            ssh_program: "/nonexistent/kco-ssh".to_string(),
            ..OpenSshShell::default()
        };
        let err = shell
            .execute(&target(), "true", &Timeouts::COMMAND)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
