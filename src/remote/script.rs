//! Upgrade script invocation.

use std::fmt;

/// File name of the node upgrade script, relative to the remote home.
pub const UPGRADE_SCRIPT: &str = "upgrade-kubernetes.sh";

/// Mode the script is copied with.
pub const UPGRADE_SCRIPT_MODE: u32 = 0o755;

/// One run of the upgrade script on one node.
///
/// Serialized at the transport boundary as
/// `sudo ./upgrade-kubernetes.sh <version> <isFirstNode> <legacyMode> <isVMware> <noCniConfig>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeScriptInvocation {
    pub version: String,
    /// First control node, which upgrades the control plane.
    pub is_first_node: bool,
    /// Target version predates 1.15.0.
    pub legacy_mode: bool,
    pub is_vmware: bool,
    /// Cluster uses the default CNI, no custom configuration.
    pub no_cni_config: bool,
}

impl UpgradeScriptInvocation {
    /// Positional arguments in script order.
    pub fn args(&self) -> [String; 5] {
        [
            self.version.clone(),
            self.is_first_node.to_string(),
            self.legacy_mode.to_string(),
            self.is_vmware.to_string(),
            self.no_cni_config.to_string(),
        ]
    }
}

impl fmt::Display for UpgradeScriptInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sudo ./{UPGRADE_SCRIPT} {}", self.args().join(" "))
    }
}
