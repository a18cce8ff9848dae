//! Cluster-management commands run on the control node, and parsers for
//! their output.

/// kubectl binary installed on every node by the bootstrap media.
pub const KUBECTL: &str = "/opt/bin/kubectl";

pub fn drain(node: &str) -> String {
    format!("sudo {KUBECTL} drain {node} --ignore-daemonsets --delete-emptydir-data")
}

pub fn uncordon(node: &str) -> String {
    format!("sudo {KUBECTL} uncordon {node}")
}

pub fn delete_node(node: &str) -> String {
    format!("sudo {KUBECTL} delete node {node}")
}

/// Status of the node's `Ready` condition.
pub fn node_ready(node: &str) -> String {
    format!(
        "sudo {KUBECTL} get nodes {node} -o jsonpath='{{.status.conditions[?(@.type==\"Ready\")].status}}'"
    )
}

/// kubelet version reported by the node.
pub fn node_version(node: &str) -> String {
    format!("sudo {KUBECTL} get nodes {node} -o jsonpath='{{.status.nodeInfo.kubeletVersion}}'")
}

pub fn list_nodes() -> String {
    format!("sudo {KUBECTL} get nodes --no-headers")
}

/// True when the `Ready` condition status is `True`.
pub fn parse_ready(output: &str) -> bool {
    output.trim() == "True"
}

pub fn parse_kubelet_version(output: &str) -> &str {
    output.trim().trim_matches('\'')
}

/// Count nodes whose status column contains `Ready` in `get nodes --no-headers`
/// output. `Ready,SchedulingDisabled` counts, `NotReady` does not.
pub fn count_ready_nodes(output: &str) -> usize {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter(|status| status.split(',').any(|s| s == "Ready"))
        .count()
}
