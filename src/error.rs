//! Custom error types for kco.

use thiserror::Error;

use crate::model::{ClusterEvent, ClusterState};

/// Errors that can occur while orchestrating cluster lifecycle operations.
#[derive(Error, Debug)]
pub enum KcoError {
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Kubernetes version not found: {0}")]
    VersionNotFound(String),

    #[error("VM not found: {0}")]
    VmNotFound(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Upgrade not possible: {0}")]
    UpgradeNotPossible(String),

    #[error("Invalid cluster size: {0}")]
    InvalidSize(String),

    #[error("[{cluster}] precondition failed: {reason}")]
    Precondition { cluster: String, reason: String },

    #[error("[{cluster}] event {event} is not permitted in state {state}")]
    IllegalTransition {
        cluster: String,
        state: ClusterState,
        event: ClusterEvent,
    },

    #[error("[{cluster}] state changed concurrently: expected {expected}, found {actual}")]
    StateConflict {
        cluster: String,
        expected: ClusterState,
        actual: ClusterState,
    },

    #[error("Remote command on {host} failed: {message}")]
    Remote { host: String, message: String },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Operation deadline exceeded during {0}")]
    DeadlineExceeded(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Bootstrap media error on VM {vm}: {message}")]
    Media { vm: String, message: String },

    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Failed to {operation} Kubernetes cluster {cluster}: {source}")]
    OperationFailed {
        operation: &'static str,
        cluster: String,
        #[source]
        source: Box<KcoError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KcoError {
    /// Create a remote command error for the given host.
    pub fn remote(host: &str, message: impl Into<String>) -> Self {
        Self::Remote {
            host: host.to_string(),
            message: message.into(),
        }
    }

    /// Create a precondition error for the given cluster.
    pub fn precondition(cluster: &str, reason: impl Into<String>) -> Self {
        Self::Precondition {
            cluster: cluster.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error is transient and the call may be retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Io(_))
    }

    /// Returns true if the operation ran out of wall-clock budget.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Self::DeadlineExceeded(_) => true,
            Self::OperationFailed { source, .. } => source.is_deadline_exceeded(),
            _ => false,
        }
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, KcoError>;
