//! Cluster lifecycle state machine.
//!
//! `transition` is the pure `(state, event) -> state` function. `transit`
//! applies it to the persisted record with compare-and-swap on the current
//! state, which makes entering an in-progress state the per-cluster lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{KcoError, Result};
use crate::model::{Cluster, ClusterEvent, ClusterState};
use crate::store::ClusterStore;

/// A validated state change, applied by the store only if the stored state
/// still equals `from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub event: ClusterEvent,
    pub from: ClusterState,
    pub to: ClusterState,
}

/// An applied transition, kept by the store as an audit trail.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub cluster_id: String,
    pub event: ClusterEvent,
    pub from: ClusterState,
    pub to: ClusterState,
    pub at: DateTime<Utc>,
}

/// Next state for `event` in `state`, or `None` if the pair is not declared.
pub const fn next_state(state: ClusterState, event: ClusterEvent) -> Option<ClusterState> {
    use ClusterEvent as E;
    use ClusterState as S;

    let next = match (state, event) {
        (S::Created | S::Stopped, E::StartRequested) => S::Starting,
        (S::Starting, E::OperationSucceeded) => S::Running,
        (S::Starting, E::CreateFailed) => S::Error,

        (S::Starting | S::Running | S::Alert, E::StopRequested) => S::Stopping,
        (S::Stopping, E::OperationSucceeded) => S::Stopped,

        (S::Running, E::FaultsDetected) => S::Alert,
        (S::Running, E::ScaleUpRequested | E::ScaleDownRequested) => S::Scaling,
        (S::Scaling, E::OperationSucceeded) => S::Running,

        (S::Running, E::UpgradeRequested) => S::Upgrading,
        (S::Upgrading, E::OperationSucceeded) => S::Running,

        (S::Alert, E::RecoveryRequested) => S::Recovering,
        (S::Recovering, E::OperationSucceeded) => S::Running,

        (S::Created | S::Running | S::Stopped | S::Alert | S::Error, E::DestroyRequested) => {
            S::Destroying
        }
        (S::Destroying, E::OperationSucceeded) => S::Destroyed,

        (
            S::Starting | S::Stopping | S::Scaling | S::Upgrading | S::Recovering | S::Destroying,
            E::OperationFailed,
        ) => S::Alert,

        _ => return None,
    };
    Some(next)
}

/// Validate `event` against `cluster`'s current state.
///
/// Illegal pairs fail loudly with [`KcoError::IllegalTransition`].
pub fn transition(cluster: &Cluster, event: ClusterEvent) -> Result<Transition> {
    let from = cluster.state();
    next_state(from, event)
        .map(|to| Transition { event, from, to })
        .ok_or_else(|| KcoError::IllegalTransition {
            cluster: cluster.id.clone(),
            state: from,
            event,
        })
}

/// Apply `event` to the persisted cluster and return the updated record.
///
/// The store rejects the write with [`KcoError::StateConflict`] if another
/// worker moved the cluster since it was loaded.
pub async fn transit(
    store: &dyn ClusterStore,
    cluster_id: &str,
    event: ClusterEvent,
) -> Result<Cluster> {
    let cluster = store
        .find_cluster(cluster_id)
        .await?
        .ok_or_else(|| KcoError::ClusterNotFound(cluster_id.to_string()))?;

    let change = transition(&cluster, event)?;
    debug!(
        cluster_id = %cluster_id,
        event = %change.event,
        from = %change.from,
        to = %change.to,
        "Applying cluster state transition"
    );

    let updated = store.apply_transition(cluster_id, &change).await?;

    info!(
        cluster = %updated,
        event = %event,
        state = %updated.state(),
        "Cluster state transitioned"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ClusterState; 12] = [
        ClusterState::Created,
        ClusterState::Starting,
        ClusterState::Running,
        ClusterState::Stopping,
        ClusterState::Stopped,
        ClusterState::Scaling,
        ClusterState::Upgrading,
        ClusterState::Alert,
        ClusterState::Recovering,
        ClusterState::Destroying,
        ClusterState::Destroyed,
        ClusterState::Error,
    ];

    #[test]
    fn test_illustrated_lifecycle_path() {
        let mut state = ClusterState::Created;
        for (event, expected) in [
            (ClusterEvent::StartRequested, ClusterState::Starting),
            (ClusterEvent::OperationSucceeded, ClusterState::Running),
            (ClusterEvent::UpgradeRequested, ClusterState::Upgrading),
            (ClusterEvent::OperationSucceeded, ClusterState::Running),
            (ClusterEvent::ScaleUpRequested, ClusterState::Scaling),
            (ClusterEvent::OperationSucceeded, ClusterState::Running),
            (ClusterEvent::DestroyRequested, ClusterState::Destroying),
            (ClusterEvent::OperationSucceeded, ClusterState::Destroyed),
        ] {
            state = next_state(state, event).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_every_in_progress_state_fails_to_alert() {
        for state in ALL_STATES.iter().filter(|s| s.is_in_progress()) {
            assert_eq!(
                next_state(*state, ClusterEvent::OperationFailed),
                Some(ClusterState::Alert),
                "{state} must accept OperationFailed"
            );
        }
    }

    #[test]
    fn test_operation_failed_rejected_outside_in_progress_states() {
        for state in ALL_STATES.iter().filter(|s| !s.is_in_progress()) {
            assert_eq!(next_state(*state, ClusterEvent::OperationFailed), None);
        }
    }

    #[test]
    fn test_in_progress_states_reject_new_requests() {
        let requests = [
            ClusterEvent::StartRequested,
            ClusterEvent::ScaleUpRequested,
            ClusterEvent::ScaleDownRequested,
            ClusterEvent::UpgradeRequested,
            ClusterEvent::RecoveryRequested,
        ];
        for state in ALL_STATES.iter().filter(|s| s.is_in_progress()) {
            for event in requests {
                assert_eq!(next_state(*state, event), None, "{state} + {event}");
            }
        }
    }

    #[test]
    fn test_destroyed_is_terminal() {
        assert!(ClusterState::Destroyed.is_terminal());
        for event in [
            ClusterEvent::StartRequested,
            ClusterEvent::DestroyRequested,
            ClusterEvent::OperationSucceeded,
            ClusterEvent::OperationFailed,
        ] {
            assert_eq!(next_state(ClusterState::Destroyed, event), None);
        }
    }

    #[test]
    fn test_destroy_allowed_from_running_and_failed() {
        assert_eq!(
            next_state(ClusterState::Running, ClusterEvent::DestroyRequested),
            Some(ClusterState::Destroying)
        );
        assert_eq!(
            next_state(ClusterState::Alert, ClusterEvent::DestroyRequested),
            Some(ClusterState::Destroying)
        );
        assert_eq!(
            next_state(ClusterState::Upgrading, ClusterEvent::DestroyRequested),
            None
        );
    }

    #[test]
    fn test_transition_rejects_illegal_event_loudly() {
        let cluster = Cluster::new("c-1", "prod", "v-1");
        let err = transition(&cluster, ClusterEvent::UpgradeRequested).unwrap_err();
        assert!(matches!(
            err,
            KcoError::IllegalTransition {
                state: ClusterState::Created,
                event: ClusterEvent::UpgradeRequested,
                ..
            }
        ));
    }

    #[test]
    fn test_transition_describes_change() {
        let cluster = Cluster::new("c-1", "prod", "v-1");
        let change = transition(&cluster, ClusterEvent::StartRequested).unwrap();
        assert_eq!(
            change,
            Transition {
                event: ClusterEvent::StartRequested,
                from: ClusterState::Created,
                to: ClusterState::Starting,
            }
        );
    }
}
