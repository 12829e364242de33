//! Last-chance delivery of unsent edits.
//!
//! Two ways a session can end:
//!
//! - **Terminate**: the process is going away. [`DurabilityGuard::on_terminate`]
//!   hands the pending snapshot to a fire-and-forget beacon and, if the beacon
//!   refuses it, tries one blocking send. It never waits for confirmation of
//!   the beacon.
//! - **Unmount**: the session is closed but the process lives on.
//!   [`DurabilityGuard::on_unmount`] issues one ordinary persist and awaits it.
//!
//! Either way the pending save is cleared afterwards, whether or not the
//! server got it.

use crate::protocol::PersistRequest;
use crate::store::SnapshotStore;
use crate::transport::{PersistenceEndpoint, TeardownTransport};

/// How a teardown flush went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    NothingPending,
    /// The unmount persist succeeded.
    Persisted,
    /// The unmount persist failed. The edit is lost.
    PersistFailed(String),
    /// The beacon accepted the snapshot.
    Beaconed,
    /// The beacon refused; the blocking fallback succeeded.
    FallbackPersisted,
    /// Both teardown transports failed. The edit is lost.
    Lost(String),
}

impl FlushOutcome {
    /// Whether a delivery attempt was made.
    pub fn attempted(&self) -> bool {
        !matches!(self, Self::NothingPending)
    }
}

/// Flushes the pending save when a session ends.
#[derive(Debug, Clone)]
pub struct DurabilityGuard {
    board_id: String,
}

impl DurabilityGuard {
    /// Create a guard for `board_id`.
    pub fn new(board_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
        }
    }

    /// Termination path. Synchronous.
    pub fn on_terminate(
        &self,
        store: &mut SnapshotStore,
        transport: &dyn TeardownTransport,
    ) -> FlushOutcome {
        let Some(state) = store.take_pending() else {
            return FlushOutcome::NothingPending;
        };
        let request = PersistRequest::new(self.board_id.as_str(), state);

        if transport.send_beacon(&request) {
            log::info!("[DurabilityGuard] Pending snapshot queued on beacon");
            return FlushOutcome::Beaconed;
        }

        log::warn!("[DurabilityGuard] Beacon refused, falling back to blocking persist");
        match transport.persist_blocking(&request) {
            Ok(()) => FlushOutcome::FallbackPersisted,
            Err(e) => {
                log::error!("[DurabilityGuard] Teardown delivery failed, last edit lost: {}", e);
                FlushOutcome::Lost(e.to_string())
            }
        }
    }

    /// Unmount path. Awaits one ordinary persist.
    pub async fn on_unmount(
        &self,
        store: &mut SnapshotStore,
        endpoint: &dyn PersistenceEndpoint,
    ) -> FlushOutcome {
        let Some(state) = store.take_pending() else {
            return FlushOutcome::NothingPending;
        };
        let request = PersistRequest::new(self.board_id.as_str(), state);

        match endpoint.persist(&request).await {
            Ok(()) => {
                log::info!("[DurabilityGuard] Final persist on unmount succeeded");
                store.mark_confirmed(request.snapshot);
                FlushOutcome::Persisted
            }
            Err(e) => {
                log::error!("[DurabilityGuard] Final persist on unmount failed: {}", e);
                FlushOutcome::PersistFailed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EditableState;
    use crate::testing::{RecordingPersistence, RecordingTeardown};
    use serde_json::json;

    fn store_with_pending() -> SnapshotStore {
        let mut store = SnapshotStore::new();
        store.record_local(EditableState::new(json!({"shape:1": {}})));
        store
    }

    #[test]
    fn test_terminate_uses_beacon_first() {
        let guard = DurabilityGuard::new("b-1");
        let teardown = RecordingTeardown::new();
        let mut store = store_with_pending();

        assert_eq!(guard.on_terminate(&mut store, &teardown), FlushOutcome::Beaconed);
        assert_eq!(teardown.beacons().len(), 1);
        assert_eq!(teardown.beacons()[0].id, "b-1");
        assert!(teardown.blocking_calls().is_empty());
        assert!(!store.has_pending_change());
    }

    #[test]
    fn test_terminate_falls_back_when_beacon_refuses() {
        let guard = DurabilityGuard::new("b-1");
        let teardown = RecordingTeardown::new().refuse_beacon();
        let mut store = store_with_pending();

        assert_eq!(
            guard.on_terminate(&mut store, &teardown),
            FlushOutcome::FallbackPersisted
        );
        assert_eq!(teardown.blocking_calls().len(), 1);
        assert!(!store.has_pending_change());
    }

    #[test]
    fn test_terminate_reports_loss_when_both_fail() {
        let guard = DurabilityGuard::new("b-1");
        let teardown = RecordingTeardown::new().refuse_beacon().fail_blocking();
        let mut store = store_with_pending();

        assert!(matches!(
            guard.on_terminate(&mut store, &teardown),
            FlushOutcome::Lost(_)
        ));
        assert!(!store.has_pending_change());
    }

    #[test]
    fn test_terminate_with_nothing_pending_sends_nothing() {
        let guard = DurabilityGuard::new("b-1");
        let teardown = RecordingTeardown::new();
        let mut store = SnapshotStore::new();

        let outcome = guard.on_terminate(&mut store, &teardown);
        assert_eq!(outcome, FlushOutcome::NothingPending);
        assert!(!outcome.attempted());
        assert!(teardown.beacons().is_empty());
    }

    #[tokio::test]
    async fn test_unmount_persists_and_confirms() {
        let guard = DurabilityGuard::new("b-1");
        let persistence = RecordingPersistence::new();
        let mut store = store_with_pending();

        assert_eq!(
            guard.on_unmount(&mut store, &persistence).await,
            FlushOutcome::Persisted
        );
        assert_eq!(persistence.requests().len(), 1);
        assert!(!store.has_pending_change());
        assert!(store.confirmed().is_some());
    }

    #[tokio::test]
    async fn test_unmount_failure_still_clears_pending() {
        let guard = DurabilityGuard::new("b-1");
        let persistence = RecordingPersistence::new();
        persistence.fail_next(1);
        let mut store = store_with_pending();

        assert!(matches!(
            guard.on_unmount(&mut store, &persistence).await,
            FlushOutcome::PersistFailed(_)
        ));
        assert!(!store.has_pending_change());
    }
}
