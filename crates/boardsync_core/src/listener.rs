//! Remote update handling.
//!
//! Each publication on the board channel carries a full snapshot and the id
//! of the participant who saved it. The listener decides what to do with it:
//!
//! ```text
//!  publication ──decode──► RemoteSnapshot
//!                              │
//!                 author == me ├──► SelfEcho   (dropped)
//!                              │
//!      diff(baseline, payload) ├──► Unchanged  (empty diff, dropped)
//!                              │
//!                              └──► Applied    (surface.merge_remote_changes,
//!                                               baseline = payload)
//! ```
//!
//! Messages are applied in arrival order. A later snapshot always replaces
//! an earlier one; there is no causal ordering between participants.

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::protocol::ChannelEnvelope;
use crate::state::{EditableState, StateDiff, diff};
use crate::store::SnapshotStore;
use crate::surface::EditingSurface;

/// A snapshot received from another participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    /// Participant whose save produced the snapshot.
    pub author_id: String,
    /// The snapshot itself.
    pub payload: EditableState,
}

impl RemoteSnapshot {
    /// Decode a channel envelope. Fails when `dataString` is not JSON.
    pub fn decode(envelope: ChannelEnvelope) -> Result<Self> {
        let payload = EditableState::from_json(&envelope.payload.data_string)
            .map_err(|e| SyncError::MalformedMessage(format!("dataString: {e}")))?;
        Ok(Self {
            author_id: envelope.user,
            payload,
        })
    }

    /// Decode the `data` field of a channel publication.
    pub fn from_publication(data: Value) -> Result<Self> {
        Self::decode(ChannelEnvelope::from_publication(data)?)
    }
}

/// What the listener did with a remote snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The snapshot was our own save coming back.
    SelfEcho,
    /// The snapshot matched the current baseline.
    Unchanged,
    /// The snapshot replaced the surface content.
    Applied {
        /// Records that differed from the previous baseline.
        diff: StateDiff,
    },
}

/// Applies remote snapshots for one participant.
#[derive(Debug, Clone)]
pub struct RemoteUpdateListener {
    local_user_id: String,
}

impl RemoteUpdateListener {
    /// Create a listener for the participant `local_user_id`.
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
        }
    }

    /// The local participant's id.
    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Decide whether to merge `snapshot`, and merge it if so.
    ///
    /// The comparison baseline is the store's last known surface state; when
    /// the store has none yet, the surface is asked for a snapshot.
    pub fn handle(
        &self,
        snapshot: RemoteSnapshot,
        store: &mut SnapshotStore,
        surface: &dyn EditingSurface,
    ) -> MergeOutcome {
        if snapshot.author_id == self.local_user_id {
            log::debug!("[RemoteListener] Ignoring self-echo");
            return MergeOutcome::SelfEcho;
        }

        let changes = match store.baseline() {
            Some(baseline) => diff(baseline, &snapshot.payload),
            None => diff(&surface.snapshot(), &snapshot.payload),
        };

        if changes.is_empty() {
            log::debug!(
                "[RemoteListener] Snapshot from {} matches local state",
                snapshot.author_id
            );
            return MergeOutcome::Unchanged;
        }

        log::info!(
            "[RemoteListener] Applying snapshot from {} (+{} ~{} -{})",
            snapshot.author_id,
            changes.added.len(),
            changes.updated.len(),
            changes.removed.len()
        );
        surface.merge_remote_changes(snapshot.payload.clone());
        store.set_baseline(snapshot.payload);

        MergeOutcome::Applied { diff: changes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use serde_json::json;

    fn remote(author: &str, value: Value) -> RemoteSnapshot {
        RemoteSnapshot {
            author_id: author.to_string(),
            payload: EditableState::new(value),
        }
    }

    #[test]
    fn test_self_echo_is_ignored() {
        let listener = RemoteUpdateListener::new("me");
        let surface = MemorySurface::new();
        let mut store = SnapshotStore::new();

        let outcome = listener.handle(remote("me", json!({"shape:1": {}})), &mut store, &surface);

        assert_eq!(outcome, MergeOutcome::SelfEcho);
        assert_eq!(surface.remote_merges(), 0);
        assert!(store.baseline().is_none());
    }

    #[test]
    fn test_identical_snapshot_is_not_merged() {
        let listener = RemoteUpdateListener::new("me");
        let surface = MemorySurface::new();
        let initial = EditableState::new(json!({"shape:1": {"x": 1}}));
        surface.load(initial.clone());
        let mut store = SnapshotStore::with_baseline(initial);

        let outcome = listener.handle(
            remote("other", json!({"shape:1": {"x": 1}})),
            &mut store,
            &surface,
        );

        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(surface.remote_merges(), 0);
    }

    #[test]
    fn test_different_snapshot_is_merged_and_becomes_baseline() {
        let listener = RemoteUpdateListener::new("me");
        let surface = MemorySurface::new();
        let mut store = SnapshotStore::with_baseline(EditableState::empty());

        let outcome = listener.handle(
            remote("other", json!({"shape:1": {"x": 1}})),
            &mut store,
            &surface,
        );

        match outcome {
            MergeOutcome::Applied { diff } => assert_eq!(diff.added, vec!["shape:1"]),
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(surface.remote_merges(), 1);
        assert_eq!(surface.snapshot().as_value(), &json!({"shape:1": {"x": 1}}));
        assert_eq!(store.baseline(), Some(&surface.snapshot()));

        // The same snapshot arriving again is now a no-op.
        let again = listener.handle(
            remote("other", json!({"shape:1": {"x": 1}})),
            &mut store,
            &surface,
        );
        assert_eq!(again, MergeOutcome::Unchanged);
    }

    #[test]
    fn test_missing_baseline_falls_back_to_surface() {
        let listener = RemoteUpdateListener::new("me");
        let surface = MemorySurface::new();
        surface.load(EditableState::new(json!({"shape:1": {}})));
        let mut store = SnapshotStore::new();

        let outcome = listener.handle(remote("other", json!({"shape:1": {}})), &mut store, &surface);
        assert_eq!(outcome, MergeOutcome::Unchanged);
    }

    #[test]
    fn test_merge_does_not_touch_pending_save() {
        let listener = RemoteUpdateListener::new("me");
        let surface = MemorySurface::new();
        let mut store = SnapshotStore::new();
        store.record_local(EditableState::new(json!({"shape:local": {}})));

        listener.handle(remote("other", json!({"shape:remote": {}})), &mut store, &surface);

        assert!(store.has_pending_change());
        assert_eq!(
            store.pending().state.as_ref().map(EditableState::as_value),
            Some(&json!({"shape:local": {}}))
        );
    }

    #[test]
    fn test_decode_publication() {
        let snapshot = RemoteSnapshot::from_publication(json!({
            "user": "u-2",
            "payload": {"dataString": "{\"shape:1\":{\"x\":3}}"}
        }))
        .unwrap();
        assert_eq!(snapshot.author_id, "u-2");
        assert_eq!(snapshot.payload.record_count(), 1);
    }

    #[test]
    fn test_decode_rejects_unparseable_data_string() {
        let result = RemoteSnapshot::from_publication(json!({
            "user": "u-2",
            "payload": {"dataString": "{truncated"}
        }));
        assert!(matches!(result, Err(SyncError::MalformedMessage(_))));
    }
}
