//! The snapshot store.
//!
//! Holds the one mutable thing the engine shares between its components:
//! the pending save, the last state the editing surface produced (or the
//! last remote state applied to it), and the last state the server confirmed.
//!
//! There is never more than one "current" candidate. A new local edit
//! overwrites the pending state in place; there is no history of diffs.

use crate::state::EditableState;

/// A buffered local state waiting to be persisted.
///
/// `has_pending_change` is true exactly when `state` holds edits that have
/// not been handed to the persistence endpoint yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingSave {
    /// Whether `state` is unsent.
    pub has_pending_change: bool,
    /// The latest unsent state.
    pub state: Option<EditableState>,
}

impl PendingSave {
    /// Empty pending save.
    pub fn clear() -> Self {
        Self::default()
    }
}

/// In-memory holder for local, baseline, and server-confirmed state.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    pending: PendingSave,
    /// Last state known to be on the editing surface.
    baseline: Option<EditableState>,
    /// Last state the persistence endpoint accepted.
    confirmed: Option<EditableState>,
}

impl SnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose baseline is the state the board was loaded with.
    pub fn with_baseline(initial: EditableState) -> Self {
        Self {
            baseline: Some(initial.clone()),
            confirmed: Some(initial),
            ..Self::default()
        }
    }

    /// Record a fresh local snapshot. Supersedes any earlier pending state.
    pub fn record_local(&mut self, state: EditableState) {
        self.baseline = Some(state.clone());
        self.pending = PendingSave {
            has_pending_change: true,
            state: Some(state),
        };
    }

    /// Whether there are unsent edits.
    pub fn has_pending_change(&self) -> bool {
        self.pending.has_pending_change
    }

    /// Borrow the pending save.
    pub fn pending(&self) -> &PendingSave {
        &self.pending
    }

    /// Read-and-clear the pending state, handing ownership to the caller
    /// (the network layer) for the duration of a send.
    pub fn take_pending(&mut self) -> Option<EditableState> {
        if !self.pending.has_pending_change {
            return None;
        }
        std::mem::take(&mut self.pending).state
    }

    /// Put back a snapshot whose send failed, unless a newer edit has
    /// already taken its place. Returns whether the snapshot was restored.
    pub fn restore_failed(&mut self, state: EditableState) -> bool {
        if self.pending.has_pending_change {
            return false;
        }
        self.pending = PendingSave {
            has_pending_change: true,
            state: Some(state),
        };
        true
    }

    /// Drop any pending state without sending it.
    pub fn clear(&mut self) {
        self.pending = PendingSave::clear();
    }

    /// Record that the server accepted `state`.
    pub fn mark_confirmed(&mut self, state: EditableState) {
        self.confirmed = Some(state);
    }

    /// The last state the server accepted, if any.
    pub fn confirmed(&self) -> Option<&EditableState> {
        self.confirmed.as_ref()
    }

    /// Replace the comparison baseline (after applying a remote snapshot).
    pub fn set_baseline(&mut self, state: EditableState) {
        self.baseline = Some(state);
    }

    /// The last state known to be on the editing surface.
    pub fn baseline(&self) -> Option<&EditableState> {
        self.baseline.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(n: i64) -> EditableState {
        EditableState::new(json!({ "shape:1": { "x": n } }))
    }

    #[test]
    fn test_record_local_supersedes_in_place() {
        let mut store = SnapshotStore::new();
        store.record_local(state(1));
        store.record_local(state(2));

        assert!(store.has_pending_change());
        assert_eq!(store.pending().state, Some(state(2)));
        assert_eq!(store.baseline(), Some(&state(2)));
    }

    #[test]
    fn test_take_pending_clears() {
        let mut store = SnapshotStore::new();
        store.record_local(state(1));

        assert_eq!(store.take_pending(), Some(state(1)));
        assert!(!store.has_pending_change());
        assert_eq!(store.pending(), &PendingSave::clear());
        assert_eq!(store.take_pending(), None);
    }

    #[test]
    fn test_restore_failed_yields_to_newer_edit() {
        let mut store = SnapshotStore::new();
        store.record_local(state(1));
        let sent = store.take_pending().unwrap();

        store.record_local(state(2));
        assert!(!store.restore_failed(sent.clone()));
        assert_eq!(store.pending().state, Some(state(2)));

        store.take_pending();
        assert!(store.restore_failed(sent));
        assert_eq!(store.pending().state, Some(state(1)));
    }

    #[test]
    fn test_with_baseline_seeds_baseline_and_confirmed() {
        let store = SnapshotStore::with_baseline(state(7));
        assert_eq!(store.baseline(), Some(&state(7)));
        assert_eq!(store.confirmed(), Some(&state(7)));
        assert!(!store.has_pending_change());
    }
}
