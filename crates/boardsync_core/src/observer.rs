//! Local edit observation and save-timing classification.
//!
//! Every change record the editing surface emits goes through
//! [`LocalEditObserver::observe`]: the surface's full snapshot is stored as
//! the pending save, the change is classified, and the scheduler's debounce
//! window is reset with the resulting [`SaveTiming`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::SyncTimingConfig;
use crate::scheduler::PersistScheduler;
use crate::store::SnapshotStore;
use crate::surface::EditingSurface;

/// Who caused a change on the editing surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// The local participant edited the board.
    #[default]
    User,
    /// A remote snapshot was merged in.
    Remote,
}

/// A change notification from the editing surface.
///
/// Record ids in `added`/`updated`/`removed` are structural changes.
/// A record with all three empty is cosmetic (cursor, selection, camera).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Origin of the change.
    #[serde(default)]
    pub source: ChangeSource,
    /// Records created by this change.
    #[serde(default)]
    pub added: Vec<String>,
    /// Records modified by this change.
    #[serde(default)]
    pub updated: Vec<String>,
    /// Records deleted by this change.
    #[serde(default)]
    pub removed: Vec<String>,
}

impl ChangeRecord {
    /// A cosmetic change made by the local user.
    pub fn cosmetic() -> Self {
        Self::default()
    }

    /// Whether the record reports any add/update/remove entries.
    pub fn is_structural(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

/// Classification of a single edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Shapes were added, updated or removed.
    Structural,
    /// Nothing persisted changed shape (pointer movement and the like).
    Cosmetic,
}

/// Classify a change record.
pub fn classify(record: &ChangeRecord) -> EditKind {
    if record.is_structural() {
        EditKind::Structural
    } else {
        EditKind::Cosmetic
    }
}

/// Per-edit timing decision. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveTiming {
    /// The edit was structural.
    pub is_urgent: bool,
    /// The previous persist happened within the rapid window.
    pub is_rapid: bool,
    /// Debounce delay to arm.
    pub delay: Duration,
}

impl SaveTiming {
    /// Decide the debounce tier for an edit.
    ///
    /// `since_last_persist` is `None` when nothing has been persisted yet in
    /// this session; such edits are never rapid.
    pub fn compute(
        kind: EditKind,
        since_last_persist: Option<Duration>,
        config: &SyncTimingConfig,
    ) -> Self {
        let is_urgent = kind == EditKind::Structural;
        let is_rapid = since_last_persist.is_some_and(|elapsed| elapsed < config.rapid_window);
        let delay = if is_urgent && is_rapid {
            config.urgent_delay
        } else {
            config.normal_delay
        };
        Self {
            is_urgent,
            is_rapid,
            delay,
        }
    }

    /// Whether the short tier was selected.
    pub fn is_short_tier(&self) -> bool {
        self.is_urgent && self.is_rapid
    }
}

/// Bookkeeping for local edits. Cannot fail.
#[derive(Debug, Default)]
pub struct LocalEditObserver {
    observed: u64,
}

impl LocalEditObserver {
    /// Create an observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of local edits observed so far.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Record one change from the editing surface.
    ///
    /// Returns `None` for changes that came from a remote merge; those must
    /// not start a new save cycle.
    pub fn observe(
        &mut self,
        record: &ChangeRecord,
        surface: &dyn EditingSurface,
        store: &mut SnapshotStore,
        scheduler: &mut PersistScheduler,
        now: Instant,
    ) -> Option<SaveTiming> {
        if record.source == ChangeSource::Remote {
            log::debug!("[EditObserver] Ignoring change from remote merge");
            return None;
        }

        self.observed += 1;
        store.record_local(surface.snapshot());
        let timing = scheduler.on_edit(classify(record), now);

        log::debug!(
            "[EditObserver] Edit #{} urgent={} rapid={} delay={:?}",
            self.observed,
            timing.is_urgent,
            timing.is_rapid,
            timing.delay
        );
        Some(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use serde_json::json;

    fn structural() -> ChangeRecord {
        ChangeRecord {
            added: vec!["shape:1".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&structural()), EditKind::Structural);
        assert_eq!(classify(&ChangeRecord::cosmetic()), EditKind::Cosmetic);
        let removal = ChangeRecord {
            removed: vec!["shape:9".into()],
            ..Default::default()
        };
        assert_eq!(classify(&removal), EditKind::Structural);
    }

    #[test]
    fn test_structural_and_rapid_uses_short_tier() {
        let config = SyncTimingConfig::default();
        let timing = SaveTiming::compute(
            EditKind::Structural,
            Some(Duration::from_millis(150)),
            &config,
        );
        assert!(timing.is_short_tier());
        assert_eq!(timing.delay, config.urgent_delay);
    }

    #[test]
    fn test_everything_else_uses_normal_tier() {
        let config = SyncTimingConfig::default();
        let cases = [
            (EditKind::Structural, Some(Duration::from_millis(200))),
            (EditKind::Structural, Some(Duration::from_secs(3))),
            (EditKind::Structural, None),
            (EditKind::Cosmetic, Some(Duration::from_millis(10))),
            (EditKind::Cosmetic, None),
        ];
        for (kind, since) in cases {
            let timing = SaveTiming::compute(kind, since, &config);
            assert_eq!(timing.delay, config.normal_delay, "{kind:?} {since:?}");
        }
    }

    #[test]
    fn test_observe_stores_full_snapshot() {
        let surface = MemorySurface::new();
        surface.load(crate::EditableState::new(json!({"shape:1": {"x": 1}})));
        let mut store = SnapshotStore::new();
        let now = Instant::now();
        let mut scheduler = PersistScheduler::new(SyncTimingConfig::default(), now);
        let mut observer = LocalEditObserver::new();

        let timing = observer
            .observe(&structural(), &surface, &mut store, &mut scheduler, now)
            .unwrap();

        assert!(store.has_pending_change());
        assert_eq!(store.pending().state, Some(surface.snapshot()));
        assert!(!timing.is_rapid);
        assert_eq!(scheduler.debounce_deadline(), Some(now + timing.delay));
        assert_eq!(observer.observed(), 1);
    }

    #[test]
    fn test_observe_ignores_remote_changes() {
        let surface = MemorySurface::new();
        let mut store = SnapshotStore::new();
        let now = Instant::now();
        let mut scheduler = PersistScheduler::new(SyncTimingConfig::default(), now);
        let mut observer = LocalEditObserver::new();

        let record = ChangeRecord {
            source: ChangeSource::Remote,
            ..structural()
        };
        assert!(
            observer
                .observe(&record, &surface, &mut store, &mut scheduler, now)
                .is_none()
        );
        assert!(!store.has_pending_change());
        assert_eq!(scheduler.debounce_deadline(), None);
    }
}
