//! In-memory editing surface.
//!
//! A record map that can be edited programmatically. Used by the command
//! line front end and by tests.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::EditingSurface;
use crate::observer::ChangeRecord;
use crate::state::EditableState;

/// A single edit applied to a [`MemorySurface`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SurfaceEdit {
    /// Create or replace a record.
    Put {
        /// Record id.
        id: String,
        /// Record contents.
        record: Value,
    },
    /// Delete a record.
    Remove {
        /// Record id.
        id: String,
    },
    /// Move the local pointer. Cosmetic.
    Cursor {
        /// Horizontal position.
        x: f64,
        /// Vertical position.
        y: f64,
    },
}

#[derive(Debug, Default)]
struct SurfaceInner {
    state: EditableState,
    cursor: Option<(f64, f64)>,
    listener: Option<mpsc::UnboundedSender<ChangeRecord>>,
    remote_merges: usize,
}

impl SurfaceInner {
    fn with_records<R>(&mut self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        // Anything that is not a record map is replaced by an empty one.
        if self.state.records().is_none() {
            self.state = EditableState::empty();
        }
        match self.state.as_value_mut() {
            Value::Object(root) => match root.get_mut("store") {
                Some(Value::Object(store)) => f(store),
                _ => f(root),
            },
            _ => f(&mut Map::new()),
        }
    }

    fn emit(&self, record: ChangeRecord) {
        if let Some(listener) = &self.listener {
            // A closed receiver only means nobody is observing anymore.
            let _ = listener.send(record);
        }
    }
}

/// An editing surface backed by a JSON record map.
#[derive(Debug, Default)]
pub struct MemorySurface {
    inner: Mutex<SurfaceInner>,
}

impl MemorySurface {
    /// Create an empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the change stream. Replaces any previous subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().listener = Some(tx);
        rx
    }

    /// Replace the content without emitting a change (initial load).
    pub fn load(&self, state: EditableState) {
        self.inner.lock().unwrap().state = state;
    }

    /// Apply a local edit and emit its change record.
    pub fn apply(&self, edit: SurfaceEdit) -> ChangeRecord {
        let mut inner = self.inner.lock().unwrap();
        let mut record = ChangeRecord::default();

        match edit {
            SurfaceEdit::Put { id, record: value } => {
                match inner.with_records(|records| records.insert(id.clone(), value)) {
                    None => record.added.push(id),
                    Some(_) => record.updated.push(id),
                }
            }
            SurfaceEdit::Remove { id } => {
                if inner.with_records(|records| records.remove(&id)).is_some() {
                    record.removed.push(id);
                }
            }
            SurfaceEdit::Cursor { x, y } => {
                inner.cursor = Some((x, y));
            }
        }

        inner.emit(record.clone());
        record
    }

    /// Last pointer position.
    pub fn cursor(&self) -> Option<(f64, f64)> {
        self.inner.lock().unwrap().cursor
    }

    /// Number of remote snapshots merged in so far.
    pub fn remote_merges(&self) -> usize {
        self.inner.lock().unwrap().remote_merges
    }
}

impl EditingSurface for MemorySurface {
    fn snapshot(&self) -> EditableState {
        self.inner.lock().unwrap().state.clone()
    }

    fn merge_remote_changes(&self, state: EditableState) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = state;
        inner.remote_merges += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_then_update_then_remove() {
        let surface = MemorySurface::new();
        let mut rx = surface.subscribe();

        let added = surface.apply(SurfaceEdit::Put {
            id: "shape:1".into(),
            record: json!({"x": 1}),
        });
        assert_eq!(added.added, vec!["shape:1"]);

        let updated = surface.apply(SurfaceEdit::Put {
            id: "shape:1".into(),
            record: json!({"x": 2}),
        });
        assert_eq!(updated.updated, vec!["shape:1"]);

        let removed = surface.apply(SurfaceEdit::Remove {
            id: "shape:1".into(),
        });
        assert_eq!(removed.removed, vec!["shape:1"]);

        assert_eq!(rx.try_recv().unwrap(), added);
        assert_eq!(rx.try_recv().unwrap(), updated);
        assert_eq!(rx.try_recv().unwrap(), removed);
        assert_eq!(surface.snapshot().record_count(), 0);
    }

    #[test]
    fn test_cursor_is_cosmetic() {
        let surface = MemorySurface::new();
        let record = surface.apply(SurfaceEdit::Cursor { x: 3.0, y: 4.0 });
        assert!(!record.is_structural());
        assert_eq!(surface.cursor(), Some((3.0, 4.0)));
    }

    #[test]
    fn test_edits_land_inside_store_envelope() {
        let surface = MemorySurface::new();
        surface.load(EditableState::new(json!({"store": {}, "schema": {"v": 1}})));

        surface.apply(SurfaceEdit::Put {
            id: "shape:1".into(),
            record: json!({}),
        });

        let snapshot = surface.snapshot();
        assert_eq!(snapshot.as_value()["store"]["shape:1"], json!({}));
        assert_eq!(snapshot.as_value()["schema"], json!({"v": 1}));
    }

    #[test]
    fn test_remote_merge_does_not_emit() {
        let surface = MemorySurface::new();
        let mut rx = surface.subscribe();

        surface.merge_remote_changes(EditableState::new(json!({"shape:9": {}})));

        assert!(rx.try_recv().is_err());
        assert_eq!(surface.remote_merges(), 1);
        assert_eq!(surface.snapshot().record_count(), 1);
    }

    #[test]
    fn test_edit_commands_parse_from_json() {
        let edit: SurfaceEdit =
            serde_json::from_str(r#"{"op":"put","id":"shape:1","record":{"x":1}}"#).unwrap();
        assert!(matches!(edit, SurfaceEdit::Put { .. }));
        let edit: SurfaceEdit = serde_json::from_str(r#"{"op":"cursor","x":1,"y":2}"#).unwrap();
        assert_eq!(edit, SurfaceEdit::Cursor { x: 1.0, y: 2.0 });
    }
}
