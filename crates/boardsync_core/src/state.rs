//! The editable board snapshot and its structural diff.
//!
//! The engine treats a snapshot as an opaque JSON document. The only thing it
//! ever asks of one is "which records differ from that other snapshot", so
//! this module is deliberately small.
//!
//! Two snapshot shapes are understood:
//!
//! - a store envelope, `{ "store": { "<record id>": {...}, ... }, "schema": {...} }`,
//!   where the records live under `store` and everything else is envelope;
//! - a bare record map, `{ "<record id>": {...}, ... }`.
//!
//! Anything else (arrays, scalars) is compared as a whole.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Key reported in a [`StateDiff`] when something outside the record map
/// changed, or when the snapshot has no record map at all.
pub const DOCUMENT_KEY: &str = "$document";

const STORE_FIELD: &str = "store";

/// A complete, self-contained serialization of the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditableState(Value);

impl EditableState {
    /// Wrap an already-parsed JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// An empty record map.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Parse a snapshot from its JSON text form (the `dataString` wire field).
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }

    /// Serialize the snapshot to JSON text.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Mutably borrow the underlying JSON value.
    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    /// The record map of this snapshot, if it has one.
    pub fn records(&self) -> Option<&Map<String, Value>> {
        let root = self.0.as_object()?;
        match root.get(STORE_FIELD) {
            Some(Value::Object(store)) => Some(store),
            _ => Some(root),
        }
    }

    /// Number of records, or 0 for snapshots without a record map.
    pub fn record_count(&self) -> usize {
        self.records().map_or(0, Map::len)
    }

    fn has_envelope(&self) -> bool {
        matches!(
            self.0.as_object().and_then(|root| root.get(STORE_FIELD)),
            Some(Value::Object(_))
        )
    }

    /// Everything in the root object except the `store` field.
    fn envelope(&self) -> Option<Map<String, Value>> {
        if !self.has_envelope() {
            return None;
        }
        self.0.as_object().map(|root| {
            root.iter()
                .filter(|(k, _)| k.as_str() != STORE_FIELD)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }
}

impl Default for EditableState {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for EditableState {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Record-level difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDiff {
    /// Records present only in the newer snapshot.
    pub added: Vec<String>,
    /// Records present in both with different contents.
    pub updated: Vec<String>,
    /// Records present only in the older snapshot.
    pub removed: Vec<String>,
}

impl StateDiff {
    /// True when the two snapshots are structurally identical.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of changed records.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Compute the structural difference going from `before` to `after`.
pub fn diff(before: &EditableState, after: &EditableState) -> StateDiff {
    let mut out = StateDiff::default();

    let (Some(old), Some(new)) = (before.records(), after.records()) else {
        if before != after {
            out.updated.push(DOCUMENT_KEY.to_string());
        }
        return out;
    };

    for (id, record) in new {
        match old.get(id) {
            None => out.added.push(id.clone()),
            Some(previous) if previous != record => out.updated.push(id.clone()),
            Some(_) => {}
        }
    }
    out.removed.extend(
        old.keys()
            .filter(|id| !new.contains_key(id.as_str()))
            .cloned(),
    );

    if before.has_envelope() != after.has_envelope() || before.envelope() != after.envelope() {
        out.updated.push(DOCUMENT_KEY.to_string());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn board(value: Value) -> EditableState {
        EditableState::new(value)
    }

    #[test]
    fn test_identical_snapshots_have_empty_diff() {
        let a = board(json!({"store": {"shape:1": {"x": 1}}, "schema": {"v": 2}}));
        let b = a.clone();
        assert!(diff(&a, &b).is_empty());
    }

    #[test]
    fn test_diff_reports_added_updated_removed() {
        let a = board(json!({"shape:1": {"x": 1}, "shape:2": {"x": 2}}));
        let b = board(json!({"shape:1": {"x": 9}, "shape:3": {"x": 3}}));

        let d = diff(&a, &b);
        assert_eq!(d.added, vec!["shape:3"]);
        assert_eq!(d.updated, vec!["shape:1"]);
        assert_eq!(d.removed, vec!["shape:2"]);
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_envelope_change_is_reported() {
        let a = board(json!({"store": {"shape:1": {}}, "schema": {"v": 1}}));
        let b = board(json!({"store": {"shape:1": {}}, "schema": {"v": 2}}));

        let d = diff(&a, &b);
        assert_eq!(d.updated, vec![DOCUMENT_KEY]);
    }

    #[test]
    fn test_store_envelope_records_are_compared() {
        let a = board(json!({"store": {"shape:1": {"x": 1}}}));
        let b = board(json!({"store": {"shape:1": {"x": 1}, "shape:2": {"x": 2}}}));

        let d = diff(&a, &b);
        assert_eq!(d.added, vec!["shape:2"]);
        assert!(d.updated.is_empty());
    }

    #[test]
    fn test_non_object_snapshots_compare_whole() {
        let a = board(json!([1, 2, 3]));
        let b = board(json!([1, 2, 3]));
        let c = board(json!([1, 2]));

        assert!(diff(&a, &b).is_empty());
        assert_eq!(diff(&a, &c).updated, vec![DOCUMENT_KEY]);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(EditableState::from_json("{not json").is_err());
        let parsed = EditableState::from_json(r#"{"shape:1":{}}"#).unwrap();
        assert_eq!(parsed.record_count(), 1);
    }
}
