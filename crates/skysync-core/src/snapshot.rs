//! State snapshots and change sets
//!
//! A [`Snapshot`] is a flat, case-insensitive mapping from dotted path to
//! [`Value`], stamped with a UTC timestamp and a per-process sequence
//! number. Snapshots are transient: created on every local sample or
//! received message, consumed by the store, then discarded.
//!
//! Path keys are unique ignoring ASCII case; the casing of the first
//! writer is preserved so wire payloads stay readable.

use crate::value::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full or partial mapping of paths to values at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Flat path -> value data
    pub values: ValueMap,
    /// When this snapshot was taken (UTC)
    pub timestamp: DateTime<Utc>,
    /// Monotonically increasing per-source sequence number
    pub sequence: u64,
    /// True for an incremental change set, false for a full snapshot
    pub is_diff: bool,
}

impl Snapshot {
    /// Create an empty full snapshot
    pub fn new() -> Self {
        Self {
            values: ValueMap::new(),
            timestamp: Utc::now(),
            sequence: 0,
            is_diff: false,
        }
    }

    /// Create a snapshot from flat values
    pub fn from_values(values: ValueMap) -> Self {
        Self {
            values,
            timestamp: Utc::now(),
            sequence: 0,
            is_diff: false,
        }
    }

    /// Create an incremental change-set snapshot
    pub fn diff_from_values(values: ValueMap) -> Self {
        Self {
            values,
            timestamp: Utc::now(),
            sequence: 0,
            is_diff: true,
        }
    }

    /// Resolve the stored casing of a path, ignoring ASCII case
    pub fn canonical_key(&self, path: &str) -> Option<&str> {
        self.values
            .keys()
            .find(|k| k.eq_ignore_ascii_case(path))
            .map(|k| k.as_str())
    }

    /// Get a value by path (case-insensitive)
    pub fn get(&self, path: &str) -> Option<&Value> {
        match self.values.get(path) {
            Some(v) => Some(v),
            None => self
                .canonical_key(path)
                .map(|k| k.to_string())
                .and_then(move |k| self.values.get(&k)),
        }
    }

    /// Set a value by path, keeping the casing of an existing key
    pub fn set(&mut self, path: &str, value: Value) {
        if self.values.contains_key(path) {
            self.values.insert(path.to_string(), value);
            return;
        }
        match self.canonical_key(path).map(|k| k.to_string()) {
            Some(existing) => {
                self.values.insert(existing, value);
            }
            None => {
                self.values.insert(path.to_string(), value);
            }
        }
    }

    /// Remove a path (case-insensitive); returns the old value
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let key = self.canonical_key(path)?.to_string();
        self.values.shift_remove(&key)
    }

    /// Get a value coerced to f64 if possible
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(|v| v.as_f64_lossy())
    }

    /// Get a value coerced to bool if possible
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool_lossy())
    }

    /// Merge an incremental change set into a copy of this snapshot
    ///
    /// Null values in the diff delete the key.
    pub fn merge_diff(&self, diff: &Snapshot) -> Snapshot {
        let mut merged = self.clone();
        for (path, value) in diff.values.iter() {
            if value.is_null() {
                merged.remove(path);
            } else {
                merged.set(path, value.clone());
            }
        }
        merged.timestamp = diff.timestamp;
        merged.sequence = diff.sequence.max(self.sequence);
        merged.is_diff = false;
        merged
    }

    /// Drop null entries in place
    pub fn compact(&mut self) {
        self.values.retain(|_, v| !v.is_null());
    }

    /// Number of paths
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no paths are present
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (path, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal changed/removed path set between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Paths that were added or changed, with their new values
    pub changed: ValueMap,
    /// Paths whose value became null (deleted)
    pub removed: Vec<String>,
}

impl DiffResult {
    /// Create an empty diff
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Total number of affected paths
    pub fn len(&self) -> usize {
        self.changed.len() + self.removed.len()
    }

    /// Flatten into a single map where removals carry `Value::Null`
    ///
    /// This is the wire payload shape for incremental messages.
    pub fn to_wire_map(&self) -> ValueMap {
        let mut map = self.changed.clone();
        for path in &self.removed {
            map.insert(path.clone(), Value::Null);
        }
        map
    }

    /// Rebuild from a wire payload map (nulls become removals)
    pub fn from_wire_map(map: &ValueMap) -> Self {
        let mut diff = DiffResult::new();
        for (path, value) in map.iter() {
            if value.is_null() {
                diff.removed.push(path.clone());
            } else {
                diff.changed.insert(path.clone(), value.clone());
            }
        }
        diff
    }
}
