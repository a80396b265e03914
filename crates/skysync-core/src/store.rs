//! Canonical state store
//!
//! One [`StateStore`] per process is the single source of truth for the
//! aircraft state. All access goes through a single mutex; the live map is
//! never handed out, only defensive clones.

use crate::snapshot::{DiffResult, Snapshot};
use crate::value::Value;
use std::sync::Mutex;

/// Canonical flat map of path -> value, shared across threads
///
/// Callers on the sampler, transport, animation, and persistence flows all
/// serialize through the internal mutex. Contention is low: diffing is
/// infrequent relative to per-key animation ticks, which touch disjoint
/// keys.
#[derive(Debug)]
pub struct StateStore {
    inner: Mutex<Inner>,
    /// Paths every peer must report even before the first sample.
    /// Removals of these keys keep the key present as `Null`.
    defaults: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    snapshot: Snapshot,
    sequence: u64,
}

impl StateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_defaults(Vec::new())
    }

    /// Create a store with a default-key list
    ///
    /// Default keys are seeded as `Null` so every peer exposes the same
    /// schema from the start.
    pub fn with_defaults(defaults: Vec<String>) -> Self {
        let mut snapshot = Snapshot::new();
        for key in &defaults {
            snapshot.set(key, Value::Null);
        }
        Self {
            inner: Mutex::new(Inner {
                snapshot,
                sequence: 0,
            }),
            defaults,
        }
    }

    /// Seed the store from a previously persisted snapshot
    pub fn seed(&self, snapshot: &Snapshot) {
        let mut inner = self.lock();
        for (path, value) in snapshot.iter() {
            inner.snapshot.set(path, value.clone());
        }
        inner.sequence += 1;
        let seq = inner.sequence;
        inner.snapshot.sequence = seq;
    }

    /// Get one value by path (case-insensitive), cloned
    pub fn get(&self, path: &str) -> Option<Value> {
        let inner = self.lock();
        inner.snapshot.get(path).cloned()
    }

    /// Get one value coerced to f64
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        let inner = self.lock();
        inner.snapshot.get_f64(path)
    }

    /// Get one value coerced to bool
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        let inner = self.lock();
        inner.snapshot.get_bool(path)
    }

    /// Set one value by path
    pub fn set(&self, path: &str, value: Value) {
        let mut inner = self.lock();
        inner.snapshot.set(path, value);
        inner.bump();
    }

    /// Delete one path; default keys are kept as `Null`
    pub fn remove(&self, path: &str) {
        let mut inner = self.lock();
        if self.is_default_key(path) {
            inner.snapshot.set(path, Value::Null);
        } else if inner.snapshot.remove(path).is_none() {
            return;
        }
        inner.bump();
    }

    /// Overwrite every changed path, delete every removed path
    ///
    /// Removed paths on the default-key list are kept as `Null` instead of
    /// deleted, so the default schema stays visible.
    pub fn apply_diff(&self, diff: &DiffResult) {
        let mut inner = self.lock();
        for (path, value) in diff.changed.iter() {
            inner.snapshot.set(path, value.clone());
        }
        for path in &diff.removed {
            if self.is_default_key(path) {
                inner.snapshot.set(path, Value::Null);
            } else {
                inner.snapshot.remove(path);
            }
        }
        inner.bump();
    }

    /// Replace the whole state with a full snapshot
    ///
    /// Default keys absent from the incoming snapshot are re-seeded as
    /// `Null`.
    pub fn replace(&self, snapshot: &Snapshot) {
        let mut inner = self.lock();
        let mut next = snapshot.clone();
        next.is_diff = false;
        for key in &self.defaults {
            if next.get(key).is_none() {
                next.set(key, Value::Null);
            }
        }
        inner.snapshot = next;
        inner.bump();
    }

    /// Immutable copy of the current state for safe cross-thread hand-off
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        inner.snapshot.clone()
    }

    /// Number of known paths
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.snapshot.len()
    }

    /// True when no paths are known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_default_key(&self, path: &str) -> bool {
        self.defaults.iter().any(|k| k.eq_ignore_ascii_case(path))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-write; the state map itself
        // stays structurally valid, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn bump(&mut self) {
        self.sequence += 1;
        self.snapshot.sequence = self.sequence;
        self.snapshot.timestamp = chrono::Utc::now();
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueMap;

    #[test]
    fn test_set_and_get() {
        let store = StateStore::new();
        store.set("Controls.Throttle", Value::Float(0.8));

        assert_eq!(store.get("controls.throttle"), Some(Value::Float(0.8)));
        assert_eq!(store.get("Controls.Flaps"), None);
    }

    #[test]
    fn test_snapshot_is_defensive_copy() {
        let store = StateStore::new();
        store.set("Controls.Flaps", Value::Float(5.0));

        let snap = store.snapshot();
        store.set("Controls.Flaps", Value::Float(10.0));

        assert_eq!(snap.get_f64("Controls.Flaps"), Some(5.0));
        assert_eq!(store.get_f64("Controls.Flaps"), Some(10.0));
    }

    #[test]
    fn test_apply_diff_changes_and_removals() {
        let store = StateStore::new();
        store.set("A", Value::Float(1.0));
        store.set("B", Value::Float(2.0));

        let mut diff = DiffResult::new();
        diff.changed.insert("B".into(), Value::Float(3.0));
        diff.removed.push("A".into());
        store.apply_diff(&diff);

        assert_eq!(store.get("A"), None);
        assert_eq!(store.get_f64("B"), Some(3.0));
    }

    #[test]
    fn test_default_keys_survive_removal_as_null() {
        let store = StateStore::with_defaults(vec!["Systems.LightsOn".into()]);
        store.set("Systems.LightsOn", Value::Bool(true));

        let mut diff = DiffResult::new();
        diff.removed.push("Systems.LightsOn".into());
        store.apply_diff(&diff);

        assert_eq!(store.get("Systems.LightsOn"), Some(Value::Null));
    }

    #[test]
    fn test_remove_respects_default_keys() {
        let store = StateStore::with_defaults(vec!["Systems.LightsOn".into()]);
        store.set("Systems.LightsOn", Value::Bool(true));
        store.set("Custom.Key", Value::Int(1));

        store.remove("Systems.LightsOn");
        store.remove("Custom.Key");

        assert_eq!(store.get("Systems.LightsOn"), Some(Value::Null));
        assert_eq!(store.get("Custom.Key"), None);
    }

    #[test]
    fn test_replace_reseeds_default_keys() {
        let store = StateStore::with_defaults(vec!["Systems.DoorOpen".into()]);

        let mut incoming = ValueMap::new();
        incoming.insert("Controls.Throttle".into(), Value::Float(0.2));
        store.replace(&Snapshot::from_values(incoming));

        assert_eq!(store.get_f64("Controls.Throttle"), Some(0.2));
        assert_eq!(store.get("Systems.DoorOpen"), Some(Value::Null));
    }

    #[test]
    fn test_sequence_increases_on_mutation() {
        let store = StateStore::new();
        store.set("A", Value::Int(1));
        let first = store.snapshot().sequence;
        store.set("A", Value::Int(2));
        let second = store.snapshot().sequence;

        assert!(second > first);
    }
}
