//! Diff computation between streaming state samples
//!
//! Turns a nested or flat state object into a flat dotted-path mapping,
//! then compares it against the last-committed flattening held per
//! logical source. Local samples and each distinguishable remote source
//! get independent baselines so one writer's history never masks
//! another's changes.

use skysync_core::{Catalog, DiffResult, Value, ValueMap};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Default numeric equality tolerance
pub const DEFAULT_EPSILON: f64 = 0.001;

/// Result of one diff computation
#[derive(Debug, Clone, PartialEq)]
pub enum DiffPayload {
    /// Bootstrap/resync: the whole flat state, baseline replaced wholesale
    Full(ValueMap),
    /// Only what changed since the source's baseline
    Partial(DiffResult),
}

/// Per-source baseline diff engine
pub struct DiffEngine {
    catalog: Arc<Catalog>,
    epsilon: f64,
    /// source id -> lowercase path -> (declared casing, value)
    baselines: Mutex<HashMap<String, Baseline>>,
}

type Baseline = HashMap<String, (String, Value)>;

impl DiffEngine {
    /// Create an engine with the default tolerance
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_epsilon(catalog, DEFAULT_EPSILON)
    }

    /// Create an engine with a custom default tolerance
    pub fn with_epsilon(catalog: Arc<Catalog>, epsilon: f64) -> Self {
        Self {
            catalog,
            epsilon,
            baselines: Mutex::new(HashMap::new()),
        }
    }

    /// Compute the minimal change set for `source` since its baseline
    ///
    /// Returns a full payload when no baseline exists or `force_full` is
    /// set, a partial payload when keys changed, and `None` when nothing
    /// changed — callers must not transmit on `None`.
    pub fn compute_diff(
        &self,
        source: &str,
        values: &ValueMap,
        force_full: bool,
    ) -> Option<DiffPayload> {
        let flat = flatten(values);
        let mut baselines = self.lock();
        let baseline = baselines.entry(source.to_string()).or_default();

        if baseline.is_empty() || force_full {
            *baseline = to_baseline(&flat);
            return Some(DiffPayload::Full(flat));
        }

        let mut diff = DiffResult::new();
        for (path, value) in flat.iter() {
            let key = path.to_ascii_lowercase();
            let changed = match baseline.get(&key) {
                Some((_, previous)) => !self.values_equal(path, previous, value),
                None => true,
            };
            if changed {
                diff.changed.insert(path.clone(), value.clone());
                baseline.insert(key, (path.clone(), value.clone()));
            }
        }

        let removed_keys: Vec<String> = baseline
            .keys()
            .filter(|k| !flat.keys().any(|p| p.eq_ignore_ascii_case(k)))
            .cloned()
            .collect();
        for key in removed_keys {
            if let Some((path, _)) = baseline.remove(&key) {
                diff.removed.push(path);
            }
        }

        if diff.is_empty() {
            None
        } else {
            Some(DiffPayload::Partial(diff))
        }
    }

    /// Replace `source`'s baseline without emitting a diff
    ///
    /// Used when a full snapshot arrives from a peer: the next local diff
    /// is then measured against the now-known-converged state instead of
    /// stale local history.
    pub fn commit_external_state(&self, source: &str, values: &ValueMap) {
        let flat = flatten(values);
        let mut baselines = self.lock();
        baselines.insert(source.to_string(), to_baseline(&flat));
    }

    /// Fold one externally applied value into a source's baseline
    ///
    /// Applying a remote change locally must not make the next local diff
    /// re-send it as our own.
    pub fn commit_value(&self, source: &str, path: &str, value: &Value) {
        let mut baselines = self.lock();
        let baseline = baselines.entry(source.to_string()).or_default();
        baseline.insert(
            path.to_ascii_lowercase(),
            (path.to_string(), value.clone()),
        );
    }

    /// Drop one path from a source's baseline after an external removal
    pub fn retract_value(&self, source: &str, path: &str) {
        let mut baselines = self.lock();
        if let Some(baseline) = baselines.get_mut(source) {
            baseline.remove(&path.to_ascii_lowercase());
        }
    }

    /// Drop a source's baseline so its next diff is a full payload
    pub fn reset(&self, source: &str) {
        self.lock().remove(source);
    }

    /// Tolerance-aware value equality
    ///
    /// Precedence: numeric-coercible values compare within epsilon (the
    /// key's `min_delta` when declared), boolean-coercible exactly, and
    /// everything else as case-insensitive strings. `Null` equals only
    /// `Null`.
    pub fn values_equal(&self, path: &str, a: &Value, b: &Value) -> bool {
        if a.is_null() || b.is_null() {
            return a.is_null() && b.is_null();
        }
        if let (Some(da), Some(db)) = (a.as_f64_lossy(), b.as_f64_lossy()) {
            let epsilon = self.catalog.min_delta(path).unwrap_or(self.epsilon);
            return (da - db).abs() < epsilon;
        }
        if let (Some(ba), Some(bb)) = (a.as_bool_lossy(), b.as_bool_lossy()) {
            return ba == bb;
        }
        a.to_string().eq_ignore_ascii_case(&b.to_string())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Baseline>> {
        self.baselines.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Flatten a possibly nested value map into dotted paths
pub fn flatten(values: &ValueMap) -> ValueMap {
    let mut flat = ValueMap::new();
    flatten_into(values, None, &mut flat);
    flat
}

fn flatten_into(values: &ValueMap, prefix: Option<&str>, out: &mut ValueMap) {
    for (key, value) in values.iter() {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Map(nested) => flatten_into(nested, Some(&path), out),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

fn to_baseline(flat: &ValueMap) -> Baseline {
    flat.iter()
        .map(|(path, value)| {
            (
                path.to_ascii_lowercase(),
                (path.clone(), value.clone()),
            )
        })
        .collect()
}
