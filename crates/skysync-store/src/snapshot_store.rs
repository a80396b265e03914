//! File-backed snapshot persistence
//!
//! Converged state is written to one JSON file on a fixed interval, never
//! on every change, so I/O stays bounded while restarts resume with
//! reasonably fresh state. An unchanged serialization (same hash as the
//! last save) is skipped entirely.

use crate::error::Result;
use skysync_core::ValueMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default minimum spacing between writes
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Durable last-known-state store
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    min_interval: Duration,
    state: Mutex<SaveState>,
}

#[derive(Debug, Default)]
struct SaveState {
    last_save: Option<Instant>,
    last_hash: Option<u64>,
}

impl SnapshotStore {
    /// Create a store writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_min_interval(path, DEFAULT_MIN_INTERVAL)
    }

    /// Create a store with a custom write throttle
    pub fn with_min_interval(path: impl Into<PathBuf>, min_interval: Duration) -> Self {
        Self {
            path: path.into(),
            min_interval,
            state: Mutex::new(SaveState::default()),
        }
    }

    /// File this store reads and writes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last persisted flat snapshot
    ///
    /// A missing file is not an error: returns an empty map.
    pub fn load(&self) -> Result<ValueMap> {
        if !self.path.exists() {
            return Ok(ValueMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let values: ValueMap = serde_json::from_str(&text)?;
        info!(path = %self.path.display(), entries = values.len(), "restored persisted state");
        Ok(values)
    }

    /// Persist the flat snapshot if it changed and the throttle allows
    ///
    /// Returns true when a write actually happened.
    pub fn save_if_changed(&self, values: &ValueMap) -> Result<bool> {
        let json = serde_json::to_string(values)?;
        let hash = text_hash(&json);

        {
            let mut state = self.lock();
            if let Some(last) = state.last_save {
                if last.elapsed() < self.min_interval {
                    return Ok(false);
                }
            }
            if state.last_hash == Some(hash) {
                debug!("snapshot unchanged, skipping save");
                return Ok(false);
            }
            state.last_save = Some(Instant::now());
            state.last_hash = Some(hash);
        }

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(&self.path, json)?;
        info!(path = %self.path.display(), entries = values.len(), "snapshot saved");
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SaveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn text_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
