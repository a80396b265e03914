//! Change notification stream for presentation layers
//!
//! Renderers (console display, desktop window, browser dashboard bridge)
//! register a [`ChangeListener`] and receive per-path changes plus
//! periodic full snapshots, without any coupling to the transport or the
//! simulator.
//!
//! Call context: listeners run synchronously on whichever thread applied
//! the change (transport delivery, animation worker, or the engine's pump
//! thread). Listeners must not block.

use skysync_core::{Snapshot, Value};
use std::sync::{Arc, RwLock};

/// Observer of state changes
pub trait ChangeListener: Send + Sync {
    /// One path changed to a new value
    fn on_change(&self, path: &str, value: &Value);

    /// A full snapshot was applied or emitted
    fn on_snapshot(&self, snapshot: &Snapshot) {
        let _ = snapshot;
    }
}

/// Registered listeners, shared across the engine's threads
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl ListenerSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn register(&self, listener: Arc<dyn ChangeListener>) {
        self.write().push(listener);
    }

    /// Notify all listeners of one changed path
    pub fn notify_change(&self, path: &str, value: &Value) {
        for listener in self.read().iter() {
            listener.on_change(path, value);
        }
    }

    /// Notify all listeners of a full snapshot
    pub fn notify_snapshot(&self, snapshot: &Snapshot) {
        for listener in self.read().iter() {
            listener.on_snapshot(snapshot);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn ChangeListener>>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn ChangeListener>>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}
