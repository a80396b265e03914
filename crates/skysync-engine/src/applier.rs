//! Command application: abstract path -> simulator effect
//!
//! Maps one path/value pair onto a writable simulator variable, a
//! discrete trigger event, or a local-only mirror, favoring availability:
//! the value is always mirrored into the state store, even when no
//! descriptor matches or the simulator rejects the write, so observers
//! see the new value immediately instead of waiting for a read-back.

use crate::sim::SimAccess;
use skysync_core::{Catalog, EventDescriptor, StateStore, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies path/value changes to the simulator and the local mirror
pub struct CommandApplier {
    catalog: Arc<Catalog>,
    sim: Arc<dyn SimAccess>,
    store: Arc<StateStore>,
}

impl CommandApplier {
    /// Create an applier over the given catalog, simulator, and store
    pub fn new(catalog: Arc<Catalog>, sim: Arc<dyn SimAccess>, store: Arc<StateStore>) -> Self {
        Self {
            catalog,
            sim,
            store,
        }
    }

    /// Apply one change
    ///
    /// Returns true when at least one external channel (variable write or
    /// event trigger) accepted the value. The local mirror is updated
    /// regardless, and collaborator failures are logged, never raised.
    pub fn apply(&self, path: &str, value: &Value) -> bool {
        let mut applied = false;

        if let Some(descriptor) = self.catalog.var(path) {
            if descriptor.writable {
                match self.sim.write_var(descriptor, value) {
                    Ok(true) => applied = true,
                    Ok(false) => {
                        warn!(path, "simulator rejected variable write");
                    }
                    Err(err) => {
                        warn!(path, error = %err, "variable write failed");
                    }
                }
            }
            // Dual-channel controls also fire their bound event. The bound
            // name is authoritative here; a standalone descriptor on the
            // same path is a separate channel, fired below.
            if let Some(event) = &descriptor.event {
                let bound = EventDescriptor {
                    path: descriptor.path.clone(),
                    event: event.clone(),
                    category: String::new(),
                };
                applied |= self.fire(&bound, value);
            }
        }

        if let Some(descriptor) = self.catalog.event(path) {
            applied |= self.fire(descriptor, value);
        }

        if !applied {
            debug!(path, "no external channel matched, mirroring only");
        }
        self.store.set(path, value.clone());
        applied
    }

    fn fire(&self, descriptor: &EventDescriptor, value: &Value) -> bool {
        match self.sim.trigger_event(descriptor, value) {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    path = %descriptor.path,
                    event = %descriptor.event,
                    "simulator rejected event trigger"
                );
                false
            }
            Err(err) => {
                warn!(
                    path = %descriptor.path,
                    event = %descriptor.event,
                    error = %err,
                    "event trigger failed"
                );
                false
            }
        }
    }
}
