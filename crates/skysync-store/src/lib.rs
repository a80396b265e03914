//! Skysync Store - Durable snapshot persistence
//!
//! Persists the converged flat state to a JSON file so a restarted peer
//! rejoins with reasonably fresh last-known state. Writes are throttled
//! and content-hashed; persistence failures are transient and never fatal
//! to the sync engine.

mod error;
mod snapshot_store;

pub use error::{Error, Result};
pub use snapshot_store::{SnapshotStore, DEFAULT_MIN_INTERVAL};
