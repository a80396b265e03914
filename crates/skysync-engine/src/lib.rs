//! Multi-peer aircraft state synchronization
//!
//! This crate is the orchestration layer of skysync. One peer is the
//! host, the rest are clients; every peer samples its own simulator,
//! diffs the sample against what it last told the others, and ships only
//! the change set. Inbound changes are filtered for echoes and
//! duplicates, then applied back into the simulator, with continuous
//! controls interpolated rather than snapped.
//!
//! The entry point is [`SyncManager`]; the pieces it coordinates
//! ([`DiffEngine`], [`AnimatedReconciler`], [`CommandApplier`]) are
//! public for callers that need finer control or direct testing.

pub mod applier;
pub mod config;
pub mod diff;
pub mod error;
pub mod manager;
pub mod notify;
pub mod reconciler;
pub mod sim;

pub use applier::CommandApplier;
pub use config::{AnimationSettings, Role, SyncConfig};
pub use diff::{flatten, DiffEngine, DiffPayload, DEFAULT_EPSILON};
pub use error::{Error, Result};
pub use manager::SyncManager;
pub use notify::{ChangeListener, ListenerSet};
pub use reconciler::{plan_steps, AnimatedReconciler, WriteSink};
pub use sim::{MockSim, SimAccess};
