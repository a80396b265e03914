//! Skysync Netcode - Transport abstraction and wire codec
//!
//! This crate defines how sync messages travel between peers:
//!
//! - [`NetworkBus`]: the abstract transport the sync layer talks to
//! - [`WireEnvelope`]: the single JSON message shape on the wire
//! - [`MemoryBus`]: cross-linked in-memory endpoints for tests
//!
//! The sync layer stays transport-agnostic: a WebSocket host, a UDP
//! relay, or the in-memory pair are all interchangeable behind the trait.

mod bus;
mod envelope;
mod error;

pub use bus::{MemoryBus, NetworkBus};
pub use envelope::{MessageKind, WireEnvelope};
pub use error::{Error, Result};
