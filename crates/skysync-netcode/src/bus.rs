//! Network bus abstraction
//!
//! The sync layer never talks to sockets directly; it sends and receives
//! opaque byte payloads through a [`NetworkBus`]. Concrete transports
//! (WebSocket, UDP relay, ...) implement the trait; [`MemoryBus`] wires
//! two endpoints together in memory for tests.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Abstract message bus between peers
///
/// `send` targets the current peer (client -> host), `broadcast` fans out
/// to all connected peers (host only; for a point-to-point transport it is
/// the same as `send`). `try_recv` is non-blocking and returns `Ok(None)`
/// when no message is waiting.
pub trait NetworkBus: Send + Sync {
    /// Send a payload to the current peer
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Broadcast a payload to all connected peers (host only)
    fn broadcast(&self, payload: &[u8]) -> Result<()>;

    /// Pull the next inbound payload, if any
    fn try_recv(&self) -> Result<Option<Vec<u8>>>;

    /// Whether the transport currently has a live connection
    fn is_connected(&self) -> bool;

    /// Close the transport; further sends fail with `Disconnected`
    fn close(&self);
}

/// In-memory bus endpoint for tests and local loopback
///
/// Created in cross-linked pairs: what one endpoint sends, the other
/// receives in order.
#[derive(Debug)]
pub struct MemoryBus {
    /// Inbox of the remote endpoint
    peer_inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Our own inbox
    inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    connected: Arc<AtomicBool>,
}

impl MemoryBus {
    /// Create two connected endpoints
    pub fn pair() -> (MemoryBus, MemoryBus) {
        let a_inbox = Arc::new(Mutex::new(VecDeque::new()));
        let b_inbox = Arc::new(Mutex::new(VecDeque::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let a = MemoryBus {
            peer_inbox: Arc::clone(&b_inbox),
            inbox: Arc::clone(&a_inbox),
            connected: Arc::clone(&connected),
        };
        let b = MemoryBus {
            peer_inbox: a_inbox,
            inbox: b_inbox,
            connected,
        };
        (a, b)
    }

    /// Drain every queued inbound payload
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut inbox = lock(&self.inbox);
        inbox.drain(..).collect()
    }

    /// Number of queued inbound payloads
    pub fn pending(&self) -> usize {
        lock(&self.inbox).len()
    }
}

impl NetworkBus for MemoryBus {
    fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        lock(&self.peer_inbox).push_back(payload.to_vec());
        Ok(())
    }

    fn broadcast(&self, payload: &[u8]) -> Result<()> {
        // Point-to-point pair: broadcast degenerates to send.
        self.send(payload)
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.inbox).pop_front())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
