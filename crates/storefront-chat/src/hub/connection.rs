use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::events::OutboundEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The sending half of one live connection. The socket writer task owns the
/// receiver; once it exits the handle reports itself closed.
///
/// Clones share the last-seen mark, so the reader loop refreshing its copy
/// keeps the registered copy alive.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<OutboundEvent>,
    opened_at: Instant,
    /// Milliseconds after `opened_at` of the last inbound frame
    last_seen_ms: Arc<AtomicU64>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            opened_at: Instant::now(),
            last_seen_ms: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Record that the peer just sent a frame.
    pub fn touch(&self) {
        let now_ms = self.opened_at.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// Time since the peer last sent anything (or since the connection opened).
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last_seen)
    }

    /// Writable and heard from within `idle_timeout`.
    pub fn is_live(&self, idle_timeout: Duration) -> bool {
        self.is_writable() && self.idle_for() < idle_timeout
    }

    /// Queue an event for the writer task. Returns false if the connection is gone.
    pub fn send(&self, event: OutboundEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}
