//! Connection-to-conversation registry with broadcast and stale-connection sweep

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{ConnectionHandle, ConnectionId};
use super::events::OutboundEvent;
use crate::metrics;

#[derive(Default)]
struct RegistryTable {
    by_connection: HashMap<ConnectionId, (String, ConnectionHandle)>,
    by_conversation: HashMap<String, HashSet<ConnectionId>>,
}

impl RegistryTable {
    fn remove(&mut self, connection_id: ConnectionId) -> Option<String> {
        let (conversation_id, _) = self.by_connection.remove(&connection_id)?;
        if let Some(members) = self.by_conversation.get_mut(&conversation_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.by_conversation.remove(&conversation_id);
            }
        }
        Some(conversation_id)
    }
}

/// Keepalive timing for WebSocket peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often the server pings each socket
    pub ping_interval: Duration,
    /// A peer silent for this long (pongs included) counts as gone
    pub idle_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Which live connections are subscribed to which conversation.
///
/// Both indexes sit behind one lock so they never disagree. Sends happen
/// outside the lock on a snapshot of the target handles.
#[derive(Default)]
pub struct ConversationHub {
    table: RwLock<RegistryTable>,
    liveness: LivenessConfig,
}

impl ConversationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_liveness(liveness: LivenessConfig) -> Self {
        Self {
            table: RwLock::default(),
            liveness,
        }
    }

    pub fn liveness(&self) -> LivenessConfig {
        self.liveness
    }

    // A panic while holding the lock leaves both indexes consistent, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, RegistryTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe `connection` to `conversation_id`, replacing any earlier
    /// subscription, and acknowledge with `joined` to that connection only.
    /// Returns false when the id is blank.
    pub fn register(&self, connection: &ConnectionHandle, conversation_id: &str) -> bool {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            warn!("Ignoring join with empty conversation id from connection {}", connection.id());
            return false;
        }

        let count = {
            let mut table = self.write();
            table.remove(connection.id());
            table
                .by_connection
                .insert(connection.id(), (conversation_id.to_string(), connection.clone()));
            table
                .by_conversation
                .entry(conversation_id.to_string())
                .or_default()
                .insert(connection.id());
            table.by_connection.len()
        };
        metrics::set_registrations(count);

        debug!("Connection {} joined conversation {}", connection.id(), conversation_id);
        connection.send(OutboundEvent::Joined { conversation_id: conversation_id.to_string() });
        true
    }

    /// Drop the connection's subscription, if any.
    pub fn unregister(&self, connection_id: ConnectionId) {
        let (removed, count) = {
            let mut table = self.write();
            let removed = table.remove(connection_id);
            (removed, table.by_connection.len())
        };
        if let Some(conversation_id) = removed {
            debug!("Connection {} left conversation {}", connection_id, conversation_id);
            metrics::set_registrations(count);
        }
    }

    /// Deliver `event` to every live connection of the conversation except
    /// `exclude`. Returns how many connections accepted it.
    pub fn broadcast(&self, conversation_id: &str, event: &OutboundEvent, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<ConnectionHandle> = {
            let table = self.read();
            match table.by_conversation.get(conversation_id) {
                Some(members) => members
                    .iter()
                    .filter(|id| Some(**id) != exclude)
                    .filter_map(|id| table.by_connection.get(id).map(|(_, handle)| handle.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let delivered = targets
            .iter()
            .filter(|handle| handle.is_live(self.liveness.idle_timeout) && handle.send(event.clone()))
            .count();
        debug!(
            "Broadcast {} to {}/{} connections of conversation {}",
            event.event_type(),
            delivered,
            targets.len(),
            conversation_id
        );
        delivered
    }

    /// Remove registrations whose transport has closed or whose peer has been
    /// silent past the idle timeout. Returns how many were reclaimed.
    pub fn sweep(&self) -> usize {
        let idle_timeout = self.liveness.idle_timeout;
        let (reclaimed, count) = {
            let mut table = self.write();
            let stale: Vec<ConnectionId> = table
                .by_connection
                .iter()
                .filter(|(_, (_, handle))| !handle.is_live(idle_timeout))
                .map(|(id, _)| *id)
                .collect();
            for id in &stale {
                table.remove(*id);
            }
            (stale.len(), table.by_connection.len())
        };
        if reclaimed > 0 {
            info!("Sweep reclaimed {} stale connection(s)", reclaimed);
            metrics::set_registrations(count);
        }
        reclaimed
    }

    /// Run `sweep` every `interval` until the returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }

    pub fn registration_count(&self) -> usize {
        self.read().by_connection.len()
    }

    pub fn conversation_count(&self) -> usize {
        self.read().by_conversation.len()
    }

    pub fn connections_for(&self, conversation_id: &str) -> Vec<ConnectionId> {
        self.read()
            .by_conversation
            .get(conversation_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn conversation_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.read()
            .by_connection
            .get(&connection_id)
            .map(|(conversation_id, _)| conversation_id.clone())
    }
}
