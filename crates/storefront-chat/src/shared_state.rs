//! Shared state for the chat server
//!
//! One `SharedSystemState` is built at startup and handed to every handler
//! through the cloneable `UnifiedAppState` wrapper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::chat::{TurnConfig, TurnOrchestrator};
use crate::gateway::LanguageModel;
use crate::hub::{ConversationHub, LivenessConfig};
use crate::store::{ChatDatabase, ContextStore};

/// Process-wide counters for the admin stats endpoint
#[derive(Default)]
pub struct AtomicCounters {
    pub total_connections: AtomicUsize,
    pub active_connections: AtomicUsize,
    pub messages_received: AtomicUsize,
    pub malformed_events: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) -> usize {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.active_connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    pub fn inc_messages_received(&self) -> usize {
        self.messages_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_malformed_events(&self) -> usize {
        self.malformed_events.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct SharedSystemState {
    pub database: Arc<ChatDatabase>,
    pub hub: Arc<ConversationHub>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub counters: Arc<AtomicCounters>,
    pub started_at: Instant,
}

impl SharedSystemState {
    pub fn new(
        database: Arc<ChatDatabase>,
        model: Arc<dyn LanguageModel>,
        turn_config: TurnConfig,
    ) -> Self {
        Self::with_liveness(database, model, turn_config, LivenessConfig::default())
    }

    pub fn with_liveness(
        database: Arc<ChatDatabase>,
        model: Arc<dyn LanguageModel>,
        turn_config: TurnConfig,
        liveness: LivenessConfig,
    ) -> Self {
        let hub = Arc::new(ConversationHub::with_liveness(liveness));
        let store: Arc<dyn ContextStore> = database.clone();
        let orchestrator = Arc::new(TurnOrchestrator::new(store, model, Arc::clone(&hub), turn_config));
        info!("Shared state initialized");
        Self {
            database,
            hub,
            orchestrator,
            counters: Arc::new(AtomicCounters::new()),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Router state; cheap to clone per request
#[derive(Clone)]
pub struct UnifiedAppState {
    pub shared_state: Arc<SharedSystemState>,
}

impl UnifiedAppState {
    pub fn new(shared_state: Arc<SharedSystemState>) -> Self {
        Self { shared_state }
    }
}
