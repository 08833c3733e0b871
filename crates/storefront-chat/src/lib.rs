pub mod chat;
pub mod config;
pub mod gateway;
pub mod hub;
pub mod metrics;
pub mod shared_state;
pub mod store;
pub mod telemetry;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod chat_server;

// Public API exports
pub use chat::{TurnConfig, TurnOrchestrator, TurnOutcome, TurnState};
pub use config::Config;
pub use gateway::{Generation, GenerationFailed, GenerationRequest, LanguageModel, LlmGateway};
pub use hub::{ConnectionHandle, ConnectionId, ConversationHub, InboundEvent, LivenessConfig, OutboundEvent};
pub use store::{ChatDatabase, ContextStore};

#[cfg(feature = "cli")]
pub use chat_server::{build_router, run_chat_server};
