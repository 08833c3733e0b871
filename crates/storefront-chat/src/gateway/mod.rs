//! Language model gateway: prompt construction, intent classification and the completion client

pub mod intent;
pub mod llm_gateway;
pub mod prompt_builder;

pub use intent::{classify_intent, Intent};
pub use llm_gateway::{LlmGateway, LlmGatewayConfig};
pub use prompt_builder::{PromptBuilder, PromptLimits};

use async_trait::async_trait;
use thiserror::Error;

use crate::store::{MessageRole, StoreContext};

/// Everything one generation needs
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Prior turns, oldest first, already capped by the caller
    pub history: Vec<(MessageRole, String)>,
    pub user_text: String,
    pub context: StoreContext,
    pub store_name: String,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: u64,
    pub model: String,
    /// Exactly what the model was sent, kept for the interaction log
    pub prompt: String,
}

/// Any failure to obtain a usable reply. Callers only distinguish success from failure.
#[derive(Debug, Clone, Error)]
#[error("generation failed: {reason}")]
pub struct GenerationFailed {
    pub reason: String,
}

impl GenerationFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationFailed>;
}
