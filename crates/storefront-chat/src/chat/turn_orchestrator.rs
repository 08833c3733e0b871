//! Per-message pipeline: persist the user turn, gather store context, call the
//! model, persist and broadcast exactly one assistant reply.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chat::retrieval_planner::RetrievalPlanner;
use crate::gateway::{classify_intent, Generation, GenerationFailed, GenerationRequest, Intent, LanguageModel};
use crate::hub::{ConnectionHandle, ConversationHub, OutboundEvent};
use crate::metrics;
use crate::store::{
    ContextStore, Conversation, ConversationStatus, Message, MessageRole, Metadata,
    NewInteractionLog, StoreContext,
};

/// Sent to the customer whenever no real reply could be produced.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I'm having trouble answering right now. Please try again in a moment.";

const MAX_METADATA_HANDLES: usize = 5;

#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Prior messages sent to the model with each turn
    pub history_limit: usize,
    pub generation_timeout: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    UserPersisted,
    ContextResolved,
    ModelInvoked,
    AssistantPersisted,
    Broadcast,
    Done,
    Fallback,
    Rejected,
}

/// Reasons a turn is refused before anything is generated
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error("conversation {0} not found")]
    ConversationNotFound(String),
    #[error("conversation {id} is {status}")]
    ConversationInactive { id: String, status: ConversationStatus },
    #[error("failed to persist user message: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl TurnError {
    /// Text safe to show the customer
    pub fn client_message(&self) -> String {
        match self {
            TurnError::Invalid(reason) => reason.to_string(),
            TurnError::ConversationNotFound(_) => "Conversation not found".to_string(),
            TurnError::ConversationInactive { status, .. } => format!("This conversation is {}", status),
            TurnError::Persistence(_) => "Failed to send message".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: TurnState,
    pub user_message: Option<Message>,
    pub assistant_message: Option<Message>,
    pub intent: Option<Intent>,
}

impl TurnOutcome {
    fn rejected() -> Self {
        Self {
            state: TurnState::Rejected,
            user_message: None,
            assistant_message: None,
            intent: None,
        }
    }
}

/// Logs every state transition of one turn
struct TurnTrace<'a> {
    conversation_id: &'a str,
    state: TurnState,
}

impl<'a> TurnTrace<'a> {
    fn new(conversation_id: &'a str) -> Self {
        Self { conversation_id, state: TurnState::Received }
    }

    fn advance(&mut self, next: TurnState) {
        debug!("Turn in conversation {}: {:?} -> {:?}", self.conversation_id, self.state, next);
        self.state = next;
    }
}

pub struct TurnOrchestrator {
    store: Arc<dyn ContextStore>,
    model: Arc<dyn LanguageModel>,
    hub: Arc<ConversationHub>,
    planner: RetrievalPlanner,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<dyn ContextStore>,
        model: Arc<dyn LanguageModel>,
        hub: Arc<ConversationHub>,
        config: TurnConfig,
    ) -> Self {
        info!(
            "Turn orchestrator ready (model {}, history {}, timeout {:?})",
            model.model_name(),
            config.history_limit,
            config.generation_timeout
        );
        Self {
            planner: RetrievalPlanner::new(Arc::clone(&store)),
            store,
            model,
            hub,
            config,
        }
    }

    pub fn planner(&self) -> &RetrievalPlanner {
        &self.planner
    }

    /// Run one customer message through the pipeline. Never returns an error:
    /// rejections go to `origin` as an `error` event, everything after the
    /// user message is stored ends in exactly one assistant message.
    pub async fn handle_user_message(
        &self,
        origin: &ConnectionHandle,
        conversation_id: &str,
        content: &str,
    ) -> TurnOutcome {
        let mut trace = TurnTrace::new(conversation_id);

        let (conversation, user_message) = match self.accept(conversation_id, content).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Rejected turn for conversation {} at accept: {}", conversation_id, e);
                trace.advance(TurnState::Rejected);
                origin.send(OutboundEvent::error(e.client_message()));
                metrics::inc_turn("rejected");
                return TurnOutcome::rejected();
            }
        };
        trace.advance(TurnState::UserPersisted);

        self.hub.broadcast(
            conversation_id,
            &OutboundEvent::NewMessage {
                conversation_id: conversation_id.to_string(),
                message: user_message.clone(),
            },
            None,
        );

        let intent = classify_intent(&user_message.content);
        let assistant_message = match self.generate_reply(&mut trace, &conversation, &user_message, intent).await {
            Ok(message) => Some(message),
            Err(reason) => {
                warn!("Falling back in conversation {}: {}", conversation_id, reason);
                trace.advance(TurnState::Fallback);
                self.persist_fallback(conversation_id).await
            }
        };

        match &assistant_message {
            Some(message) => {
                if let Err(e) = self.store.update_conversation_last_message(conversation_id).await {
                    warn!("Failed to update freshness of conversation {}: {}", conversation_id, e);
                }
                self.hub.broadcast(
                    conversation_id,
                    &OutboundEvent::NewMessage {
                        conversation_id: conversation_id.to_string(),
                        message: message.clone(),
                    },
                    None,
                );
                if trace.state != TurnState::Fallback {
                    trace.advance(TurnState::Broadcast);
                    trace.advance(TurnState::Done);
                }
            }
            None => {
                error!("Could not store any reply for conversation {}", conversation_id);
                origin.send(OutboundEvent::error("Failed to generate a reply"));
            }
        }

        metrics::inc_turn(if trace.state == TurnState::Done { "completed" } else { "fallback" });
        TurnOutcome {
            state: trace.state,
            user_message: Some(user_message),
            assistant_message,
            intent: Some(intent),
        }
    }

    async fn accept(&self, conversation_id: &str, content: &str) -> Result<(Conversation, Message), TurnError> {
        if conversation_id.trim().is_empty() {
            return Err(TurnError::Invalid("Conversation ID is required"));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(TurnError::Invalid("Message content is required"));
        }

        let conversation = self.store
            .get_conversation(conversation_id)
            .await
            .map_err(TurnError::Persistence)?
            .ok_or_else(|| TurnError::ConversationNotFound(conversation_id.to_string()))?;
        if conversation.status != ConversationStatus::Active {
            return Err(TurnError::ConversationInactive {
                id: conversation.id,
                status: conversation.status,
            });
        }

        let user_message = self.store
            .create_message(conversation_id, MessageRole::User, content, Metadata::new())
            .await
            .map_err(TurnError::Persistence)?;
        Ok((conversation, user_message))
    }

    /// Steps after the user message is durable, up to a stored assistant message.
    /// Any error here means the caller falls back.
    async fn generate_reply(
        &self,
        trace: &mut TurnTrace<'_>,
        conversation: &Conversation,
        user_message: &Message,
        intent: Intent,
    ) -> anyhow::Result<Message> {
        let context = self.planner
            .resolve_context(&conversation.store_id, intent, &user_message.content)
            .await?;
        let store_name = self.planner.store_name(&conversation.store_id).await;
        let history = self.load_history(&conversation.id, user_message.id).await?;
        trace.advance(TurnState::ContextResolved);

        let request = GenerationRequest {
            history,
            user_text: user_message.content.clone(),
            context: context.clone(),
            store_name,
        };
        let generation = match tokio::time::timeout(self.config.generation_timeout, self.model.generate(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GenerationFailed::new(format!(
                    "timed out after {:?}",
                    self.config.generation_timeout
                ))
                .into())
            }
        };
        metrics::observe_generation_latency(generation.latency_ms as f64 / 1000.0);
        trace.advance(TurnState::ModelInvoked);

        let handles = context.product_handles(MAX_METADATA_HANDLES);
        let assistant_message = self.store
            .create_message(
                &conversation.id,
                MessageRole::Assistant,
                &generation.content,
                reply_metadata(&generation, intent, &handles),
            )
            .await?;
        trace.advance(TurnState::AssistantPersisted);

        let log = NewInteractionLog {
            conversation_id: conversation.id.clone(),
            message_id: assistant_message.id,
            prompt: generation.prompt.clone(),
            response: generation.content.clone(),
            prompt_tokens: generation.prompt_tokens,
            completion_tokens: generation.completion_tokens,
            total_tokens: generation.total_tokens,
            latency_ms: generation.latency_ms,
            context_snapshot: context_summary(&context, &handles),
        };
        if let Err(e) = self.store.create_interaction_log(log).await {
            warn!("Failed to write interaction log for message {}: {}", assistant_message.id, e);
        }

        Ok(assistant_message)
    }

    /// The last `history_limit` messages before `before_id`, oldest first
    async fn load_history(&self, conversation_id: &str, before_id: i64) -> anyhow::Result<Vec<(MessageRole, String)>> {
        let messages = self.store.get_messages(conversation_id).await?;
        let prior: Vec<&Message> = messages.iter().filter(|m| m.id < before_id).collect();
        let skip = prior.len().saturating_sub(self.config.history_limit);
        Ok(prior
            .into_iter()
            .skip(skip)
            .map(|m| (m.role, m.content.clone()))
            .collect())
    }

    async fn persist_fallback(&self, conversation_id: &str) -> Option<Message> {
        let mut metadata = Metadata::new();
        metadata.insert("error".to_string(), json!(true));
        metadata.insert("errorType".to_string(), json!("generation_failed"));

        match self.store
            .create_message(conversation_id, MessageRole::Assistant, FALLBACK_REPLY, metadata)
            .await
        {
            Ok(message) => Some(message),
            Err(e) => {
                error!("Failed to persist fallback reply in conversation {}: {}", conversation_id, e);
                None
            }
        }
    }
}

fn reply_metadata(generation: &Generation, intent: Intent, handles: &[String]) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("model".to_string(), json!(generation.model));
    metadata.insert("promptTokens".to_string(), json!(generation.prompt_tokens));
    metadata.insert("completionTokens".to_string(), json!(generation.completion_tokens));
    metadata.insert("totalTokens".to_string(), json!(generation.total_tokens));
    metadata.insert("responseTimeMs".to_string(), json!(generation.latency_ms));
    metadata.insert("intent".to_string(), json!(intent.as_str()));
    metadata.insert("productHandles".to_string(), json!(handles));
    metadata
}

fn context_summary(context: &StoreContext, handles: &[String]) -> serde_json::Value {
    json!({
        "products": context.products.len(),
        "collections": context.collections.len(),
        "pages": context.pages.len(),
        "blogPosts": context.blog_posts.len(),
        "productHandles": handles,
    })
}
