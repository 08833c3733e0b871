//! Wire events exchanged over the chat WebSocket

use serde::{Deserialize, Serialize};

use crate::store::Message;

/// Client to server. Ids and content are optional on the wire so a frame
/// with missing fields still parses and can be answered with a targeted error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    JoinConversation {
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<String>,
    },
    SendMessage {
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    TypingStart {
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<String>,
    },
    TypingStop {
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<String>,
    },
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Joined {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    NewMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        message: Message,
    },
    TypingStart {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    TypingStop {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Error {
        message: String,
    },
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error { message: message.into() }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundEvent::Joined { .. } => "joined",
            OutboundEvent::NewMessage { .. } => "new_message",
            OutboundEvent::TypingStart { .. } => "typing_start",
            OutboundEvent::TypingStop { .. } => "typing_stop",
            OutboundEvent::Error { .. } => "error",
        }
    }
}
