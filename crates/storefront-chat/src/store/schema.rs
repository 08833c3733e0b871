//! Entity definitions for the context store
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Free-form JSON metadata attached to conversations and messages
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A merchant installation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: String,
    pub shop_domain: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Closed => "closed",
            ConversationStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "closed" => Ok(ConversationStatus::Closed),
            "archived" => Ok(ConversationStatus::Archived),
            other => Err(anyhow::anyhow!("Unknown conversation status: {}", other)),
        }
    }
}

/// One customer chat session with a store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub store_id: String,
    pub session_token: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub status: ConversationStatus,
    pub started_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Fields supplied by the widget when a session starts
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub store_id: String,
    pub session_token: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(anyhow::anyhow!("Unknown message role: {}", other)),
        }
    }
}

/// Immutable chat message; ids increase with creation order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Audit record of one successful model exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InteractionLog {
    pub id: i64,
    pub conversation_id: String,
    pub message_id: i64,
    pub prompt: String,
    pub response: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: u64,
    pub context_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewInteractionLog {
    pub conversation_id: String,
    pub message_id: i64,
    pub prompt: String,
    pub response: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: u64,
    pub context_snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub product_type: Option<String>,
    pub vendor: Option<String>,
    #[serde(default = "default_product_status")]
    pub status: String,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_product_status() -> String {
    "active".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub products_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    pub id: String,
    pub handle: String,
    pub title: String,
    pub excerpt: Option<String>,
    #[serde(default)]
    pub body: String,
}

/// The bounded slice of catalog/content data offered to the model for one turn
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreContext {
    pub products: Vec<Product>,
    pub collections: Vec<Collection>,
    pub pages: Vec<Page>,
    pub blog_posts: Vec<BlogPost>,
}

impl StoreContext {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
            && self.collections.is_empty()
            && self.pages.is_empty()
            && self.blog_posts.is_empty()
    }

    /// Handles of the first `limit` products, for traceability in message metadata
    pub fn product_handles(&self, limit: usize) -> Vec<String> {
        self.products.iter().take(limit).map(|p| p.handle.clone()).collect()
    }
}

/// Full catalog push for one store
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub shop_domain: String,
    pub name: String,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub collections: Vec<Collection>,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub blog_posts: Vec<BlogPost>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogImportStats {
    pub products: usize,
    pub collections: usize,
    pub pages: usize,
    pub blog_posts: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub total_stores: i64,
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_interaction_logs: i64,
    pub total_products: i64,
    pub conversations_by_status: HashMap<String, i64>,
}
