use crate::store::schema::*;
use rusqlite::{params, Row, Connection, OptionalExtension};
use chrono::{DateTime, Utc, NaiveDateTime, SecondsFormat};
use uuid::Uuid;
use tracing::{info, debug, warn};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Conversations, messages and interaction logs
#[derive(Clone)]
pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

/// Fixed-width UTC timestamps so lexical order in SQLite matches time order.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    None
}

fn parse_metadata(json: &str) -> Metadata {
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!("Discarding unreadable metadata: {}", e);
        Metadata::new()
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, store_id, session_token, customer_name, customer_email, status, started_at, last_message_at, metadata";

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn create_conversation(&self, new: &NewConversation) -> anyhow::Result<Conversation> {
        let conn = self.get_conn()?;
        Self::insert_conversation(&conn, new)
    }

    fn insert_conversation(conn: &Connection, new: &NewConversation) -> anyhow::Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = format_timestamp(&now);
        let metadata_json = serde_json::to_string(&new.metadata)?;

        conn.execute(
            "INSERT INTO conversations
             (id, store_id, session_token, customer_name, customer_email, status, started_at, last_message_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &id,
                &new.store_id,
                &new.session_token,
                &new.customer_name,
                &new.customer_email,
                ConversationStatus::Active.as_str(),
                &now_str,
                &now_str,
                metadata_json,
            ],
        )?;

        info!("Created conversation {} for store {}", id, new.store_id);
        Ok(Conversation {
            id,
            store_id: new.store_id.clone(),
            session_token: new.session_token.clone(),
            customer_name: new.customer_name.clone(),
            customer_email: new.customer_email.clone(),
            status: ConversationStatus::Active,
            started_at: now,
            last_message_at: now,
            metadata: new.metadata.clone(),
        })
    }

    /// Resume the active conversation for this widget session, or open a new one.
    /// Returns the conversation and whether it was newly created.
    pub fn start_conversation(&self, new: &NewConversation) -> anyhow::Result<(Conversation, bool)> {
        let conn = self.get_conn()?;
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversations
                     WHERE store_id = ?1 AND session_token = ?2 AND status = 'active'
                     ORDER BY last_message_at DESC LIMIT 1",
                    CONVERSATION_COLUMNS
                ),
                params![&new.store_id, &new.session_token],
                |row| Ok(Self::row_to_conversation(row)),
            )
            .optional()?;

        match existing {
            Some(conversation) => {
                let conversation = conversation?;
                debug!("Resuming conversation {} for session token", conversation.id);
                Ok((conversation, false))
            }
            None => Ok((Self::insert_conversation(&conn, new)?, true)),
        }
    }

    pub fn get_conversation(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE id = ?1",
            CONVERSATION_COLUMNS
        ))?;
        let mut rows = stmt.query([conversation_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_conversation(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_conversations(
        &self,
        store_id: &str,
        status: Option<ConversationStatus>,
        limit: usize,
    ) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.get_conn()?;
        let mut query = format!(
            "SELECT {} FROM conversations WHERE store_id = ?1",
            CONVERSATION_COLUMNS
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(store_id.to_string())];

        if let Some(status) = status {
            query.push_str(" AND status = ?");
            params.push(Box::new(status.as_str()));
        }
        query.push_str(" ORDER BY last_message_at DESC LIMIT ?");
        params.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&query)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(param_refs))?;

        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(Self::row_to_conversation(row)?);
        }
        Ok(conversations)
    }

    /// Returns false when the conversation does not exist.
    pub fn update_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE conversations SET status = ?1 WHERE id = ?2",
            params![status.as_str(), conversation_id],
        )?;
        if updated > 0 {
            info!("Conversation {} is now {}", conversation_id, status);
        }
        Ok(updated > 0)
    }

    /// Bump `last_message_at` to now. Never moves it backwards.
    pub fn update_conversation_last_message(&self, conversation_id: &str) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        let now = format_timestamp(&Utc::now());
        let updated = conn.execute(
            "UPDATE conversations SET last_message_at = MAX(last_message_at, ?1) WHERE id = ?2",
            params![now, conversation_id],
        )?;
        if updated == 0 {
            return Err(anyhow::anyhow!("Conversation {} not found", conversation_id));
        }
        Ok(())
    }

    pub fn create_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: &Metadata,
    ) -> anyhow::Result<Message> {
        let conn = self.get_conn()?;
        let now = Utc::now();
        let metadata_json = serde_json::to_string(metadata)?;

        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![conversation_id, role.as_str(), content, metadata_json, format_timestamp(&now)],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Stored {} message {} in conversation {}", role, id, conversation_id);
        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at: now,
        })
    }

    /// All messages of a conversation in creation order
    pub fn get_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<Message>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, metadata, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let mut rows = stmt.query([conversation_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_message(row)?);
        }
        Ok(messages)
    }

    pub fn get_message_count(&self, conversation_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn create_interaction_log(&self, log: &NewInteractionLog) -> anyhow::Result<InteractionLog> {
        let conn = self.get_conn()?;
        let now = Utc::now();
        let snapshot_json = serde_json::to_string(&log.context_snapshot)?;

        conn.execute(
            "INSERT INTO interaction_logs
             (conversation_id, message_id, prompt, response, prompt_tokens, completion_tokens,
              total_tokens, latency_ms, context_snapshot, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &log.conversation_id,
                log.message_id,
                &log.prompt,
                &log.response,
                log.prompt_tokens,
                log.completion_tokens,
                log.total_tokens,
                log.latency_ms as i64,
                snapshot_json,
                format_timestamp(&now),
            ],
        )?;

        Ok(InteractionLog {
            id: conn.last_insert_rowid(),
            conversation_id: log.conversation_id.clone(),
            message_id: log.message_id,
            prompt: log.prompt.clone(),
            response: log.response.clone(),
            prompt_tokens: log.prompt_tokens,
            completion_tokens: log.completion_tokens,
            total_tokens: log.total_tokens,
            latency_ms: log.latency_ms,
            context_snapshot: log.context_snapshot.clone(),
            created_at: now,
        })
    }

    pub fn get_interaction_log_for_message(&self, message_id: i64) -> anyhow::Result<Option<InteractionLog>> {
        let conn = self.get_conn()?;
        let log = conn
            .query_row(
                "SELECT id, conversation_id, message_id, prompt, response, prompt_tokens,
                        completion_tokens, total_tokens, latency_ms, context_snapshot, created_at
                 FROM interaction_logs WHERE message_id = ?1",
                [message_id],
                |row| {
                    let snapshot: String = row.get(9)?;
                    let created_at: String = row.get(10)?;
                    Ok(InteractionLog {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        message_id: row.get(2)?,
                        prompt: row.get(3)?,
                        response: row.get(4)?,
                        prompt_tokens: row.get(5)?,
                        completion_tokens: row.get(6)?,
                        total_tokens: row.get(7)?,
                        latency_ms: row.get::<_, i64>(8)? as u64,
                        context_snapshot: serde_json::from_str(&snapshot).unwrap_or_default(),
                        created_at: parse_datetime_safe(&created_at).unwrap_or_else(Utc::now),
                    })
                },
            )
            .optional()?;
        Ok(log)
    }

    fn row_to_conversation(row: &Row) -> anyhow::Result<Conversation> {
        let status: String = row.get(5)?;
        let started_at = parse_datetime_safe(&row.get::<_, String>(6)?)
            .unwrap_or_else(|| { warn!("Failed parse started_at"); Utc::now() });
        let last_message_at = parse_datetime_safe(&row.get::<_, String>(7)?)
            .unwrap_or_else(|| { warn!("Failed parse last_message_at"); started_at });

        Ok(Conversation {
            id: row.get(0)?,
            store_id: row.get(1)?,
            session_token: row.get(2)?,
            customer_name: row.get(3)?,
            customer_email: row.get(4)?,
            status: status.parse()?,
            started_at,
            last_message_at,
            metadata: parse_metadata(&row.get::<_, String>(8)?),
        })
    }

    fn row_to_message(row: &Row) -> anyhow::Result<Message> {
        let role: String = row.get(2)?;
        let created_at = parse_datetime_safe(&row.get::<_, String>(5)?)
            .unwrap_or_else(|| { warn!("Failed parse message timestamp"); Utc::now() });

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: role.parse()?,
            content: row.get(3)?,
            metadata: parse_metadata(&row.get::<_, String>(4)?),
            created_at,
        })
    }
}
