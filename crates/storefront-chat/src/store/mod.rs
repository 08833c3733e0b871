//! Context store - SQLite-backed storage for stores, catalog, conversations and messages
pub mod schema;
pub mod migration;
pub mod conversation_store;
pub mod catalog_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use conversation_store::ConversationStore;
pub use catalog_store::CatalogStore;
use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

/// What the chat core needs from persistence. Every call may fail; callers
/// decide whether a failure is fatal to the turn.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get_store(&self, store_id: &str) -> anyhow::Result<Option<Store>>;

    async fn get_conversation(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>>;

    /// Atomic append.
    async fn create_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Metadata,
    ) -> anyhow::Result<Message>;

    /// Messages in creation order.
    async fn get_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<Message>>;

    /// Last-writer-wins bump of `last_message_at`.
    async fn update_conversation_last_message(&self, conversation_id: &str) -> anyhow::Result<()>;

    async fn create_interaction_log(&self, log: NewInteractionLog) -> anyhow::Result<InteractionLog>;

    async fn search_store_data(
        &self,
        store_id: &str,
        query_text: &str,
        limit: usize,
    ) -> anyhow::Result<StoreContext>;

    async fn get_pages(&self, store_id: &str, limit: usize) -> anyhow::Result<Vec<Page>>;

    async fn get_blog_posts(&self, store_id: &str, limit: usize) -> anyhow::Result<Vec<BlogPost>>;
}

pub struct ChatDatabase {
    pub conversations: ConversationStore,
    pub catalog: CatalogStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

fn init_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

impl ChatDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening chat database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(init_connection);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        info!("Chat database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Every connection of `SqliteConnectionManager::memory()` is its own
    /// database, so the in-memory pool holds exactly one connection that is
    /// never recycled.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            catalog: CatalogStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

impl Drop for ChatDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

/// rusqlite is synchronous; keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("Database task failed: {}", e))?
}

#[async_trait]
impl ContextStore for ChatDatabase {
    async fn get_store(&self, store_id: &str) -> anyhow::Result<Option<Store>> {
        let catalog = self.catalog.clone();
        let store_id = store_id.to_string();
        run_blocking(move || catalog.get_store(&store_id)).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let conversations = self.conversations.clone();
        let conversation_id = conversation_id.to_string();
        run_blocking(move || conversations.get_conversation(&conversation_id)).await
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Metadata,
    ) -> anyhow::Result<Message> {
        let conversations = self.conversations.clone();
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();
        run_blocking(move || conversations.create_message(&conversation_id, role, &content, &metadata)).await
    }

    async fn get_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<Message>> {
        let conversations = self.conversations.clone();
        let conversation_id = conversation_id.to_string();
        run_blocking(move || conversations.get_messages(&conversation_id)).await
    }

    async fn update_conversation_last_message(&self, conversation_id: &str) -> anyhow::Result<()> {
        let conversations = self.conversations.clone();
        let conversation_id = conversation_id.to_string();
        run_blocking(move || conversations.update_conversation_last_message(&conversation_id)).await
    }

    async fn create_interaction_log(&self, log: NewInteractionLog) -> anyhow::Result<InteractionLog> {
        let conversations = self.conversations.clone();
        run_blocking(move || conversations.create_interaction_log(&log)).await
    }

    async fn search_store_data(
        &self,
        store_id: &str,
        query_text: &str,
        limit: usize,
    ) -> anyhow::Result<StoreContext> {
        let catalog = self.catalog.clone();
        let store_id = store_id.to_string();
        let query_text = query_text.to_string();
        run_blocking(move || catalog.search_store_data(&store_id, &query_text, limit)).await
    }

    async fn get_pages(&self, store_id: &str, limit: usize) -> anyhow::Result<Vec<Page>> {
        let catalog = self.catalog.clone();
        let store_id = store_id.to_string();
        run_blocking(move || catalog.get_pages(&store_id, limit)).await
    }

    async fn get_blog_posts(&self, store_id: &str, limit: usize) -> anyhow::Result<Vec<BlogPost>> {
        let catalog = self.catalog.clone();
        let store_id = store_id.to_string();
        run_blocking(move || catalog.get_blog_posts(&store_id, limit)).await
    }
}
