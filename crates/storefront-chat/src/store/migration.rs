//! Database migration system

use rusqlite::{Connection, Result, OptionalExtension};
use tracing::{info, warn, error};
use std::collections::HashMap;

use crate::store::schema;

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the schema up to the latest version
    pub fn initialize_database(&mut self) -> Result<()> {
        info!("Initializing chat database schema...");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current database schema version: {}", current_version);

        self.apply_migrations(current_version)?;

        Ok(())
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version > current_version {
                info!("Applying migration {}...", version);

                let tx = self.conn.transaction()?;

                if let Err(e) = tx.execute_batch(migration_sql) {
                    error!("Failed to apply migration {}: {}", version, e);
                    return Err(e);
                }

                tx.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    [version],
                )?;

                tx.commit()?;

                info!("Migration {} applied successfully", version);
            }
        }

        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .or_else(|_| Ok(0))
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_initial.sql")),
        (2, include_str!("migrations/002_catalog.sql")),
        (3, include_str!("migrations/003_interaction_logs.sql")),
    ]
}

pub fn latest_version() -> i32 {
    get_migrations().last().map(|(v, _)| *v).unwrap_or(0)
}

/// Row counts for the admin stats endpoint. Read-only.
pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn get_table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| row.get(0))
            .or_else(|e| {
                warn!("Failed to get count from table {}: {}", table_name, e);
                Ok(0)
            })
    }

    let mut conversations_by_status = HashMap::new();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM conversations GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        conversations_by_status.insert(status, count);
    }

    Ok(schema::DatabaseStats {
        total_stores: get_table_count(conn, "stores")?,
        total_conversations: get_table_count(conn, "conversations")?,
        total_messages: get_table_count(conn, "messages")?,
        total_interaction_logs: get_table_count(conn, "interaction_logs")?,
        total_products: get_table_count(conn, "products")?,
        conversations_by_status,
    })
}
