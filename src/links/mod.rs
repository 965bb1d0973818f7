pub mod messages;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub use messages::{LinkPatch, NewMessageLink};

/// Thread-safe SQLite store of Telegram ↔ Discord message links
#[derive(Clone)]
pub struct LinkStore {
    conn: Arc<Mutex<Connection>>,
}

impl LinkStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
        if !path.exists() {
            info!("Creating database at: {}", path.display());
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrate on the raw connection before it goes behind the async Mutex.
        Self::run_migrations(&conn)?;

        info!("Link store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS message_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                main_post INTEGER NOT NULL,
                channel_id TEXT NOT NULL,
                telegram_msg_id INTEGER NOT NULL,
                discord_msg_id TEXT NOT NULL,
                telegram_attachment_id TEXT,
                discord_attachment_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- One mirror row per Discord channel and Telegram message
            CREATE UNIQUE INDEX IF NOT EXISTS idx_links_channel_telegram
                ON message_links(channel_id, telegram_msg_id);

            CREATE INDEX IF NOT EXISTS idx_links_discord
                ON message_links(discord_msg_id);
            ",
        )
        .context("Failed to run link store migrations")?;
        Ok(())
    }
}
