use anyhow::{Context, Result};

use super::LinkStore;

const LINK_COLUMNS: &str = "id, main_post, channel_id, telegram_msg_id, discord_msg_id,
     telegram_attachment_id, discord_attachment_id, created_at";

/// A persisted Telegram message → Discord message cross-reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageLink {
    pub id: i64,
    pub main_post: bool,
    pub channel_id: String,
    pub telegram_msg_id: i32,
    pub discord_msg_id: String,
    pub telegram_attachment_id: Option<String>,
    pub discord_attachment_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessageLink {
    pub main_post: bool,
    pub channel_id: String,
    pub telegram_msg_id: i32,
    pub discord_msg_id: String,
    pub telegram_attachment_id: Option<String>,
    pub discord_attachment_id: Option<String>,
}

/// Fields to overwrite on an existing link. `None` leaves the column as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkPatch {
    pub main_post: Option<bool>,
    pub discord_msg_id: Option<String>,
    pub telegram_attachment_id: Option<String>,
    pub discord_attachment_id: Option<String>,
}

impl LinkStore {
    /// Record a link. Re-recording the same (channel, telegram message) pair
    /// overwrites the previous mapping.
    pub async fn create(&self, link: &NewMessageLink) -> Result<i64> {
        let conn = self.conn.lock().await;
        let id = conn
            .query_row(
                "INSERT INTO message_links
                 (main_post, channel_id, telegram_msg_id, discord_msg_id,
                  telegram_attachment_id, discord_attachment_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(channel_id, telegram_msg_id) DO UPDATE SET
                    main_post = excluded.main_post,
                    discord_msg_id = excluded.discord_msg_id,
                    telegram_attachment_id = excluded.telegram_attachment_id,
                    discord_attachment_id = excluded.discord_attachment_id
                 RETURNING id",
                rusqlite::params![
                    link.main_post,
                    &link.channel_id,
                    link.telegram_msg_id,
                    &link.discord_msg_id,
                    &link.telegram_attachment_id,
                    &link.discord_attachment_id,
                ],
                |row| row.get(0),
            )
            .with_context(|| {
                format!(
                    "Failed to save link for telegram message {} in channel {}",
                    link.telegram_msg_id, link.channel_id
                )
            })?;
        Ok(id)
    }

    /// Every link sharing the Discord message of the row matching
    /// (channel, telegram message), main post first. Empty when nothing matches.
    pub async fn get_by_telegram_id(
        &self,
        channel_id: &str,
        telegram_msg_id: i32,
    ) -> Result<Vec<MessageLink>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {LINK_COLUMNS}
             FROM message_links
             WHERE discord_msg_id = (
                 SELECT discord_msg_id FROM message_links
                 WHERE channel_id = ?1 AND telegram_msg_id = ?2
             )
             ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare link lookup")?;
        let links = stmt
            .query_map(rusqlite::params![channel_id, telegram_msg_id], parse_link_row)
            .context("Failed to query links")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load links")?;
        Ok(links)
    }

    /// Delete the matching row together with every row sharing its Discord
    /// message. Returns the number of rows removed.
    pub async fn delete_by_telegram_id(&self, channel_id: &str, telegram_msg_id: i32) -> Result<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute(
                "DELETE FROM message_links
                 WHERE discord_msg_id = (
                     SELECT discord_msg_id FROM message_links
                     WHERE channel_id = ?1 AND telegram_msg_id = ?2
                 )",
                rusqlite::params![channel_id, telegram_msg_id],
            )
            .with_context(|| {
                format!(
                    "Failed to delete links for telegram message {} in channel {}",
                    telegram_msg_id, channel_id
                )
            })?;
        Ok(deleted)
    }

    /// Apply the set fields of `patch` to the matching row. Returns rows affected.
    pub async fn update_by_telegram_id(
        &self,
        channel_id: &str,
        telegram_msg_id: i32,
        patch: &LinkPatch,
    ) -> Result<usize> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE message_links SET
                    main_post = COALESCE(?3, main_post),
                    discord_msg_id = COALESCE(?4, discord_msg_id),
                    telegram_attachment_id = COALESCE(?5, telegram_attachment_id),
                    discord_attachment_id = COALESCE(?6, discord_attachment_id)
                 WHERE channel_id = ?1 AND telegram_msg_id = ?2",
                rusqlite::params![
                    channel_id,
                    telegram_msg_id,
                    patch.main_post,
                    &patch.discord_msg_id,
                    &patch.telegram_attachment_id,
                    &patch.discord_attachment_id,
                ],
            )
            .context("Failed to update link")?;
        Ok(updated)
    }
}

fn parse_link_row(row: &rusqlite::Row) -> rusqlite::Result<MessageLink> {
    Ok(MessageLink {
        id: row.get(0)?,
        main_post: row.get(1)?,
        channel_id: row.get(2)?,
        telegram_msg_id: row.get(3)?,
        discord_msg_id: row.get(4)?,
        telegram_attachment_id: row.get(5)?,
        discord_attachment_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}
