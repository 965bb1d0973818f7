use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, MessageId};
use tracing::debug;

/// The Telegram calls the relay needs besides the long-poll loop.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Fetch the bytes of a file by its `file_id`.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Big avatar of a chat, `None` when the chat has no photo.
    async fn chat_avatar(&self, chat_id: i64) -> Result<Option<Vec<u8>>>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;
}

/// teloxide-backed [`TelegramApi`]; every request is bounded by `timeout`.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
    timeout: Duration,
}

impl TelegramClient {
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self { bot, timeout }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .with_context(|| format!("Telegram {} timed out after {:?}", what, self.timeout))?
    }
}

#[async_trait]
impl TelegramApi for TelegramClient {
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        self.bounded("download", async {
            let file = self
                .bot
                .get_file(FileId(file_id.to_owned()))
                .await
                .with_context(|| format!("Failed to resolve telegram file {}", file_id))?;

            let mut data = Vec::with_capacity(file.size as usize);
            self.bot
                .download_file(&file.path, &mut data)
                .await
                .with_context(|| format!("Failed to download telegram file {}", file_id))?;

            debug!("Downloaded telegram file {} ({} bytes)", file_id, data.len());
            Ok(data)
        })
        .await
    }

    async fn chat_avatar(&self, chat_id: i64) -> Result<Option<Vec<u8>>> {
        let chat = self
            .bounded("getChat", async {
                self.bot
                    .get_chat(ChatId(chat_id))
                    .await
                    .with_context(|| format!("Failed to fetch telegram chat {}", chat_id))
            })
            .await?;

        match chat.photo {
            Some(photo) => self.download_file(&photo.big_file_id.0).await.map(Some),
            None => Ok(None),
        }
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bounded("deleteMessage", async {
            self.bot
                .delete_message(ChatId(chat_id), MessageId(message_id))
                .await
                .with_context(|| {
                    format!(
                        "Failed to delete telegram message {} in chat {}",
                        message_id, chat_id
                    )
                })?;
            Ok(())
        })
        .await
    }
}
