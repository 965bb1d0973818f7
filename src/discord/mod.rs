//! Discord side: REST port, per-streamer sessions and the publishing pipeline.

pub mod client;
pub mod publisher;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::DiscordClient;
pub use publisher::{Delivery, Publisher};
pub use registry::SessionRegistry;

/// Message type Discord uses for the "started a thread" notice.
pub const THREAD_CREATED_MESSAGE_TYPE: u8 = 18;

#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("discord request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("discord request timed out")]
    Timeout,

    #[error("discord rate limit, retry after {0:?}")]
    RateLimited(Duration),

    #[error("discord API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("discord payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl DiscordError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiscordError::Api { status: 404, .. })
    }
}

impl From<reqwest::Error> for DiscordError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DiscordError::Timeout
        } else {
            DiscordError::Transport(e)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedImage {
    pub url: String,
}

/// File uploaded with a message.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub name: String,
    pub data: Vec<u8>,
}

impl FileUpload {
    /// Reference usable in embeds of the same message.
    pub fn attachment_url(&self) -> String {
        format!("attachment://{}", self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub files: Vec<FileUpload>,
}

/// Changes to an existing message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEdit {
    pub content: Option<String>,
    /// Attachment ids to keep. `None` leaves attachments untouched; with
    /// new `files` set, anything not listed is removed.
    pub keep_attachments: Option<Vec<String>>,
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SentAttachment {
    pub id: String,
    #[serde(default)]
    pub filename: String,
}

/// The subset of a Discord message object the relay reads back.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SentMessage {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub attachments: Vec<SentAttachment>,
}

/// One streamer's authenticated Discord session.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, DiscordError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        edit: &MessageEdit,
    ) -> Result<SentMessage, DiscordError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), DiscordError>;

    /// Open a public thread on a message; returns the thread channel id.
    async fn start_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
        auto_archive_minutes: u32,
    ) -> Result<String, DiscordError>;

    /// Most recent messages of a channel, newest first.
    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<SentMessage>, DiscordError>;

    async fn close(&self) {}
}
