use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use tracing::{error, info, warn, Span};

use super::{
    DiscordApi, DiscordError, Embed, FileUpload, MessageEdit, OutgoingMessage, SentMessage,
    SessionRegistry, THREAD_CREATED_MESSAGE_TYPE,
};
use crate::config::DiscordConfig;
use crate::format::compose_content;
use crate::storage::{DiscordChannel, StreamerConfig};

/// How many recent messages are scanned for the thread notice.
const THREAD_NOTICE_SCAN: u8 = 10;

/// A post accepted by one Discord channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub channel_id: String,
    pub message: SentMessage,
}

/// Fans posts out to every Discord channel of a streamer.
pub struct Publisher {
    registry: Arc<SessionRegistry>,
    settings: DiscordConfig,
    span: Span,
}

impl Publisher {
    pub fn new(registry: Arc<SessionRegistry>, settings: DiscordConfig, span: Span) -> Self {
        Self {
            registry,
            settings,
            span,
        }
    }

    pub fn settings(&self) -> &DiscordConfig {
        &self.settings
    }

    fn session(&self, streamer: &StreamerConfig) -> Result<Arc<dyn DiscordApi>> {
        self.registry
            .get(&streamer.name)
            .ok_or_else(|| anyhow!("No Discord session for streamer {}", streamer.name))
    }

    /// Send a formatted post with its files to every channel of `streamer`.
    /// Channels are independent; the result holds the ones that succeeded.
    pub async fn publish_post(
        &self,
        streamer: &StreamerConfig,
        body: &str,
        files: &[FileUpload],
        original_link: Option<&str>,
    ) -> Vec<Delivery> {
        let session = match self.session(streamer) {
            Ok(session) => session,
            Err(e) => {
                error!(parent: &self.span, "{:#}", e);
                return Vec::new();
            }
        };

        let embeds: Vec<Embed> = match original_link {
            Some(link) if self.settings.link_original_post => vec![Embed {
                description: Some(format!("Original post: {}", link)),
                ..Default::default()
            }],
            _ => Vec::new(),
        };

        let sends = streamer.discord_channels.iter().map(|channel| {
            let message = OutgoingMessage {
                content: compose_content(&channel.prefix, body),
                embeds: embeds.clone(),
                files: files.to_vec(),
            };
            self.deliver_post(session.as_ref(), streamer, channel, message)
        });

        join_all(sends).await.into_iter().flatten().collect()
    }

    async fn deliver_post(
        &self,
        session: &dyn DiscordApi,
        streamer: &StreamerConfig,
        channel: &DiscordChannel,
        message: OutgoingMessage,
    ) -> Option<Delivery> {
        let sent = match session.send_message(&channel.channel_id, &message).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(
                    parent: &self.span,
                    "Failed to send post from {} to channel {}: {}",
                    streamer.name, channel.channel_id, e
                );
                return None;
            }
        };
        info!(
            parent: &self.span,
            "Post from {} sent to channel {} as {}",
            streamer.name, channel.channel_id, sent.id
        );

        if self.settings.comment_threads {
            self.open_comment_thread(session, &channel.channel_id, &sent.id)
                .await;
        }

        Some(Delivery {
            channel_id: channel.channel_id.clone(),
            message: sent,
        })
    }

    /// Thread, greeting and notice cleanup are best effort.
    async fn open_comment_thread(&self, session: &dyn DiscordApi, channel_id: &str, message_id: &str) {
        let thread_id = match session
            .start_thread(
                channel_id,
                message_id,
                &self.settings.thread_name,
                self.settings.thread_auto_archive_minutes,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(parent: &self.span, "Failed to open thread on {}: {}", message_id, e);
                return;
            }
        };

        if !self.settings.thread_greeting.is_empty() {
            let greeting = OutgoingMessage {
                content: self.settings.thread_greeting.clone(),
                ..Default::default()
            };
            if let Err(e) = session.send_message(&thread_id, &greeting).await {
                warn!(parent: &self.span, "Failed to greet thread {}: {}", thread_id, e);
            }
        }

        if let Err(e) = remove_thread_notice(session, channel_id).await {
            warn!(
                parent: &self.span,
                "Failed to remove thread notice in channel {}: {}",
                channel_id, e
            );
        }
    }

    /// Send an embed-only repost to every channel of `streamer`. No threads.
    pub async fn publish_repost(
        &self,
        streamer: &StreamerConfig,
        message: &OutgoingMessage,
    ) -> Vec<Delivery> {
        let session = match self.session(streamer) {
            Ok(session) => session,
            Err(e) => {
                error!(parent: &self.span, "{:#}", e);
                return Vec::new();
            }
        };

        let sends = streamer.discord_channels.iter().map(|channel| {
            let session = Arc::clone(&session);
            async move {
                match session.send_message(&channel.channel_id, message).await {
                    Ok(sent) => {
                        info!(
                            parent: &self.span,
                            "Repost from {} sent to channel {} as {}",
                            streamer.name, channel.channel_id, sent.id
                        );
                        Some(Delivery {
                            channel_id: channel.channel_id.clone(),
                            message: sent,
                        })
                    }
                    Err(e) => {
                        error!(
                            parent: &self.span,
                            "Failed to send repost from {} to channel {}: {}",
                            streamer.name, channel.channel_id, e
                        );
                        None
                    }
                }
            }
        });

        join_all(sends).await.into_iter().flatten().collect()
    }

    pub async fn edit(
        &self,
        streamer: &StreamerConfig,
        channel_id: &str,
        message_id: &str,
        edit: &MessageEdit,
    ) -> Result<SentMessage> {
        let session = self.session(streamer)?;
        let edited = session
            .edit_message(channel_id, message_id, edit)
            .await
            .with_context(|| {
                format!("Failed to edit message {} in channel {}", message_id, channel_id)
            })?;
        info!(parent: &self.span, "Edited message {} in channel {}", message_id, channel_id);
        Ok(edited)
    }

    /// Delete a mirrored message. A message already gone counts as deleted.
    pub async fn delete(&self, streamer: &StreamerConfig, channel_id: &str, message_id: &str) -> Result<()> {
        let session = self.session(streamer)?;
        match session.delete_message(channel_id, message_id).await {
            Ok(()) => {
                info!(parent: &self.span, "Deleted message {} in channel {}", message_id, channel_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    parent: &self.span,
                    "Message {} in channel {} was already gone",
                    message_id, channel_id
                );
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!("Failed to delete message {} in channel {}", message_id, channel_id)
            }),
        }
    }
}

/// Delete the newest "thread created" system message, if any.
async fn remove_thread_notice(session: &dyn DiscordApi, channel_id: &str) -> Result<(), DiscordError> {
    let recent = session.recent_messages(channel_id, THREAD_NOTICE_SCAN).await?;
    if let Some(notice) = recent
        .iter()
        .find(|m| m.kind == THREAD_CREATED_MESSAGE_TYPE)
    {
        session.delete_message(channel_id, &notice.id).await?;
    }
    Ok(())
}
