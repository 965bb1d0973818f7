//! Routes classified channel posts to Discord and keeps the message links
//! that let later edits and deletes find their mirrors.

pub mod commands;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, error, info, warn, Span};

use crate::batcher::{FlushFn, MediaGroupBatcher};
use crate::config::GroupedRepostPolicy;
use crate::discord::{
    Delivery, Embed, EmbedAuthor, EmbedImage, FileUpload, MessageEdit, OutgoingMessage, Publisher,
};
use crate::format::{compose_content, post_link, telegram_to_discord};
use crate::links::{LinkPatch, LinkStore, NewMessageLink};
use crate::storage::{Storage, StreamerConfig};
use crate::telegram::client::TelegramApi;
use crate::telegram::{classify, IncomingPost, IncomingUpdate, MediaKind, MediaRef, PostEvent};
use commands::{command_word, Command};

const REPOST_PHOTO_NAME: &str = "photo.jpg";
const REPOST_AVATAR_NAME: &str = "avatar.jpg";

/// What to record for one Telegram message once Discord accepts the post.
#[derive(Debug, Clone)]
struct LinkSeed {
    main_post: bool,
    telegram_msg_id: i32,
    /// Telegram `file_unique_id` and the index of its upload in the post.
    attachment: Option<(String, usize)>,
}

pub struct Relay {
    storage: Storage,
    links: LinkStore,
    publisher: Publisher,
    telegram: Arc<dyn TelegramApi>,
    batcher: Arc<MediaGroupBatcher>,
    grouped_reposts: GroupedRepostPolicy,
    bot_username: Option<String>,
    span: Span,
}

impl Relay {
    pub fn new(
        storage: Storage,
        links: LinkStore,
        publisher: Publisher,
        telegram: Arc<dyn TelegramApi>,
        batcher: Arc<MediaGroupBatcher>,
        grouped_reposts: GroupedRepostPolicy,
        span: Span,
    ) -> Self {
        Self {
            storage,
            links,
            publisher,
            telegram,
            batcher,
            grouped_reposts,
            bot_username: None,
            span,
        }
    }

    /// Username used to recognise `/command@bot` posts.
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.bot_username = username;
        self
    }

    /// Flush callback for the batcher loop.
    pub fn flush_fn(self: &Arc<Self>) -> FlushFn {
        let relay = Arc::clone(self);
        Arc::new(move |group: Vec<IncomingPost>| -> BoxFuture<'static, ()> {
            let relay = Arc::clone(&relay);
            Box::pin(async move { relay.relay_group(group).await })
        })
    }

    /// Relay whatever albums are still buffered.
    pub async fn drain_pending(&self) {
        let groups = self.batcher.drain_all().await;
        if !groups.is_empty() {
            info!(parent: &self.span, "Relaying {} pending media group(s)", groups.len());
        }
        for group in groups {
            self.relay_group(group).await;
        }
    }

    pub async fn on_update(&self, update: IncomingUpdate) {
        let sender = update.post().forward_user().map(str::to_owned);
        let Some(event) = classify(update, self.grouped_reposts) else {
            debug!(
                parent: &self.span,
                "Ignoring post forwarded from user {}",
                sender.unwrap_or_default()
            );
            return;
        };

        let post = event.post();
        let Some(streamer) = self.storage.by_telegram_id(post.chat_id) else {
            debug!(
                parent: &self.span,
                "Ignoring post from unconfigured chat {} ({})",
                post.chat_id, post.chat_title
            );
            return;
        };

        match event {
            PostEvent::NewPost(post) => self.publish(streamer, &[post]).await,
            PostEvent::GroupedPost(post) => {
                if let Err(post) = self.batcher.append(post).await {
                    self.publish(streamer, &[post]).await;
                }
            }
            PostEvent::Repost(post) => self.relay_repost(streamer, &post).await,
            PostEvent::Edit(post) => self.relay_edit(streamer, &post).await,
            PostEvent::Command(post) => self.run_command(streamer, &post).await,
        }
    }

    /// Publish a flushed media group as one Discord post.
    pub async fn relay_group(&self, group: Vec<IncomingPost>) {
        let Some(first) = group.first() else {
            return;
        };
        match self.storage.by_telegram_id(first.chat_id) {
            Some(streamer) => self.publish(streamer, &group).await,
            None => debug!(parent: &self.span, "Dropping media group from unconfigured chat {}", first.chat_id),
        }
    }

    async fn publish(&self, streamer: &StreamerConfig, posts: &[IncomingPost]) {
        let Some(first) = posts.first() else {
            return;
        };

        // The member whose text is relayed owns the post content; edits follow it.
        let main_idx = posts
            .iter()
            .position(|p| !p.body().is_empty())
            .unwrap_or(0);
        let main = &posts[main_idx];
        let mut body = telegram_to_discord(main.body(), &main.entities);
        if let Some(source) = first.forward_chat() {
            body = format!("*Forwarded from {}*\n{}", source.title, body);
        }

        let mut files = Vec::new();
        let mut seeds = Vec::with_capacity(posts.len());
        for (idx, post) in posts.iter().enumerate() {
            let mut seed = LinkSeed {
                main_post: idx == main_idx,
                telegram_msg_id: post.message_id,
                attachment: None,
            };
            for media in &post.attachments {
                if let Some(file) = self.fetch_media(media).await {
                    if seed.attachment.is_none() {
                        seed.attachment = Some((media.unique_id.clone(), files.len()));
                    }
                    files.push(file);
                }
            }
            seeds.push(seed);
        }

        if body.trim().is_empty() && files.is_empty() {
            info!(
                parent: &self.span,
                "Post {} from {} has nothing to relay",
                first.message_id, streamer.name
            );
            return;
        }

        let link = post_link(first.chat_id, first.chat_username.as_deref(), first.message_id);
        let deliveries = self
            .publisher
            .publish_post(streamer, &body, &files, Some(&link))
            .await;
        self.record_links(&deliveries, &seeds).await;
    }

    async fn relay_repost(&self, streamer: &StreamerConfig, post: &IncomingPost) {
        let Some(source) = post.forward_chat() else {
            return;
        };

        let body = telegram_to_discord(post.body(), &post.entities);

        // Album members only carry their own photo; the embed shows none.
        let photo = match post.media_group_id {
            Some(_) => None,
            None => post.attachments.iter().find(|m| m.kind == MediaKind::Photo),
        };
        let mut photo_upload = None;
        if let Some(media) = photo {
            photo_upload = self.fetch_media(media).await.map(|mut file| {
                file.name = REPOST_PHOTO_NAME.to_string();
                file
            });
        }

        if body.trim().is_empty() && photo_upload.is_none() {
            debug!(
                parent: &self.span,
                "Repost {} has neither text nor photo, skipping",
                post.message_id
            );
            return;
        }

        let avatar = match self.telegram.chat_avatar(source.chat_id).await {
            Ok(avatar) => avatar.map(|data| FileUpload {
                name: REPOST_AVATAR_NAME.to_string(),
                data,
            }),
            Err(e) => {
                warn!(parent: &self.span, "Failed to fetch avatar of {}: {:#}", source.title, e);
                None
            }
        };

        let link = match (&source.username, source.message_id) {
            (Some(username), Some(message_id)) => {
                Some(post_link(source.chat_id, Some(username.as_str()), message_id))
            }
            _ => None,
        };

        let embed = Embed {
            description: (!body.is_empty()).then(|| compose_content("", &body)),
            url: link.clone(),
            color: Some(self.publisher.settings().repost_color),
            author: Some(EmbedAuthor {
                name: format!("Forwarded from {}", source.title),
                url: link,
                icon_url: avatar.as_ref().map(FileUpload::attachment_url),
            }),
            image: photo_upload.as_ref().map(|f| EmbedImage {
                url: f.attachment_url(),
            }),
            ..Default::default()
        };

        let seed = LinkSeed {
            main_post: true,
            telegram_msg_id: post.message_id,
            attachment: photo
                .filter(|_| photo_upload.is_some())
                .map(|m| (m.unique_id.clone(), 0)),
        };
        let message = OutgoingMessage {
            content: String::new(),
            embeds: vec![embed],
            files: photo_upload.into_iter().chain(avatar).collect(),
        };

        let deliveries = self.publisher.publish_repost(streamer, &message).await;
        self.record_links(&deliveries, &[seed]).await;
    }

    async fn relay_edit(&self, streamer: &StreamerConfig, post: &IncomingPost) {
        let content = telegram_to_discord(post.body(), &post.entities);
        // Downloaded at most once, on the first channel that needs it.
        let mut replacement: Option<Option<(MediaRef, FileUpload)>> = None;

        for channel in &streamer.discord_channels {
            let group = match self
                .links
                .get_by_telegram_id(&channel.channel_id, post.message_id)
                .await
            {
                Ok(group) => group,
                Err(e) => {
                    error!(parent: &self.span, "{:#}", e);
                    continue;
                }
            };
            let Some(link) = group.iter().find(|l| l.telegram_msg_id == post.message_id) else {
                debug!(
                    parent: &self.span,
                    "Edited post {} has no mirror in channel {}",
                    post.message_id, channel.channel_id
                );
                continue;
            };

            let mut edit = MessageEdit::default();
            if link.main_post {
                edit.content = Some(compose_content(&channel.prefix, &content));
            }

            let changed_media = post
                .attachments
                .first()
                .filter(|m| link.telegram_attachment_id.as_deref() != Some(m.unique_id.as_str()));
            let mut kept = Vec::new();
            let mut new_media = None;
            if let Some(media) = changed_media {
                if replacement.is_none() {
                    let file = self.fetch_media(media).await;
                    replacement = Some(file.map(|f| (media.clone(), f)));
                }
                if let Some(Some((media, file))) = &replacement {
                    kept = group
                        .iter()
                        .filter(|l| l.telegram_msg_id != post.message_id)
                        .filter_map(|l| l.discord_attachment_id.clone())
                        .collect();
                    edit.keep_attachments = Some(kept.clone());
                    edit.files = vec![file.clone()];
                    new_media = Some(media.unique_id.clone());
                }
            }

            if edit.content.is_none() && edit.files.is_empty() {
                continue;
            }

            let edited = match self
                .publisher
                .edit(streamer, &channel.channel_id, &link.discord_msg_id, &edit)
                .await
            {
                Ok(edited) => edited,
                Err(e) => {
                    error!(parent: &self.span, "{:#}", e);
                    continue;
                }
            };

            if let Some(unique_id) = new_media {
                let uploaded = edited.attachments.iter().find(|a| !kept.contains(&a.id));
                if let Some(attachment) = uploaded {
                    debug!(
                        parent: &self.span,
                        "Post {} now shows {} in channel {}",
                        post.message_id, attachment.filename, channel.channel_id
                    );
                }
                let uploaded = uploaded.map(|a| a.id.clone());
                let patch = LinkPatch {
                    telegram_attachment_id: Some(unique_id),
                    discord_attachment_id: uploaded,
                    ..Default::default()
                };
                if let Err(e) = self
                    .links
                    .update_by_telegram_id(&channel.channel_id, post.message_id, &patch)
                    .await
                {
                    error!(parent: &self.span, "{:#}", e);
                }
            }
        }
    }

    async fn run_command(&self, streamer: &StreamerConfig, post: &IncomingPost) {
        let text = post.text.as_deref().unwrap_or_default();
        let Some(command) = Command::parse(text, self.bot_username.as_deref()) else {
            info!(parent: &self.span, "Unknown command: {}", command_word(text));
            return;
        };

        if let Err(e) = self.telegram.delete_message(post.chat_id, post.message_id).await {
            warn!(parent: &self.span, "Failed to remove command post: {:#}", e);
        }

        match command {
            Command::Delete => self.delete_post(streamer, post).await,
        }
    }

    async fn delete_post(&self, streamer: &StreamerConfig, command: &IncomingPost) {
        let Some(target) = command.reply_to else {
            warn!(parent: &self.span, "/delete must be sent as a reply to a post");
            return;
        };

        let mut sources_deleted = false;
        for channel in &streamer.discord_channels {
            let group = match self.links.get_by_telegram_id(&channel.channel_id, target).await {
                Ok(group) => group,
                Err(e) => {
                    error!(parent: &self.span, "{:#}", e);
                    continue;
                }
            };
            let Some(head) = group.first() else {
                continue;
            };

            // Every album member goes, not just the one replied to.
            if !sources_deleted {
                for link in &group {
                    if let Err(e) = self
                        .telegram
                        .delete_message(command.chat_id, link.telegram_msg_id)
                        .await
                    {
                        warn!(parent: &self.span, "{:#}", e);
                    }
                }
                sources_deleted = true;
            }

            if let Err(e) = self
                .publisher
                .delete(streamer, &channel.channel_id, &head.discord_msg_id)
                .await
            {
                error!(parent: &self.span, "{:#}", e);
            }

            match self.links.delete_by_telegram_id(&channel.channel_id, target).await {
                Ok(removed) => debug!(
                    parent: &self.span,
                    "Removed {} link(s) for post {} in channel {}",
                    removed, target, channel.channel_id
                ),
                Err(e) => error!(parent: &self.span, "{:#}", e),
            }
        }

        if !sources_deleted {
            warn!(
                parent: &self.span,
                "No Discord mirror recorded for post {}; deleting it from Telegram only",
                target
            );
            if let Err(e) = self.telegram.delete_message(command.chat_id, target).await {
                warn!(parent: &self.span, "{:#}", e);
            }
        }
    }

    /// Download one attachment, skipping files Discord would reject.
    async fn fetch_media(&self, media: &MediaRef) -> Option<FileUpload> {
        let limit = self.publisher.settings().max_attachment_bytes;
        if u64::from(media.size) > limit {
            warn!(
                parent: &self.span,
                "Skipping {} ({} bytes, limit {})",
                media.file_name, media.size, limit
            );
            return None;
        }

        match self.telegram.download_file(&media.file_id).await {
            Ok(data) if data.len() as u64 > limit => {
                warn!(
                    parent: &self.span,
                    "Skipping {} ({} bytes downloaded, limit {})",
                    media.file_name,
                    data.len(),
                    limit
                );
                None
            }
            Ok(data) => Some(FileUpload {
                name: media.file_name.clone(),
                data,
            }),
            Err(e) => {
                warn!(parent: &self.span, "Skipping {}: {:#}", media.file_name, e);
                None
            }
        }
    }

    async fn record_links(&self, deliveries: &[Delivery], seeds: &[LinkSeed]) {
        for delivery in deliveries {
            for seed in seeds {
                let (telegram_attachment_id, discord_attachment_id) = match &seed.attachment {
                    Some((unique_id, idx)) => (
                        Some(unique_id.clone()),
                        delivery.message.attachments.get(*idx).map(|a| a.id.clone()),
                    ),
                    None => (None, None),
                };
                let link = NewMessageLink {
                    main_post: seed.main_post,
                    channel_id: delivery.channel_id.clone(),
                    telegram_msg_id: seed.telegram_msg_id,
                    discord_msg_id: delivery.message.id.clone(),
                    telegram_attachment_id,
                    discord_attachment_id,
                };
                // The Discord post stays up without a link; it just can't be
                // cascaded to later.
                if let Err(e) = self.links.create(&link).await {
                    error!(
                        parent: &self.span,
                        "Orphaned Discord message {} in channel {}: {:#}",
                        delivery.message.id, delivery.channel_id, e
                    );
                }
            }
        }
    }
}
