//! teloxide `Message` → [`IncomingPost`].

use teloxide::types::{FileMeta, Message, MessageEntity, MessageEntityKind, MessageOrigin};

use super::{EntityKind, ForwardChat, ForwardSource, IncomingPost, MediaKind, MediaRef, TextEntity};

pub fn incoming_post(msg: &Message) -> IncomingPost {
    let entities = if msg.text().is_some() {
        msg.entities()
    } else {
        msg.caption_entities()
    };

    IncomingPost {
        chat_id: msg.chat.id.0,
        chat_title: msg.chat.title().unwrap_or_default().to_string(),
        chat_username: msg.chat.username().map(str::to_owned),
        message_id: msg.id.0,
        text: msg.text().map(str::to_owned),
        caption: msg.caption().map(str::to_owned),
        entities: entities.map(text_entities).unwrap_or_default(),
        media_group_id: msg.media_group_id().map(|id| id.to_string()),
        attachments: collect_media(msg),
        forward: msg.forward_origin().map(forward_source),
        reply_to: msg.reply_to_message().map(|m| m.id.0),
    }
}

fn media_ref(file: &FileMeta, kind: MediaKind, file_name: Option<&str>) -> MediaRef {
    MediaRef {
        kind,
        file_id: file.id.0.clone(),
        unique_id: file.unique_id.0.clone(),
        file_name: file_name
            .filter(|n| !n.is_empty())
            .unwrap_or(kind.default_file_name())
            .to_string(),
        size: file.size,
    }
}

fn collect_media(msg: &Message) -> Vec<MediaRef> {
    let mut media = Vec::new();

    // Telegram sends every resolution; keep the biggest one.
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.iter().max_by_key(|p| p.file.size)) {
        media.push(media_ref(&largest.file, MediaKind::Photo, None));
    }
    if let Some(video) = msg.video() {
        media.push(media_ref(&video.file, MediaKind::Video, video.file_name.as_deref()));
    }
    if let Some(note) = msg.video_note() {
        media.push(media_ref(&note.file, MediaKind::VideoNote, None));
    }
    if let Some(animation) = msg.animation() {
        media.push(media_ref(&animation.file, MediaKind::Animation, None));
    } else if let Some(document) = msg.document() {
        // Animations are also delivered as a document; only take it once.
        media.push(media_ref(&document.file, MediaKind::Document, document.file_name.as_deref()));
    }
    if let Some(audio) = msg.audio() {
        media.push(media_ref(&audio.file, MediaKind::Audio, audio.file_name.as_deref()));
    }
    if let Some(voice) = msg.voice() {
        media.push(media_ref(&voice.file, MediaKind::Voice, None));
    }
    if let Some(sticker) = msg.sticker() {
        media.push(media_ref(&sticker.file, MediaKind::Sticker, None));
    }

    media
}

fn text_entities(entities: &[MessageEntity]) -> Vec<TextEntity> {
    entities
        .iter()
        .filter_map(|entity| {
            let kind = match &entity.kind {
                MessageEntityKind::Bold => EntityKind::Bold,
                MessageEntityKind::Italic => EntityKind::Italic,
                MessageEntityKind::Underline => EntityKind::Underline,
                MessageEntityKind::Strikethrough => EntityKind::Strikethrough,
                MessageEntityKind::Spoiler => EntityKind::Spoiler,
                MessageEntityKind::Code => EntityKind::Code,
                MessageEntityKind::Pre { language } => EntityKind::Pre {
                    language: language.clone(),
                },
                MessageEntityKind::TextLink { url } => EntityKind::TextLink {
                    url: url.to_string(),
                },
                MessageEntityKind::TextMention { user } => EntityKind::TextMention {
                    username: user.username.clone(),
                },
                _ => return None,
            };
            Some(TextEntity {
                kind,
                offset: entity.offset,
                length: entity.length,
            })
        })
        .collect()
}

fn forward_source(origin: &MessageOrigin) -> ForwardSource {
    match origin {
        MessageOrigin::Channel {
            chat, message_id, ..
        } => ForwardSource::Chat(ForwardChat {
            chat_id: chat.id.0,
            title: chat.title().unwrap_or_default().to_string(),
            username: chat.username().map(str::to_owned),
            message_id: Some(message_id.0),
        }),
        MessageOrigin::Chat { sender_chat, .. } => ForwardSource::Chat(ForwardChat {
            chat_id: sender_chat.id.0,
            title: sender_chat.title().unwrap_or_default().to_string(),
            username: sender_chat.username().map(str::to_owned),
            message_id: None,
        }),
        MessageOrigin::User { sender_user, .. } => ForwardSource::User {
            name: sender_user.full_name(),
        },
        MessageOrigin::HiddenUser {
            sender_user_name, ..
        } => ForwardSource::User {
            name: sender_user_name.clone(),
        },
    }
}
