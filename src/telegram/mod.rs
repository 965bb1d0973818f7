//! Telegram side: boundary model, update classification, API port and the
//! long-poll listener.
//!
//! Everything past `convert` works on [`IncomingPost`] so the relay never
//! touches teloxide types directly.

pub mod client;
pub mod convert;
pub mod listener;

use crate::config::GroupedRepostPolicy;

/// Kind of media carried by a post; decides the upload file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    VideoNote,
    Animation,
    Audio,
    Voice,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn default_file_name(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo.jpg",
            MediaKind::Video => "video.mp4",
            MediaKind::VideoNote => "videonote.mp4",
            MediaKind::Animation => "animation.mp4",
            MediaKind::Audio => "audio.mp3",
            MediaKind::Voice => "voice.ogg",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker.webp",
        }
    }
}

/// A downloadable file attached to a post.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
    /// Stable across bots and re-sends; `file_id` is not.
    pub unique_id: String,
    pub file_name: String,
    pub size: u32,
}

/// Formatting span over the post body. Offsets and lengths are in UTF-16 code
/// units, as Telegram sends them.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Pre { language: Option<String> },
    TextLink { url: String },
    TextMention { username: Option<String> },
}

/// Chat a forwarded post originates from.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardChat {
    pub chat_id: i64,
    pub title: String,
    pub username: Option<String>,
    /// Only known for channel origins.
    pub message_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForwardSource {
    Chat(ForwardChat),
    User { name: String },
}

/// A channel post, detached from teloxide.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncomingPost {
    pub chat_id: i64,
    pub chat_title: String,
    pub chat_username: Option<String>,
    pub message_id: i32,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Entities of whichever of `text`/`caption` is set.
    pub entities: Vec<TextEntity>,
    pub media_group_id: Option<String>,
    pub attachments: Vec<MediaRef>,
    pub forward: Option<ForwardSource>,
    pub reply_to: Option<i32>,
}

impl IncomingPost {
    /// Text, or the media caption when there is no text.
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }

    /// Commands are only recognized in plain text posts.
    pub fn is_command(&self) -> bool {
        self.text.as_deref().is_some_and(|t| t.starts_with('/'))
    }

    pub fn forward_chat(&self) -> Option<&ForwardChat> {
        match &self.forward {
            Some(ForwardSource::Chat(chat)) => Some(chat),
            _ => None,
        }
    }

    pub fn forward_user(&self) -> Option<&str> {
        match &self.forward {
            Some(ForwardSource::User { name }) => Some(name),
            _ => None,
        }
    }
}

/// Raw update as delivered by the long-poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingUpdate {
    ChannelPost(IncomingPost),
    EditedChannelPost(IncomingPost),
}

impl IncomingUpdate {
    pub fn post(&self) -> &IncomingPost {
        match self {
            IncomingUpdate::ChannelPost(p) | IncomingUpdate::EditedChannelPost(p) => p,
        }
    }
}

/// An update resolved to the path that handles it.
#[derive(Debug, Clone, PartialEq)]
pub enum PostEvent {
    NewPost(IncomingPost),
    GroupedPost(IncomingPost),
    Repost(IncomingPost),
    Edit(IncomingPost),
    Command(IncomingPost),
}

impl PostEvent {
    pub fn post(&self) -> &IncomingPost {
        match self {
            PostEvent::NewPost(p)
            | PostEvent::GroupedPost(p)
            | PostEvent::Repost(p)
            | PostEvent::Edit(p)
            | PostEvent::Command(p) => p,
        }
    }
}

/// Resolve an update to its handling path. `None` means the update is not
/// mirrored (forwards from users).
pub fn classify(update: IncomingUpdate, grouped_reposts: GroupedRepostPolicy) -> Option<PostEvent> {
    let post = match update {
        IncomingUpdate::EditedChannelPost(post) => return Some(PostEvent::Edit(post)),
        IncomingUpdate::ChannelPost(post) => post,
    };

    if post.is_command() {
        return Some(PostEvent::Command(post));
    }

    let grouped = post.media_group_id.is_some();
    match &post.forward {
        Some(ForwardSource::User { .. }) => None,
        Some(ForwardSource::Chat(_)) if grouped && grouped_reposts == GroupedRepostPolicy::Batch => {
            Some(PostEvent::GroupedPost(post))
        }
        Some(ForwardSource::Chat(_)) => Some(PostEvent::Repost(post)),
        None if grouped => Some(PostEvent::GroupedPost(post)),
        None => Some(PostEvent::NewPost(post)),
    }
}
