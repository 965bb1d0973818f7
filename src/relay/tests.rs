use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::Span;

use super::*;
use crate::config::DiscordConfig;
use crate::discord::{
    DiscordApi, DiscordError, SentAttachment, SentMessage, SessionRegistry,
    THREAD_CREATED_MESSAGE_TYPE,
};
use crate::storage::{DiscordChannel, Storage, StreamerConfig};
use crate::telegram::{ForwardChat, ForwardSource, MediaKind, MediaRef};

const CHAT: i64 = -1001234567890;

#[derive(Debug, Clone, PartialEq)]
enum DiscordCall {
    Send {
        channel: String,
        message: OutgoingMessage,
    },
    Edit {
        channel: String,
        message_id: String,
        edit: MessageEdit,
    },
    Delete {
        channel: String,
        message_id: String,
    },
    StartThread {
        channel: String,
        message_id: String,
        name: String,
    },
}

#[derive(Default)]
struct MockDiscordState {
    next_id: u64,
    calls: Vec<DiscordCall>,
    failing_channels: HashSet<String>,
    thread_notices: bool,
}

/// Records every call; ids are handed out as `msg-N` / `att-N`.
#[derive(Default)]
struct MockDiscord {
    state: Mutex<MockDiscordState>,
}

impl MockDiscord {
    fn fail_channel(&self, channel: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_channels
            .insert(channel.to_string());
    }

    fn with_thread_notices(&self) {
        self.state.lock().unwrap().thread_notices = true;
    }

    fn calls(&self) -> Vec<DiscordCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn sends_to(&self, channel: &str) -> Vec<OutgoingMessage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DiscordCall::Send { channel: ch, message } if ch == channel => Some(message),
                _ => None,
            })
            .collect()
    }

    fn edits(&self) -> Vec<(String, String, MessageEdit)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DiscordCall::Edit {
                    channel,
                    message_id,
                    edit,
                } => Some((channel, message_id, edit)),
                _ => None,
            })
            .collect()
    }

    fn deletes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DiscordCall::Delete {
                    channel,
                    message_id,
                } => Some((channel, message_id)),
                _ => None,
            })
            .collect()
    }

    fn next_id(state: &mut MockDiscordState, kind: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", kind, state.next_id)
    }
}

#[async_trait]
impl DiscordApi for MockDiscord {
    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, DiscordError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DiscordCall::Send {
            channel: channel_id.to_string(),
            message: message.clone(),
        });
        if state.failing_channels.contains(channel_id) {
            return Err(DiscordError::Api {
                status: 500,
                body: "boom".to_string(),
            });
        }
        let id = Self::next_id(&mut state, "msg");
        let attachments = message
            .files
            .iter()
            .map(|f| SentAttachment {
                id: Self::next_id(&mut state, "att"),
                filename: f.name.clone(),
            })
            .collect();
        Ok(SentMessage {
            id,
            kind: 0,
            attachments,
        })
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        edit: &MessageEdit,
    ) -> Result<SentMessage, DiscordError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DiscordCall::Edit {
            channel: channel_id.to_string(),
            message_id: message_id.to_string(),
            edit: edit.clone(),
        });
        let mut attachments: Vec<SentAttachment> = edit
            .keep_attachments
            .iter()
            .flatten()
            .map(|id| SentAttachment {
                id: id.clone(),
                filename: String::new(),
            })
            .collect();
        for file in &edit.files {
            attachments.push(SentAttachment {
                id: Self::next_id(&mut state, "att"),
                filename: file.name.clone(),
            });
        }
        Ok(SentMessage {
            id: message_id.to_string(),
            kind: 0,
            attachments,
        })
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), DiscordError> {
        self.state.lock().unwrap().calls.push(DiscordCall::Delete {
            channel: channel_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    async fn start_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
        _auto_archive_minutes: u32,
    ) -> Result<String, DiscordError> {
        self.state.lock().unwrap().calls.push(DiscordCall::StartThread {
            channel: channel_id.to_string(),
            message_id: message_id.to_string(),
            name: name.to_string(),
        });
        Ok(format!("thread-{}", message_id))
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        _limit: u8,
    ) -> Result<Vec<SentMessage>, DiscordError> {
        if !self.state.lock().unwrap().thread_notices {
            return Ok(Vec::new());
        }
        Ok(vec![
            SentMessage {
                id: format!("notice-{}", channel_id),
                kind: THREAD_CREATED_MESSAGE_TYPE,
                attachments: Vec::new(),
            },
            SentMessage {
                id: "older".to_string(),
                kind: 0,
                attachments: Vec::new(),
            },
        ])
    }
}

#[derive(Default)]
struct MockTelegram {
    files: Mutex<HashMap<String, Vec<u8>>>,
    avatar: Mutex<Option<Vec<u8>>>,
    deleted: Mutex<Vec<(i64, i32)>>,
}

impl MockTelegram {
    fn add_file(&self, file_id: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(file_id.to_string(), data.to_vec());
    }

    fn deleted(&self) -> Vec<i32> {
        self.deleted.lock().unwrap().iter().map(|(_, id)| *id).collect()
    }
}

#[async_trait]
impl TelegramApi for MockTelegram {
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| anyhow!("no such file: {}", file_id))
    }

    async fn chat_avatar(&self, _chat_id: i64) -> Result<Option<Vec<u8>>> {
        Ok(self.avatar.lock().unwrap().clone())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }
}

struct Harness {
    relay: Arc<Relay>,
    discord: Arc<MockDiscord>,
    telegram: Arc<MockTelegram>,
    links: LinkStore,
}

fn streamer() -> StreamerConfig {
    StreamerConfig {
        name: "alice".to_string(),
        telegram_channel_id: CHAT,
        discord_bot_token: "token".to_string(),
        discord_channels: vec![
            DiscordChannel {
                channel_id: "chan-a".to_string(),
                prefix: "@everyone".to_string(),
            },
            DiscordChannel {
                channel_id: "chan-b".to_string(),
                prefix: String::new(),
            },
        ],
    }
}

fn harness_with(policy: GroupedRepostPolicy, settings: DiscordConfig) -> Harness {
    let discord = Arc::new(MockDiscord::default());
    let telegram = Arc::new(MockTelegram::default());
    let links = LinkStore::open_in_memory().unwrap();

    let mut sessions: HashMap<String, Arc<dyn DiscordApi>> = HashMap::new();
    sessions.insert("alice".to_string(), discord.clone());
    let registry = Arc::new(SessionRegistry::from_sessions(sessions));
    let publisher = Publisher::new(registry, settings, Span::none());
    let batcher = Arc::new(MediaGroupBatcher::new(Duration::from_secs(3), Span::none()));

    let relay = Relay::new(
        Storage::new(vec![streamer()]).unwrap(),
        links.clone(),
        publisher,
        telegram.clone(),
        batcher,
        policy,
        Span::none(),
    )
    .with_bot_username(Some("publisher_bot".to_string()));

    Harness {
        relay: Arc::new(relay),
        discord,
        telegram,
        links,
    }
}

fn harness() -> Harness {
    harness_with(GroupedRepostPolicy::Repost, DiscordConfig::default())
}

fn text_post(id: i32, text: &str) -> IncomingPost {
    IncomingPost {
        chat_id: CHAT,
        chat_title: "Alice streams".to_string(),
        chat_username: Some("alice_streams".to_string()),
        message_id: id,
        text: Some(text.to_string()),
        ..Default::default()
    }
}

fn photo(file_id: &str, unique_id: &str) -> MediaRef {
    MediaRef {
        kind: MediaKind::Photo,
        file_id: file_id.to_string(),
        unique_id: unique_id.to_string(),
        file_name: "photo.jpg".to_string(),
        size: 3,
    }
}

fn album_post(id: i32, caption: Option<&str>, media: MediaRef) -> IncomingPost {
    IncomingPost {
        chat_id: CHAT,
        chat_title: "Alice streams".to_string(),
        chat_username: Some("alice_streams".to_string()),
        message_id: id,
        caption: caption.map(str::to_string),
        media_group_id: Some("album-1".to_string()),
        attachments: vec![media],
        ..Default::default()
    }
}

fn command(id: i32, text: &str, reply_to: Option<i32>) -> IncomingPost {
    IncomingPost {
        reply_to,
        ..text_post(id, text)
    }
}

fn forwarded(id: i32, caption: Option<&str>, attachments: Vec<MediaRef>) -> IncomingPost {
    IncomingPost {
        chat_id: CHAT,
        message_id: id,
        caption: caption.map(str::to_string),
        attachments,
        forward: Some(ForwardSource::Chat(ForwardChat {
            chat_id: -1009999,
            title: "Bob news".to_string(),
            username: Some("bobnews".to_string()),
            message_id: Some(77),
        })),
        ..Default::default()
    }
}

async fn post(h: &Harness, post: IncomingPost) {
    h.relay.on_update(IncomingUpdate::ChannelPost(post)).await;
}

async fn edit(h: &Harness, post: IncomingPost) {
    h.relay.on_update(IncomingUpdate::EditedChannelPost(post)).await;
}

/// Post a three photo album and flush it.
async fn relay_album(h: &Harness) {
    for (id, caption) in [(10, Some("Stream **tonight**")), (11, None), (12, None)] {
        let file_id = format!("file-{}", id);
        h.telegram.add_file(&file_id, b"jpg");
        let media = photo(&file_id, &format!("uniq-{}", id));
        post(h, album_post(id, caption, media)).await;
    }
    h.relay.drain_pending().await;
}

#[tokio::test]
async fn test_text_post_is_mirrored_to_every_channel() {
    let h = harness();
    post(&h, text_post(1, "Going live")).await;

    let to_a = h.discord.sends_to("chan-a");
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a[0].content, "@everyone\nGoing live");
    assert_eq!(
        to_a[0].embeds[0].description.as_deref(),
        Some("Original post: https://t.me/alice_streams/1")
    );

    let to_b = h.discord.sends_to("chan-b");
    assert_eq!(to_b[0].content, "Going live");

    for channel in ["chan-a", "chan-b"] {
        let links = h.links.get_by_telegram_id(channel, 1).await.unwrap();
        assert_eq!(links.len(), 1);
        assert!(links[0].main_post);
    }
}

#[tokio::test]
async fn test_post_opens_comment_thread_and_greets() {
    let h = harness();
    h.discord.with_thread_notices();
    post(&h, text_post(1, "hi")).await;

    let calls = h.discord.calls();
    let threads: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, DiscordCall::StartThread { .. }))
        .collect();
    assert_eq!(threads.len(), 2);
    if let DiscordCall::StartThread { name, .. } = threads[0] {
        assert_eq!(name, "Comments");
    }

    let link = &h.links.get_by_telegram_id("chan-a", 1).await.unwrap()[0];
    let greetings = h.discord.sends_to(&format!("thread-{}", link.discord_msg_id));
    assert_eq!(greetings.len(), 1);
    assert_eq!(greetings[0].content, DiscordConfig::default().thread_greeting);

    let deletes = h.discord.deletes();
    assert!(deletes.contains(&("chan-a".to_string(), "notice-chan-a".to_string())));
    assert!(deletes.contains(&("chan-b".to_string(), "notice-chan-b".to_string())));
}

#[tokio::test]
async fn test_threads_can_be_disabled() {
    let settings = DiscordConfig {
        comment_threads: false,
        link_original_post: false,
        ..Default::default()
    };
    let h = harness_with(GroupedRepostPolicy::Repost, settings);
    post(&h, text_post(1, "hi")).await;

    assert!(h
        .discord
        .calls()
        .iter()
        .all(|c| matches!(c, DiscordCall::Send { .. })));
    assert!(h.discord.sends_to("chan-a")[0].embeds.is_empty());
}

#[tokio::test]
async fn test_album_becomes_one_message_with_all_photos() {
    let h = harness();
    relay_album(&h).await;

    let to_a = h.discord.sends_to("chan-a");
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a[0].files.len(), 3);
    assert_eq!(to_a[0].content, "@everyone\nStream **tonight**");

    let links = h.links.get_by_telegram_id("chan-a", 11).await.unwrap();
    assert_eq!(links.len(), 3);
    let discord_ids: HashSet<_> = links.iter().map(|l| l.discord_msg_id.clone()).collect();
    assert_eq!(discord_ids.len(), 1);
    assert!(links[0].main_post);
    assert!(!links[1].main_post && !links[2].main_post);

    let attachment_ids: HashSet<_> = links
        .iter()
        .map(|l| l.discord_attachment_id.clone().unwrap())
        .collect();
    assert_eq!(attachment_ids.len(), 3);
    assert_eq!(links[1].telegram_attachment_id.as_deref(), Some("uniq-11"));
}

#[tokio::test]
async fn test_delete_cascades_across_channels() {
    let h = harness();
    relay_album(&h).await;
    post(&h, text_post(20, "unrelated")).await;

    let album_a = h.links.get_by_telegram_id("chan-a", 10).await.unwrap()[0]
        .discord_msg_id
        .clone();
    let album_b = h.links.get_by_telegram_id("chan-b", 10).await.unwrap()[0]
        .discord_msg_id
        .clone();

    post(&h, command(30, "/delete", Some(11))).await;

    // Command post first, then the whole album.
    assert_eq!(h.telegram.deleted(), vec![30, 10, 11, 12]);

    let deletes = h.discord.deletes();
    assert_eq!(
        deletes,
        vec![
            ("chan-a".to_string(), album_a),
            ("chan-b".to_string(), album_b)
        ]
    );

    for channel in ["chan-a", "chan-b"] {
        for id in [10, 11, 12] {
            assert!(h.links.get_by_telegram_id(channel, id).await.unwrap().is_empty());
        }
        assert_eq!(h.links.get_by_telegram_id(channel, 20).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_delete_without_reply_only_removes_command() {
    let h = harness();
    post(&h, text_post(1, "hi")).await;
    post(&h, command(2, "/delete", None)).await;

    assert_eq!(h.telegram.deleted(), vec![2]);
    assert!(h.discord.deletes().is_empty());
    assert_eq!(h.links.get_by_telegram_id("chan-a", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_command_is_left_alone() {
    let h = harness();
    post(&h, command(5, "/start", None)).await;
    post(&h, command(6, "/delete@someone_else", Some(1))).await;

    assert!(h.telegram.deleted().is_empty());
    assert!(h.discord.calls().is_empty());
}

#[tokio::test]
async fn test_failed_link_write_leaves_orphan_that_delete_skips() {
    let h = harness();
    {
        let conn = h.links.connection();
        let conn = conn.lock().await;
        conn.execute_batch("DROP TABLE message_links").unwrap();
    }

    post(&h, text_post(1, "orphan")).await;
    assert_eq!(h.discord.sends_to("chan-a").len(), 1);

    post(&h, command(2, "/delete", Some(1))).await;
    assert_eq!(h.telegram.deleted(), vec![2, 1]);
    assert!(h.discord.deletes().is_empty());
}

#[tokio::test]
async fn test_delete_of_unmirrored_post_still_removes_it() {
    let h = harness();
    post(&h, command(9, "/delete", Some(3))).await;
    assert_eq!(h.telegram.deleted(), vec![9, 3]);
    assert!(h.discord.calls().is_empty());
}

#[tokio::test]
async fn test_one_failing_channel_does_not_block_the_other() {
    let h = harness();
    h.discord.fail_channel("chan-a");
    post(&h, text_post(1, "hi")).await;

    assert!(h.links.get_by_telegram_id("chan-a", 1).await.unwrap().is_empty());
    assert_eq!(h.links.get_by_telegram_id("chan-b", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_repost_is_suppressed() {
    let h = harness();
    post(&h, forwarded(1, None, Vec::new())).await;

    assert!(h.discord.calls().is_empty());
    assert!(h.links.get_by_telegram_id("chan-a", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repost_renders_citing_embed() {
    let h = harness();
    h.telegram.add_file("fwd-photo", b"jpg");
    *h.telegram.avatar.lock().unwrap() = Some(b"png".to_vec());
    post(&h, forwarded(4, Some("look"), vec![photo("fwd-photo", "uniq-fwd")])).await;

    let sent = h.discord.sends_to("chan-a");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].content.is_empty());
    let names: Vec<_> = sent[0].files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["photo.jpg", "avatar.jpg"]);

    let embed = &sent[0].embeds[0];
    assert_eq!(embed.description.as_deref(), Some("look"));
    assert_eq!(embed.url.as_deref(), Some("https://t.me/bobnews/77"));
    assert_eq!(embed.color, Some(1796358));
    let author = embed.author.as_ref().unwrap();
    assert_eq!(author.name, "Forwarded from Bob news");
    assert_eq!(author.icon_url.as_deref(), Some("attachment://avatar.jpg"));
    assert_eq!(
        embed.image.as_ref().map(|i| i.url.as_str()),
        Some("attachment://photo.jpg")
    );

    // Reposts get no comment thread.
    assert!(!h
        .discord
        .calls()
        .iter()
        .any(|c| matches!(c, DiscordCall::StartThread { .. })));

    let link = &h.links.get_by_telegram_id("chan-b", 4).await.unwrap()[0];
    assert_eq!(link.telegram_attachment_id.as_deref(), Some("uniq-fwd"));
}

#[tokio::test]
async fn test_grouped_repost_follows_configured_policy() {
    let mut grouped = forwarded(5, Some("album repost"), Vec::new());
    grouped.media_group_id = Some("fwd-album".to_string());

    let as_repost = harness();
    post(&as_repost, grouped.clone()).await;
    assert_eq!(as_repost.discord.sends_to("chan-a")[0].embeds.len(), 1);
    assert!(as_repost.discord.sends_to("chan-a")[0].embeds[0].author.is_some());

    let as_batch = harness_with(GroupedRepostPolicy::Batch, DiscordConfig::default());
    post(&as_batch, grouped).await;
    assert!(as_batch.discord.calls().is_empty());
    as_batch.relay.drain_pending().await;
    let sent = as_batch.discord.sends_to("chan-a");
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].content,
        "@everyone\n*Forwarded from Bob news*\nalbum repost"
    );
}

#[tokio::test]
async fn test_edit_of_main_post_updates_content() {
    let h = harness();
    post(&h, text_post(1, "typo")).await;
    let mirror = h.links.get_by_telegram_id("chan-a", 1).await.unwrap()[0]
        .discord_msg_id
        .clone();

    edit(&h, text_post(1, "fixed")).await;

    let edits = h.discord.edits();
    assert_eq!(edits.len(), 2);
    let (channel, message_id, change) = &edits[0];
    assert_eq!(channel, "chan-a");
    assert_eq!(message_id, &mirror);
    assert_eq!(change.content.as_deref(), Some("@everyone\nfixed"));
    assert!(change.files.is_empty());
    assert_eq!(edits[1].2.content.as_deref(), Some("fixed"));
}

#[tokio::test]
async fn test_edit_replaces_album_attachment() {
    let h = harness();
    relay_album(&h).await;
    let before = h.links.get_by_telegram_id("chan-a", 11).await.unwrap();
    let kept_expected = vec![
        before[0].discord_attachment_id.clone().unwrap(),
        before[2].discord_attachment_id.clone().unwrap(),
    ];

    h.telegram.add_file("file-new", b"new");
    edit(&h, album_post(11, None, photo("file-new", "uniq-new"))).await;

    let edits = h.discord.edits();
    assert_eq!(edits.len(), 2);
    let (_, message_id, change) = &edits[0];
    assert_eq!(message_id, &before[0].discord_msg_id);
    // Not the main post: text stays untouched.
    assert!(change.content.is_none());
    assert_eq!(change.keep_attachments.as_ref(), Some(&kept_expected));
    assert_eq!(change.files.len(), 1);
    assert_eq!(change.files[0].data, b"new".to_vec());

    let after = h.links.get_by_telegram_id("chan-a", 11).await.unwrap();
    let replaced = after.iter().find(|l| l.telegram_msg_id == 11).unwrap();
    assert_eq!(replaced.telegram_attachment_id.as_deref(), Some("uniq-new"));
    assert!(!kept_expected.contains(replaced.discord_attachment_id.as_ref().unwrap()));
    assert_ne!(
        replaced.discord_attachment_id,
        before[1].discord_attachment_id
    );
}

#[tokio::test]
async fn test_edit_with_same_attachment_and_no_main_post_is_noop() {
    let h = harness();
    relay_album(&h).await;
    edit(&h, album_post(12, None, photo("file-12", "uniq-12"))).await;
    assert!(h.discord.edits().is_empty());
}

#[tokio::test]
async fn test_album_caption_on_later_item_owns_content() {
    let h = harness();
    for (id, caption) in [(40, None), (41, None), (42, Some("Caption on item three"))] {
        let file_id = format!("file-{}", id);
        h.telegram.add_file(&file_id, b"jpg");
        post(&h, album_post(id, caption, photo(&file_id, &format!("uniq-{}", id)))).await;
    }
    h.relay.drain_pending().await;
    assert_eq!(
        h.discord.sends_to("chan-b")[0].content,
        "Caption on item three"
    );

    let links = h.links.get_by_telegram_id("chan-b", 40).await.unwrap();
    let main: Vec<i32> = links
        .iter()
        .filter(|l| l.main_post)
        .map(|l| l.telegram_msg_id)
        .collect();
    assert_eq!(main, vec![42]);

    // Replacing the first photo leaves the caption alone.
    h.telegram.add_file("file-new", b"new");
    edit(&h, album_post(40, None, photo("file-new", "uniq-new"))).await;
    let edits = h.discord.edits();
    assert_eq!(edits.len(), 2);
    assert!(edits.iter().all(|(_, _, e)| e.content.is_none()));

    // Editing the caption itself reaches Discord.
    edit(
        &h,
        album_post(42, Some("Fixed caption"), photo("file-42", "uniq-42")),
    )
    .await;
    let edits = h.discord.edits();
    assert_eq!(edits.len(), 4);
    assert_eq!(edits[2].2.content.as_deref(), Some("@everyone\nFixed caption"));
    assert_eq!(edits[3].2.content.as_deref(), Some("Fixed caption"));
    assert!(edits[3].2.files.is_empty());
}

#[tokio::test]
async fn test_edit_of_unmirrored_post_is_ignored() {
    let h = harness();
    edit(&h, text_post(99, "never relayed")).await;
    assert!(h.discord.calls().is_empty());
}

#[tokio::test]
async fn test_oversized_and_missing_attachments_are_skipped() {
    let settings = DiscordConfig {
        max_attachment_bytes: 5,
        ..Default::default()
    };
    let h = harness_with(GroupedRepostPolicy::Repost, settings);
    h.telegram.add_file("big", b"0123456789");

    let mut p = text_post(1, "files");
    p.attachments = vec![
        MediaRef {
            size: 0,
            ..photo("big", "u-big")
        },
        photo("missing", "u-missing"),
    ];
    post(&h, p).await;

    let sent = h.discord.sends_to("chan-a");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].files.is_empty());
    let link = &h.links.get_by_telegram_id("chan-a", 1).await.unwrap()[0];
    assert!(link.telegram_attachment_id.is_none());
}

#[tokio::test]
async fn test_posts_from_other_chats_are_ignored() {
    let h = harness();
    let mut p = text_post(1, "hello");
    p.chat_id = -100777;
    post(&h, p).await;
    assert!(h.discord.calls().is_empty());
}

#[tokio::test]
async fn test_flush_loop_relays_album() {
    let h = harness();
    let batcher = Arc::new(MediaGroupBatcher::new(
        Duration::from_millis(30),
        Span::none(),
    ));
    let discord = h.discord.clone();
    let mut sessions: HashMap<String, Arc<dyn DiscordApi>> = HashMap::new();
    sessions.insert("alice".to_string(), discord.clone());
    let relay = Arc::new(Relay::new(
        Storage::new(vec![streamer()]).unwrap(),
        h.links.clone(),
        Publisher::new(
            Arc::new(SessionRegistry::from_sessions(sessions)),
            DiscordConfig::default(),
            Span::none(),
        ),
        h.telegram.clone(),
        batcher.clone(),
        GroupedRepostPolicy::Repost,
        Span::none(),
    ));
    let handle = batcher.spawn_flush_loop(Duration::from_millis(10), relay.flush_fn());

    h.telegram.add_file("f1", b"1");
    h.telegram.add_file("f2", b"2");
    relay
        .on_update(IncomingUpdate::ChannelPost(album_post(1, Some("a"), photo("f1", "u1"))))
        .await;
    relay
        .on_update(IncomingUpdate::ChannelPost(album_post(2, None, photo("f2", "u2"))))
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await.unwrap();

    let sent = discord.sends_to("chan-a");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].files.len(), 2);
}
