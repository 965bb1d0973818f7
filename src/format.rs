//! Telegram post text → Discord message content.

use crate::telegram::{EntityKind, TextEntity};

/// Discord's message content limit, in characters.
pub const DISCORD_CONTENT_LIMIT: usize = 2000;

/// Render Telegram formatting entities as Discord markdown.
///
/// Entity offsets are UTF-16 code units. Tags opening at the same position
/// are emitted in entity order and closed in reverse, so nested spans stay
/// balanced. Unsupported or out-of-range entities are dropped.
pub fn telegram_to_discord(text: &str, entities: &[TextEntity]) -> String {
    if text.is_empty() || entities.is_empty() {
        return text.to_string();
    }

    let units: Vec<u16> = text.encode_utf16().collect();
    let n = units.len();
    let mut open_tags = vec![String::new(); n + 1];
    let mut close_tags = vec![String::new(); n + 1];

    for entity in entities {
        let start = entity.offset;
        let end = entity.offset + entity.length;
        if entity.length == 0 || end > n {
            continue;
        }

        let (open, close) = match &entity.kind {
            EntityKind::Bold => ("**".to_string(), "**".to_string()),
            EntityKind::Italic => ("*".to_string(), "*".to_string()),
            EntityKind::Underline => ("__".to_string(), "__".to_string()),
            EntityKind::Strikethrough => ("~~".to_string(), "~~".to_string()),
            EntityKind::Spoiler => ("||".to_string(), "||".to_string()),
            EntityKind::Code => ("`".to_string(), "`".to_string()),
            EntityKind::Pre { language } => (
                format!("```{}\n", language.as_deref().unwrap_or_default()),
                "\n```".to_string(),
            ),
            EntityKind::TextLink { url } => ("[".to_string(), format!("]({})", url)),
            EntityKind::TextMention {
                username: Some(username),
            } => ("[".to_string(), format!("](https://t.me/{})", username)),
            EntityKind::TextMention { username: None } => continue,
        };

        open_tags[start].push_str(&open);
        close_tags[end].insert_str(0, &close);
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut pending: Vec<u16> = Vec::new();
    for i in 0..=n {
        if !close_tags[i].is_empty() || !open_tags[i].is_empty() {
            out.push_str(&String::from_utf16_lossy(&pending));
            pending.clear();
            out.push_str(&close_tags[i]);
            out.push_str(&open_tags[i]);
        }
        if i < n {
            pending.push(units[i]);
        }
    }
    out.push_str(&String::from_utf16_lossy(&pending));
    out
}

/// Mention rendered in front of a post. `@everyone`/`@here` pass through,
/// anything else is a role id.
pub fn format_prefix(prefix: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        String::new()
    } else if prefix.starts_with('@') {
        prefix.to_string()
    } else {
        format!("<@&{}>", prefix)
    }
}

/// Prefix and body joined into message content, clipped to the Discord limit.
pub fn compose_content(prefix: &str, body: &str) -> String {
    let mention = format_prefix(prefix);
    let content = match (mention.is_empty(), body.is_empty()) {
        (true, _) => body.to_string(),
        (false, true) => mention,
        (false, false) => format!("{}\n{}", mention, body),
    };
    clip(&content, DISCORD_CONTENT_LIMIT)
}

/// Public link to a channel post. Private channels use the `t.me/c/` form,
/// which only works for members.
pub fn post_link(chat_id: i64, username: Option<&str>, message_id: i32) -> String {
    match username {
        Some(username) if !username.is_empty() => {
            format!("https://t.me/{}/{}", username, message_id)
        }
        _ => {
            let id = chat_id.to_string();
            let internal = id
                .strip_prefix("-100")
                .or_else(|| id.strip_prefix('-'))
                .unwrap_or(&id);
            format!("https://t.me/c/{}/{}", internal, message_id)
        }
    }
}

/// Cut `content` to at most `limit` characters, marking the cut with `…`.
pub fn clip(content: &str, limit: usize) -> String {
    if content.chars().count() <= limit {
        return content.to_string();
    }
    let mut clipped: String = content.chars().take(limit.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}
