/// Commands an admin can post into a mirrored channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reply to a post to remove it from Telegram and every Discord mirror.
    Delete,
}

impl Command {
    /// Parse the first word of a channel post. `/delete@other_bot` is not ours.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Command> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = match name.split_once('@') {
            Some((name, mention)) => {
                let ours = bot_username.is_some_and(|u| u.eq_ignore_ascii_case(mention));
                if !ours {
                    return None;
                }
                name
            }
            None => name,
        };

        match name.to_ascii_lowercase().as_str() {
            "delete" => Some(Command::Delete),
            _ => None,
        }
    }
}

/// First word of a command post, for logging.
pub fn command_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or_default()
}
