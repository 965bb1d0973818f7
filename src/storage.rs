//! Static streamer list loaded from the JSON streamers file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// A Discord channel a streamer's posts are mirrored into.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DiscordChannel {
    pub channel_id: String,
    /// `@everyone`/`@here` verbatim, a role id otherwise, or empty for no ping.
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StreamerConfig {
    pub name: String,
    pub telegram_channel_id: i64,
    pub discord_bot_token: String,
    pub discord_channels: Vec<DiscordChannel>,
}

#[derive(Debug, Clone)]
pub struct Storage {
    streamers: Vec<StreamerConfig>,
}

impl Storage {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read streamers file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid streamers file: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let streamers: Vec<StreamerConfig> =
            serde_json::from_str(content).context("Failed to parse streamers JSON")?;
        Self::new(streamers)
    }

    pub fn new(streamers: Vec<StreamerConfig>) -> Result<Self> {
        if streamers.is_empty() {
            bail!("no streamers configured");
        }

        let mut names = HashSet::new();
        let mut channels = HashSet::new();
        for streamer in &streamers {
            if streamer.name.trim().is_empty() {
                bail!("streamer with telegram channel {} has no name", streamer.telegram_channel_id);
            }
            if !names.insert(streamer.name.as_str()) {
                bail!("duplicate streamer name: {}", streamer.name);
            }
            if !channels.insert(streamer.telegram_channel_id) {
                bail!(
                    "telegram channel {} is assigned to more than one streamer",
                    streamer.telegram_channel_id
                );
            }
            if streamer.discord_bot_token.trim().is_empty() {
                bail!("streamer {} has no discord_bot_token", streamer.name);
            }
            if streamer.discord_channels.is_empty() {
                bail!("streamer {} has no discord_channels", streamer.name);
            }
        }

        Ok(Self { streamers })
    }

    pub fn streamers(&self) -> &[StreamerConfig] {
        &self.streamers
    }

    pub fn by_telegram_id(&self, telegram_channel_id: i64) -> Option<&StreamerConfig> {
        self.streamers
            .iter()
            .find(|s| s.telegram_channel_id == telegram_channel_id)
    }
}
