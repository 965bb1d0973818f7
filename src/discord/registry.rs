use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, info_span, Span};

use super::{DiscordApi, DiscordClient};
use crate::storage::Storage;

/// One Discord session per streamer, created at startup and kept for the
/// life of the process.
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<dyn DiscordApi>>,
}

impl SessionRegistry {
    pub fn from_streamers(storage: &Storage, timeout: Duration, parent: &Span) -> Result<Self> {
        let mut sessions: HashMap<String, Arc<dyn DiscordApi>> = HashMap::new();
        for streamer in storage.streamers() {
            let span = info_span!(parent: parent, "session", streamer = %streamer.name);
            let client = DiscordClient::new(&streamer.discord_bot_token, timeout, span)
                .with_context(|| format!("Failed to create Discord session for {}", streamer.name))?;
            info!(parent: parent, "Discord session ready for {}", streamer.name);
            sessions.insert(streamer.name.clone(), Arc::new(client));
        }
        Ok(Self { sessions })
    }

    pub fn from_sessions(sessions: HashMap<String, Arc<dyn DiscordApi>>) -> Self {
        Self { sessions }
    }

    pub fn get(&self, streamer: &str) -> Option<Arc<dyn DiscordApi>> {
        self.sessions.get(streamer).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub async fn close_all(&self) {
        for (name, session) in &self.sessions {
            session.close().await;
            info!("Closed Discord session for {}", name);
        }
    }
}
