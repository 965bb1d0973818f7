mod batcher;
mod config;
mod discord;
mod format;
mod links;
mod relay;
mod storage;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::{info, info_span, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::batcher::MediaGroupBatcher;
use crate::config::Config;
use crate::discord::{Publisher, SessionRegistry};
use crate::links::LinkStore;
use crate::relay::Relay;
use crate::storage::Storage;
use crate::telegram::client::TelegramClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Initialize logging: stdout plus a daily rotated file
    let file_appender = tracing_appender::rolling::daily(&config.logging.directory, "publisher.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slm_publisher=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    info!("Configuration loaded from: {}", config_path.display());
    info!("  Streamers file: {}", config.streamers_file.display());
    info!("  Database: {}", config.database.path.display());
    info!(
        "  Batching: flush every {}s, group idle {}s, grouped reposts: {}",
        config.batching.flush_interval_secs,
        config.batching.group_idle_secs,
        config.batching.grouped_reposts
    );

    let storage = Storage::load(&config.streamers_file)?;
    info!("Loaded {} streamer(s)", storage.streamers().len());

    let links = LinkStore::open(&config.database.path)?;

    let discord_span = info_span!("discord");
    let registry = Arc::new(SessionRegistry::from_streamers(
        &storage,
        config.discord.request_timeout(),
        &discord_span,
    )?);
    info!("{} Discord session(s) ready", registry.len());
    let publisher = Publisher::new(Arc::clone(&registry), config.discord.clone(), discord_span);

    let bot = Bot::new(&config.telegram.bot_token);
    let me = bot
        .get_me()
        .await
        .context("Failed to reach Telegram with the configured bot token")?;
    info!("Telegram bot: @{}", me.username());

    let telegram = Arc::new(TelegramClient::new(
        bot.clone(),
        config.telegram.request_timeout(),
    ));
    let batcher = Arc::new(MediaGroupBatcher::new(
        config.batching.group_idle(),
        info_span!("batcher"),
    ));
    let relay = Arc::new(
        Relay::new(
            storage,
            links,
            publisher,
            telegram,
            Arc::clone(&batcher),
            config.batching.grouped_reposts,
            info_span!("relay"),
        )
        .with_bot_username(Some(me.username().to_string())),
    );

    let flush_loop = batcher.spawn_flush_loop(config.batching.flush_interval(), relay.flush_fn());

    info!("Publisher is starting...");
    telegram::listener::run(bot, Arc::clone(&relay), info_span!("telegram")).await;

    // Orderly stop: no more flush ticks, relay what is still buffered, close sessions.
    if let Err(e) = flush_loop.stop().await {
        warn!("Flush loop ended abnormally: {}", e);
    }
    relay.drain_pending().await;
    registry.close_all().await;

    info!("Publisher stopped");
    Ok(())
}
