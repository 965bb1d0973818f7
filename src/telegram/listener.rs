use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, info, Instrument, Span};

use super::convert::incoming_post;
use super::IncomingUpdate;
use crate::relay::Relay;

/// Long-poll channel posts and their edits until Ctrl-C.
pub async fn run(bot: Bot, relay: Arc<Relay>, span: Span) {
    info!(parent: &span, "Starting Telegram listener...");

    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handle_channel_post))
        .branch(Update::filter_edited_channel_post().endpoint(handle_edited_channel_post));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            debug!("Ignoring update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .instrument(span.clone())
        .await;

    info!(parent: &span, "Telegram listener stopped");
}

async fn handle_channel_post(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    debug!("Channel post {} in chat {}", msg.id.0, msg.chat.id.0);
    relay
        .on_update(IncomingUpdate::ChannelPost(incoming_post(&msg)))
        .await;
    Ok(())
}

async fn handle_edited_channel_post(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    debug!("Edited channel post {} in chat {}", msg.id.0, msg.chat.id.0);
    relay
        .on_update(IncomingUpdate::EditedChannelPost(incoming_post(&msg)))
        .await;
    Ok(())
}
