//! Numera - numerology chat bot.
//!
//! Routes Telegram text through a small per-user mode machine to one of four
//! prompt builders, forwards the prompt to a completion backend and relays
//! the answer.
//!
//! ## Architecture
//!
//! ```text
//! Telegram ── getUpdates ──▶ TelegramChannel::listen ── mpsc ──▶ processor
//!                                                                  │
//!                              SessionStore ◀──── Dispatcher ◀─────┘
//!                                                   │
//!                      CompletionGateway (Semaphore + spawn_blocking)
//!                                                   │
//! Telegram ◀── sendMessage ◀── TelegramChannel::send ◀── reply
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod date;
pub mod dispatcher;
pub mod gateway;
pub mod menu;
pub mod message;
pub mod prompts;
pub mod session;
pub mod telegram;
pub mod traits;

// Re-export commonly used types
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use gateway::{
    CompletionBackend, CompletionFailure, CompletionGateway, CompletionRequest, GatewaySettings,
    OpenAiBackend,
};
pub use menu::MenuAction;
pub use message::{ChannelMessage, OutgoingContent, OutgoingMessage, ReplyKeyboard};
pub use session::{MemorySessionStore, Mode, SessionStore};
pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelError, ChannelResult};

use numera_common::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Inbound queue depth between the listener and the processor.
const MESSAGE_BUFFER: usize = 100;

/// How long in-flight handlers get to finish after shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the bot until Ctrl-C or until the listener stops.
///
/// `backend` is built by the caller, outside the async runtime.
pub async fn start_bot(config: &Config, backend: Arc<dyn CompletionBackend>) -> anyhow::Result<()> {
    let token = config.telegram_bot_token()?.to_string();
    let channel = Arc::new(TelegramChannel::with_config(token, &config.telegram));
    channel.init().await?;

    let gateway = Arc::new(CompletionGateway::new(
        backend,
        GatewaySettings::from(&config.completion),
    ));
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let dispatcher = Arc::new(Dispatcher::new(sessions, gateway, channel.clone()));

    let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
    let processor_handle = Dispatcher::spawn_processor(dispatcher, rx);

    let listener = channel.clone();
    let mut listener_handle = tokio::spawn(async move { listener.listen(tx).await });

    tracing::info!(
        model = %config.completion.model,
        workers = config.completion.workers,
        "Numera bot is running"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown signal received");
        }
        joined = &mut listener_handle => {
            match joined {
                Ok(Ok(())) => tracing::warn!("Telegram listener stopped"),
                Ok(Err(e)) => tracing::error!(error = %e, "Telegram listener failed"),
                Err(e) => tracing::error!(error = %e, "Telegram listener task failed"),
            }
        }
    }

    // Dropping the listener closes the queue; the processor drains and exits.
    listener_handle.abort();

    if tokio::time::timeout(DRAIN_TIMEOUT, processor_handle)
        .await
        .is_err()
    {
        tracing::warn!("In-flight messages did not finish before shutdown");
    }

    channel.shutdown().await?;
    tracing::info!("Numera bot stopped");
    Ok(())
}
