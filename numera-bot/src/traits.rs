//! Channel traits for implementing transport adapters.

use crate::message::{ChannelMessage, OutgoingMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Transport failure reported by a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),
}

/// Channel adapter trait.
///
/// The dispatcher only ever calls [`Channel::send`]; the rest is used by the
/// binary to bring the transport up and down.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Initialize the channel (connect, authenticate, etc.).
    async fn init(&self) -> ChannelResult<()>;

    /// Send a message to the channel. Returns the transport's ID of the
    /// first delivered chunk.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String>;

    /// Listen for incoming messages and forward them to `tx`.
    ///
    /// Runs until the receiving side is dropped.
    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()>;

    /// Shutdown the channel gracefully.
    async fn shutdown(&self) -> ChannelResult<()>;
}
