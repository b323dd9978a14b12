//! Message types for channel communication.

use serde::{Deserialize, Serialize};

/// Inbound text message, already stripped of transport details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID (locally generated)
    pub id: String,
    /// Chat identifier replies are sent to
    pub channel_id: String,
    /// User identifier; the session key
    pub user_id: String,
    /// Raw message text (not yet trimmed)
    pub text: String,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
    /// Trace ID carried through every log line of this message
    pub trace_id: String,
}

impl ChannelMessage {
    /// Build a message for `user_id` in the chat `channel_id`.
    pub fn new(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            trace_id: numera_common::logging::generate_trace_id(),
        }
    }

    /// Message text with surrounding whitespace removed.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

/// Outgoing message to send to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target chat ID
    pub channel_id: String,
    /// Message content
    pub content: OutgoingContent,
    /// Reply keyboard to show under the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<ReplyKeyboard>,
}

impl OutgoingMessage {
    /// Plain text reply.
    pub fn text(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: OutgoingContent::Text { text: text.into() },
            keyboard: None,
        }
    }

    /// Reply rendered with literal-formatting markup (e.g. `` `14.11.2003` ``).
    pub fn markdown(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: OutgoingContent::Markdown { text: text.into() },
            keyboard: None,
        }
    }

    /// Attach a reply keyboard.
    pub fn with_keyboard(mut self, keyboard: ReplyKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Text of the message regardless of rendering hint.
    pub fn body(&self) -> &str {
        match &self.content {
            OutgoingContent::Text { text } | OutgoingContent::Markdown { text } => text,
        }
    }
}

/// Outgoing message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingContent {
    /// Plain text
    Text { text: String },
    /// Markdown text
    Markdown { text: String },
}

/// Persistent keyboard of text buttons, one button per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyKeyboard {
    pub buttons: Vec<String>,
}

impl ReplyKeyboard {
    pub fn new<I, S>(buttons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buttons: buttons.into_iter().map(Into::into).collect(),
        }
    }
}
