//! Telegram channel adapter.
//!
//! Long-polls the Bot API for text messages and sends replies with the
//! persistent menu keyboard.

use crate::message::{ChannelMessage, OutgoingContent, OutgoingMessage, ReplyKeyboard};
use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use numera_common::config::TelegramConfig;
use numera_common::util::sanitize_for_log;
use once_cell::sync::OnceCell;
use std::time::Duration;
use tokio::sync::mpsc;

/// Telegram's per-message text limit, in characters.
const MAX_MESSAGE_LEN: usize = 4096;

/// Pause before retrying after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    /// Username reported by `getMe`, without the leading `@`
    username: OnceCell<String>,
}

impl TelegramChannel {
    /// Create a new Telegram channel against the public Bot API.
    pub fn new(bot_token: String) -> Self {
        Self::with_config(bot_token, &TelegramConfig::default())
    }

    /// Create a new Telegram channel from configuration.
    pub fn with_config(bot_token: String, config: &TelegramConfig) -> Self {
        // Long polls must outlive the server-side poll timeout.
        let request_timeout = Duration::from_secs(config.poll_timeout_secs + 15);
        Self {
            bot_token,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            poll_timeout_secs: config.poll_timeout_secs,
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            username: OnceCell::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Send a single message chunk, falling back to plain text if Telegram
    /// cannot parse the markup.
    async fn send_single_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markdown: bool,
        keyboard: Option<&ReplyKeyboard>,
    ) -> anyhow::Result<i64> {
        let body = build_send_body(chat_id, text, markdown, keyboard);

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            return sent_message_id(&resp.json::<serde_json::Value>().await?);
        }

        let status = resp.status();
        let error_text = resp.text().await.unwrap_or_default();

        // Telegram returns "Bad Request: can't parse entities" for markup errors
        if markdown && status.as_u16() == 400 && error_text.contains("parse entities") {
            tracing::warn!(
                "Telegram Markdown parsing failed, retrying without parse_mode: {}",
                error_text
            );

            let body_plain = build_send_body(chat_id, text, false, keyboard);
            let resp_plain = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&body_plain)
                .send()
                .await?;

            if resp_plain.status().is_success() {
                return sent_message_id(&resp_plain.json::<serde_json::Value>().await?);
            }

            let plain_error = resp_plain.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed: {plain_error}");
        }

        anyhow::bail!("Telegram sendMessage failed ({status}): {error_text}")
    }
}

/// Build the `sendMessage` JSON body.
fn build_send_body(
    chat_id: &str,
    text: &str,
    markdown: bool,
    keyboard: Option<&ReplyKeyboard>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    });

    if markdown {
        body["parse_mode"] = serde_json::Value::String("Markdown".into());
    }

    if let Some(kb) = keyboard {
        let rows: Vec<Vec<serde_json::Value>> = kb
            .buttons
            .iter()
            .map(|label| vec![serde_json::json!({ "text": label })])
            .collect();
        body["reply_markup"] = serde_json::json!({
            "keyboard": rows,
            "resize_keyboard": true
        });
    }

    body
}

/// `result.message_id` of a successful `sendMessage` response.
fn sent_message_id(response: &serde_json::Value) -> anyhow::Result<i64> {
    response
        .get("result")
        .and_then(|r| r.get("message_id"))
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| anyhow::anyhow!("sendMessage response has no message_id"))
}

/// Whether a `/command@bot` in `text` is addressed to some other bot.
///
/// Commands without a suffix, and everything when our username is not yet
/// known, are treated as ours.
fn addressed_to_other_bot(text: &str, own_username: Option<&str>) -> bool {
    let Some(own) = own_username else {
        return false;
    };
    let command = text.trim_start().split_whitespace().next().unwrap_or_default();
    if !command.starts_with('/') {
        return false;
    }
    match command.split_once('@') {
        Some((_, target)) => !target.eq_ignore_ascii_case(own),
        None => false,
    }
}

/// Extract a text message from a `getUpdates` entry.
///
/// Returns `None` for updates without a text message (stickers, photos,
/// edits, service messages) and for commands addressed to another bot.
fn parse_update(update: &serde_json::Value, own_username: Option<&str>) -> Option<ChannelMessage> {
    let message = update.get("message")?;
    let text = message.get("text")?.as_str()?;
    if addressed_to_other_bot(text, own_username) {
        return None;
    }

    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let user_id = message
        .get("from")
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(chat_id);

    Some(ChannelMessage::new(
        chat_id.to_string(),
        user_id.to_string(),
        text,
    ))
}

/// Split a message into chunks of at most `max_chars` characters, preferring
/// paragraph, line, sentence and word boundaries.
fn split_message(message: &str, max_chars: usize) -> Vec<String> {
    if message.chars().count() <= max_chars {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        let limit = match remaining.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(remaining.to_string());
                break;
            }
        };

        let window = &remaining[..limit];
        let split_pos = window
            .rfind("\n\n")
            .or_else(|| window.rfind('\n'))
            .or_else(|| window.rfind(". ").map(|p| p + 1))
            .or_else(|| window.rfind(' '))
            .filter(|&p| p > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_pos].to_string());
        remaining = remaining[split_pos..].trim_start();
    }

    chunks
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn init(&self) -> ChannelResult<()> {
        // Verify bot token by calling getMe
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::Connection(sanitize_for_log(&e.to_string())))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Auth(format!("Invalid bot token: {err}")));
        }

        let me: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Connection(sanitize_for_log(&e.to_string())))?;
        if let Some(username) = me
            .get("result")
            .and_then(|r| r.get("username"))
            .and_then(serde_json::Value::as_str)
        {
            let _ = self.username.set(username.to_string());
        }

        tracing::info!(
            username = self.username.get().map(String::as_str).unwrap_or("unknown"),
            "Telegram channel initialized"
        );
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let (text, markdown) = match &message.content {
            OutgoingContent::Text { text } => (text.as_str(), false),
            OutgoingContent::Markdown { text } => (text.as_str(), true),
        };

        let mut first_id = None;
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        for (i, chunk) in chunks.iter().enumerate() {
            // The keyboard rides on the first chunk only
            let keyboard = if i == 0 { message.keyboard.as_ref() } else { None };
            let id = self
                .send_single_chunk(&message.channel_id, chunk, markdown, keyboard)
                .await
                .map_err(|e| ChannelError::SendFailed(sanitize_for_log(&e.to_string())))?;
            first_id.get_or_insert(id);
        }

        first_id
            .map(|id| id.to_string())
            .ok_or_else(|| ChannelError::SendFailed("nothing to send".into()))
    }

    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"]
            });

            let resp = match self.client.post(self.api_url("getUpdates")).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {}", sanitize_for_log(&e.to_string()));
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {}", sanitize_for_log(&e.to_string()));
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let Some(results) = data.get("result").and_then(serde_json::Value::as_array) else {
                tracing::warn!(response = %data, "Telegram getUpdates returned no result");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            };

            for update in results {
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(msg) = parse_update(update, self.username.get().map(String::as_str))
                else {
                    continue;
                };

                tracing::info!(
                    trace_id = %msg.trace_id,
                    message_id = %msg.id,
                    channel_id = %msg.channel_id,
                    user_id = %msg.user_id,
                    "Telegram message received"
                );

                if tx.send(msg).await.is_err() {
                    tracing::info!("Message receiver dropped, stopping Telegram polling");
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}
