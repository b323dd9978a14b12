//! OpenAI chat completions backend.
//!
//! Uses the blocking `reqwest` client; the gateway is responsible for
//! keeping these calls off the async workers.

use super::{CompletionBackend, CompletionFailure, CompletionRequest};
use numera_common::util::{sanitize_for_log, truncate_with_ellipsis};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest error body kept in a failure.
const MAX_ERROR_BODY_CHARS: usize = 500;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a CompletionRequest> for ChatCompletionRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ============================================================================
// Backend
// ============================================================================

/// OpenAI (or OpenAI-compatible) chat completions backend.
pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl OpenAiBackend {
    /// Create a new backend.
    ///
    /// Must be called outside an async context: the blocking client owns its
    /// own runtime.
    pub fn new(api_key: impl Into<String>, base_url: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

impl CompletionBackend for OpenAiBackend {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionFailure> {
        let body = ChatCompletionRequest::from(request);

        tracing::debug!(
            model = %request.model,
            prompt_chars = request.prompt.chars().count(),
            "Calling completion backend"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        parse_response(status, &text)
    }
}

/// A client-side timeout is reported as `Timeout(timeout)`, like the gateway's own.
fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> CompletionFailure {
    if e.is_timeout() {
        return CompletionFailure::Timeout(timeout);
    }
    let detail = sanitize_for_log(&e.to_string());
    if e.is_decode() {
        CompletionFailure::Malformed(detail)
    } else {
        CompletionFailure::Network(detail)
    }
}

/// Map an HTTP status and body to completion text or a classified failure.
fn parse_response(status: u16, body: &str) -> Result<String, CompletionFailure> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());
        let message = truncate_with_ellipsis(&sanitize_for_log(&message), MAX_ERROR_BODY_CHARS);

        return Err(match status {
            401 | 403 => CompletionFailure::Auth(message),
            429 => CompletionFailure::RateLimited(message),
            _ => CompletionFailure::Api {
                status,
                body: message,
            },
        });
    }

    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| CompletionFailure::Malformed(e.to_string()))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(CompletionFailure::Empty);
    }
    Ok(trimmed.to_string())
}
