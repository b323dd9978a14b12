//! Completion gateway.
//!
//! The backend call is blocking. The gateway runs it on tokio's blocking
//! pool, never more than `workers` at a time, and bounds the wait with a
//! timeout so a stuck backend cannot hold a user's reply forever.
//!
//! ```text
//! dispatcher ── complete(prompt) ──▶ Semaphore permit ──▶ spawn_blocking
//!      ▲                                                      │
//!      └──────── trimmed text | CompletionFailure ◀── backend.complete()
//! ```

pub mod openai;

pub use openai::OpenAiBackend;

use numera_common::config::CompletionConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::prompts::SYSTEM_PROMPT;

/// Classified failure of a completion call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend rejected credentials: {0}")]
    Auth(String),

    #[error("backend rate limit or quota exceeded: {0}")]
    RateLimited(String),

    #[error("backend returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("backend returned an empty completion")]
    Empty,

    #[error("completion worker failed: {0}")]
    Worker(String),
}

impl CompletionFailure {
    /// Stable label for structured logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Auth(_) => "auth",
            Self::RateLimited(_) => "rate_limited",
            Self::Api { .. } => "api",
            Self::Malformed(_) => "malformed",
            Self::Empty => "empty",
            Self::Worker(_) => "worker",
        }
    }
}

/// Everything the backend needs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A blocking text-generation backend.
///
/// Called from a blocking worker thread, never from an async task.
pub trait CompletionBackend: Send + Sync + 'static {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionFailure>;
}

/// Fixed sampling settings applied to every request.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub workers: usize,
}

impl From<&CompletionConfig> for GatewaySettings {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            workers: config.workers.max(1),
        }
    }
}

/// Bridges the blocking backend into async dispatch.
pub struct CompletionGateway {
    backend: Arc<dyn CompletionBackend>,
    permits: Arc<Semaphore>,
    settings: GatewaySettings,
}

impl CompletionGateway {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: GatewaySettings) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(settings.workers.max(1))),
            settings,
        }
    }

    /// Request built for `prompt` with the fixed persona and sampling settings.
    pub fn request_for(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: prompt.to_string(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Run one completion off the async scheduler.
    ///
    /// The timeout covers waiting for a worker as well as the call itself. A
    /// call that times out keeps its worker until the backend returns.
    pub async fn complete(&self, prompt: &str) -> Result<String, CompletionFailure> {
        let request = self.request_for(prompt);
        let backend = Arc::clone(&self.backend);
        let permits = Arc::clone(&self.permits);

        let call = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| CompletionFailure::Worker(e.to_string()))?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                backend.complete(&request)
            })
            .await
            .map_err(|e| CompletionFailure::Worker(e.to_string()))?
        };

        let text = tokio::time::timeout(self.settings.timeout, call)
            .await
            .map_err(|_| CompletionFailure::Timeout(self.settings.timeout))??;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CompletionFailure::Empty);
        }
        Ok(trimmed.to_string())
    }
}
