//! Configuration management for the Numera bot.
//!
//! The bot reads an optional JSON file at `~/.numera/config.json` (or the path
//! in `NUMERA_CONFIG`) and then applies environment overrides.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `OPENAI_API_KEY` → completion.api_key
//! - `OPENAI_MODEL` → completion.model
//! - `OPENAI_BASE_URL` → completion.base_url
//! - `NUMERA_LOG_LEVEL` → observability.log_level
//! - `NUMERA_LOG_FORMAT` → observability.log_format

use crate::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "NUMERA_CONFIG";

/// Default completion model when neither file nor environment sets one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".numera"),
        |dirs| dirs.home_dir().join(".numera"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Telegram transport
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Completion backend
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from this file
    File(PathBuf),
    /// No file at this path; defaults were used
    Defaults(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults(path) => write!(f, "defaults ({} not found)", path.display()),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<(Self, ConfigSource)> {
        Self::load_or_default(&config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// Nothing is logged here; callers report the source once logging is up.
    pub fn load_or_default(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())));
        }
        let config = Self::load_from(path)?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<(Self, ConfigSource)> {
        let (mut config, source) = Self::load()?;
        config.apply_env_overrides();
        Ok((config, source))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are ignored so that `OPENAI_MODEL=` does not blank the model.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.completion.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.completion.model = model;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.completion.base_url = url;
        }
        if let Some(level) = get("NUMERA_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = get("NUMERA_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Telegram bot token, or a configuration error if absent.
    pub fn telegram_bot_token(&self) -> Result<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is not set".into()))
    }

    /// Completion backend API key, or a configuration error if absent.
    pub fn completion_api_key(&self) -> Result<&str> {
        self.completion
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))
    }
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token (normally supplied through `TELEGRAM_BOT_TOKEN`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Bot API base URL
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Long-poll timeout for `getUpdates`
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Completion backend
// ============================================================================

/// Completion backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// API key (normally supplied through `OPENAI_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// API base URL (OpenAI-compatible)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Upper bound on a single completion call, including queueing for a worker
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of blocking workers that may call the backend at once
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            workers: default_workers(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

fn default_temperature() -> f32 {
    0.6
}

fn default_max_tokens() -> u32 {
    1600
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_workers() -> usize {
    4
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
