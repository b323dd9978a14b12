//! Configuration validation.
//!
//! The bot refuses to start unless both secrets are present and the
//! completion settings are within usable ranges. All problems are collected
//! so the operator sees them in one go.

use thiserror::Error;

use crate::config::{CompletionConfig, Config, ObservabilityConfig, TelegramConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// Valid values for `observability.log_format`.
const LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for result in [
            self.telegram.validate(),
            self.completion.validate(),
            self.observability.validate(),
        ] {
            match result {
                Ok(()) => {}
                Err(ValidationError::Multiple(inner)) => errors.extend(inner),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl Validate for TelegramConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if is_blank(self.bot_token.as_deref()) {
            errors.push(ValidationError::MissingField {
                field: "telegram.bot_token (TELEGRAM_BOT_TOKEN)".into(),
            });
        }
        if self.api_base.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "telegram.api_base".into(),
            });
        }

        collect(errors)
    }
}

impl Validate for CompletionConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if is_blank(self.api_key.as_deref()) {
            errors.push(ValidationError::MissingField {
                field: "completion.api_key (OPENAI_API_KEY)".into(),
            });
        }
        if self.model.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "completion.model".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push(ValidationError::InvalidValue {
                field: "completion.temperature".into(),
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.max_tokens == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "completion.max_tokens".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "completion.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.workers == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "completion.workers".into(),
                reason: "must be greater than 0".into(),
            });
        }

        collect(errors)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected one of {LOG_FORMATS:?}, got {:?}", self.log_format),
            });
        }
        Ok(())
    }
}
