//! Numera Common - Shared configuration, errors and logging for the Numera bot.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment)
//! - Configuration validation
//! - Error types
//! - Logging setup
//! - Small utility functions (log redaction, truncation)

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{CompletionConfig, Config, ConfigSource, ObservabilityConfig, TelegramConfig};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
