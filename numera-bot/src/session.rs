//! Per-user conversational mode.
//!
//! The store is the single source of truth for which flow a user's next
//! free-text message belongs to. A user absent from the store is in
//! [`Mode::None`]; `None` itself is never stored.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Conversational sub-flow gating how the next message is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Free chat
    #[default]
    None,
    /// Waiting for a `DD.MM.YYYY` birth date for the destiny matrix
    AwaitingBirthDate,
    /// Waiting for free text with the partners' dates
    AwaitingCompatibilityDates,
    /// Waiting for a birth date and optional year of interest
    AwaitingYearQuery,
}

impl Mode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AwaitingBirthDate => "awaiting_birth_date",
            Self::AwaitingCompatibilityDates => "awaiting_compatibility_dates",
            Self::AwaitingYearQuery => "awaiting_year_query",
        }
    }

    /// Whether a message in this mode consumes the mode afterwards.
    pub const fn is_one_shot(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage for per-user modes.
///
/// Implementations must be safe to share between tasks.
pub trait SessionStore: Send + Sync {
    /// Current mode, or `None` if the user has no pending mode.
    fn get(&self, user_id: &str) -> Option<Mode>;

    /// Set the user's mode. Setting [`Mode::None`] clears the entry.
    fn set(&self, user_id: &str, mode: Mode);

    /// Forget the user's pending mode.
    fn clear(&self, user_id: &str);

    /// Current mode, defaulting to [`Mode::None`].
    fn mode_of(&self, user_id: &str) -> Mode {
        self.get(user_id).unwrap_or_default()
    }
}

/// In-memory store; lives for the process lifetime.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    modes: DashMap<String, Mode>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a pending mode.
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, user_id: &str) -> Option<Mode> {
        self.modes.get(user_id).map(|entry| *entry.value())
    }

    fn set(&self, user_id: &str, mode: Mode) {
        if mode == Mode::None {
            self.clear(user_id);
        } else {
            self.modes.insert(user_id.to_string(), mode);
        }
    }

    fn clear(&self, user_id: &str) {
        self.modes.remove(user_id);
    }
}
