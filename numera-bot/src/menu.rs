//! Menu surface: fixed button labels and the actions they trigger.

use crate::message::ReplyKeyboard;
use crate::session::Mode;

pub const MATRIX_BUTTON: &str = "💜 Рассчитать матрицу судьбы по дате рождения";
pub const COMPATIBILITY_BUTTON: &str = "💞 Совместимость по датам рождения";
pub const YEAR_BUTTON: &str = "🌀 Число года и ближайший период";
pub const FREE_CHAT_BUTTON: &str = "✨ Просто поговорить";

/// Command that resets the user and shows the menu.
pub const START_COMMAND: &str = "/start";

/// A mode-selecting action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Start,
    Matrix,
    Compatibility,
    Year,
    FreeChat,
}

/// Button labels in keyboard order.
const BUTTONS: [(&str, MenuAction); 4] = [
    (MATRIX_BUTTON, MenuAction::Matrix),
    (COMPATIBILITY_BUTTON, MenuAction::Compatibility),
    (YEAR_BUTTON, MenuAction::Year),
    (FREE_CHAT_BUTTON, MenuAction::FreeChat),
];

impl MenuAction {
    /// Recognise a menu action in trimmed message text.
    ///
    /// Labels must match exactly. `/start` may carry a bot mention
    /// (`/start@numera_bot`) or a deep-link payload (`/start ref42`).
    pub fn parse(text: &str) -> Option<Self> {
        if is_start_command(text) {
            return Some(Self::Start);
        }
        BUTTONS
            .iter()
            .find(|(label, _)| *label == text)
            .map(|(_, action)| *action)
    }

    /// Mode the user is in after this action.
    pub const fn target_mode(&self) -> Mode {
        match self {
            Self::Start | Self::FreeChat => Mode::None,
            Self::Matrix => Mode::AwaitingBirthDate,
            Self::Compatibility => Mode::AwaitingCompatibilityDates,
            Self::Year => Mode::AwaitingYearQuery,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Matrix => "matrix",
            Self::Compatibility => "compatibility",
            Self::Year => "year",
            Self::FreeChat => "free_chat",
        }
    }
}

fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    let name = command.split('@').next().unwrap_or_default();
    name == START_COMMAND
}

/// The main menu keyboard.
pub fn main_keyboard() -> ReplyKeyboard {
    ReplyKeyboard::new(BUTTONS.iter().map(|(label, _)| *label))
}
