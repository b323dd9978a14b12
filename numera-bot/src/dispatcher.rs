//! Request dispatch.
//!
//! Handles the complete message flow:
//! 1. Menu labels and `/start` select a mode (or reset to free chat)
//! 2. Free text runs the pipeline of the user's current mode:
//!    validate (optional) → build prompt → completion gateway → reply
//! 3. One-shot modes are cleared once their single reply is produced,
//!    whatever the outcome
//!
//! Messages from the same user are handled one at a time; different users
//! never wait on each other.

use crate::date::is_valid_date;
use crate::gateway::{CompletionFailure, CompletionGateway};
use crate::menu::{main_keyboard, MenuAction};
use crate::message::{ChannelMessage, OutgoingMessage};
use crate::prompts::{
    build_chat_prompt, build_compatibility_prompt, build_matrix_prompt, build_year_prompt,
};
use crate::session::{Mode, SessionStore};
use crate::traits::Channel;
use dashmap::DashMap;
use numera_common::logging::generate_incident_code;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;

// ============================================================================
// Reply texts
// ============================================================================

pub const START_REPLY: &str = "Привет! Я нумерологический бот 🔮\n\n\
    Что можем сделать:\n\
    • посчитать матрицу судьбы по дате рождения;\n\
    • посмотреть совместимость по датам;\n\
    • разобрать число года и ближайший период;\n\
    • или просто поболтать на любую тему.\n\n\
    Выбери пункт в меню ниже или напиши свой вопрос ✨";

pub const MATRIX_REPLY: &str = "Напиши, пожалуйста, дату рождения в формате *ДД.ММ.ГГГГ*.\n\
    Например: `14.11.2003`";

pub const COMPATIBILITY_REPLY: &str = "Напиши две даты рождения для совместимости.\n\n\
    Пример:\n\
    `Она: 14.11.2003, он: 05.07.1998`\n\
    или\n\
    `14.11.2003 и 05.07.1998`";

pub const YEAR_REPLY: &str = "Напиши свою дату рождения и, при желании, год, который интересует.\n\n\
    Например:\n\
    `14.11.2003, интересует 2025 год`\n\
    или просто дату — тогда разберём текущий год.";

pub const FREE_CHAT_REPLY: &str =
    "Пиши любой вопрос или ситуацию — отвечу как нумерологический помощник 💫";

pub const INVALID_DATE_REPLY: &str = "Похоже, это не дата в формате *ДД.ММ.ГГГГ* 🤔\n\
    Попробуй ещё раз. Например: `14.11.2003`";

/// Generic notice for any completion failure; the code matches the error log line.
pub fn technical_error_reply(code: &str) -> String {
    format!(
        "Техническая ошибка при обращении к нумерологическому сервису 😔\n\
         Попробуй ещё раз чуть позже.\n\
         Код ошибки: {code}"
    )
}

// ============================================================================
// Mode descriptors
// ============================================================================

/// How free text is handled in one mode.
struct ModeDescriptor {
    /// Log label
    label: &'static str,
    /// Local check; a rejected message re-prompts and keeps the mode
    validate: Option<fn(&str) -> bool>,
    /// Markdown reply sent when `validate` rejects
    invalid_reply: &'static str,
    /// Sent before the completion call
    progress_notice: Option<&'static str>,
    build_prompt: fn(&str) -> String,
}

static MATRIX: ModeDescriptor = ModeDescriptor {
    label: "matrix",
    validate: Some(is_valid_date),
    invalid_reply: INVALID_DATE_REPLY,
    progress_notice: Some("Делаю нумерологический разбор… 🔮"),
    build_prompt: build_matrix_prompt,
};

static COMPATIBILITY: ModeDescriptor = ModeDescriptor {
    label: "compatibility",
    validate: None,
    invalid_reply: "",
    progress_notice: Some("Считаю совместимость, подожди немного… 💞"),
    build_prompt: build_compatibility_prompt,
};

static YEAR: ModeDescriptor = ModeDescriptor {
    label: "year",
    validate: None,
    invalid_reply: "",
    progress_notice: Some("Смотрю число года и ближайший период… 🌀"),
    build_prompt: build_year_prompt,
};

static CHAT: ModeDescriptor = ModeDescriptor {
    label: "chat",
    validate: None,
    invalid_reply: "",
    progress_notice: None,
    build_prompt: build_chat_prompt,
};

impl ModeDescriptor {
    fn for_mode(mode: Mode) -> &'static Self {
        match mode {
            Mode::None => &CHAT,
            Mode::AwaitingBirthDate => &MATRIX,
            Mode::AwaitingCompatibilityDates => &COMPATIBILITY,
            Mode::AwaitingYearQuery => &YEAR,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A menu action switched the user's mode
    MenuSelected(MenuAction),
    /// Validation rejected the text; mode unchanged, no completion call
    Reprompted(Mode),
    /// The completion was delivered
    Answered(Mode),
    /// The completion failed; the user got the generic notice
    Failed {
        mode: Mode,
        kind: &'static str,
        incident: String,
    },
}

/// Clears a one-shot mode when dropped, so even an unwinding handler
/// leaves the user in free chat.
struct ModeReset<'a> {
    sessions: &'a dyn SessionStore,
    user_id: &'a str,
}

impl Drop for ModeReset<'_> {
    fn drop(&mut self) {
        self.sessions.clear(self.user_id);
    }
}

/// Holds a user's turn; on drop releases it and forgets the lock once
/// nobody else holds or waits on it.
struct UserTurn<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    user_id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Routes inbound messages through the per-user state machine.
pub struct Dispatcher {
    sessions: Arc<dyn SessionStore>,
    gateway: Arc<CompletionGateway>,
    channel: Arc<dyn Channel>,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<CompletionGateway>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            sessions,
            gateway,
            channel,
            user_locks: DashMap::new(),
        }
    }

    /// Handle one inbound message end to end.
    ///
    /// Never fails: send errors and completion failures are logged and
    /// reflected in the returned outcome.
    pub async fn handle(&self, message: ChannelMessage) -> DispatchOutcome {
        let lock = self
            .user_locks
            .entry(message.user_id.clone())
            .or_default()
            .clone();
        let _turn = UserTurn {
            locks: &self.user_locks,
            user_id: &message.user_id,
            guard: Some(lock.lock_owned().await),
        };

        self.dispatch(&message).await
    }

    async fn dispatch(&self, message: &ChannelMessage) -> DispatchOutcome {
        let text = message.trimmed_text();

        if let Some(action) = MenuAction::parse(text) {
            self.select(action, message).await;
            return DispatchOutcome::MenuSelected(action);
        }

        let mode = self.sessions.mode_of(&message.user_id);
        self.run_mode(mode, text, message).await
    }

    /// Apply a menu action and send its instructions.
    async fn select(&self, action: MenuAction, message: &ChannelMessage) {
        let mode = action.target_mode();
        self.sessions.set(&message.user_id, mode);

        tracing::info!(
            trace_id = %message.trace_id,
            user_id = %message.user_id,
            action = action.as_str(),
            mode = %mode,
            "Menu action selected"
        );

        let chat = message.channel_id.as_str();
        let reply = match action {
            MenuAction::Start => {
                OutgoingMessage::text(chat, START_REPLY).with_keyboard(main_keyboard())
            }
            MenuAction::Matrix => OutgoingMessage::markdown(chat, MATRIX_REPLY),
            MenuAction::Compatibility => OutgoingMessage::markdown(chat, COMPATIBILITY_REPLY),
            MenuAction::Year => OutgoingMessage::markdown(chat, YEAR_REPLY),
            MenuAction::FreeChat => OutgoingMessage::text(chat, FREE_CHAT_REPLY),
        };
        self.reply(message, reply).await;
    }

    /// The single free-text pipeline shared by every mode.
    async fn run_mode(
        &self,
        mode: Mode,
        text: &str,
        message: &ChannelMessage,
    ) -> DispatchOutcome {
        let descriptor = ModeDescriptor::for_mode(mode);
        let chat = message.channel_id.as_str();

        if let Some(validate) = descriptor.validate {
            if !validate(text) {
                tracing::info!(
                    trace_id = %message.trace_id,
                    user_id = %message.user_id,
                    mode = %mode,
                    "Input rejected, re-prompting"
                );
                self.reply(message, OutgoingMessage::markdown(chat, descriptor.invalid_reply))
                    .await;
                return DispatchOutcome::Reprompted(mode);
            }
        }

        // From here on the mode is consumed, whatever happens.
        let _reset = mode.is_one_shot().then(|| ModeReset {
            sessions: self.sessions.as_ref(),
            user_id: &message.user_id,
        });

        if let Some(notice) = descriptor.progress_notice {
            self.reply(message, OutgoingMessage::text(chat, notice)).await;
        }

        let prompt = (descriptor.build_prompt)(text);

        tracing::info!(
            trace_id = %message.trace_id,
            user_id = %message.user_id,
            mode = %mode,
            flow = descriptor.label,
            "Requesting completion"
        );

        match self.gateway.complete(&prompt).await {
            Ok(answer) => {
                self.reply(message, OutgoingMessage::text(chat, answer)).await;
                DispatchOutcome::Answered(mode)
            }
            Err(failure) => self.report_failure(mode, descriptor.label, failure, message).await,
        }
    }

    async fn report_failure(
        &self,
        mode: Mode,
        flow: &'static str,
        failure: CompletionFailure,
        message: &ChannelMessage,
    ) -> DispatchOutcome {
        let incident = generate_incident_code();

        tracing::error!(
            trace_id = %message.trace_id,
            user_id = %message.user_id,
            mode = %mode,
            flow,
            incident = %incident,
            kind = failure.kind(),
            error = %failure,
            "Completion failed"
        );

        self.reply(
            message,
            OutgoingMessage::text(&message.channel_id, technical_error_reply(&incident)),
        )
        .await;

        DispatchOutcome::Failed {
            mode,
            kind: failure.kind(),
            incident,
        }
    }

    async fn reply(&self, message: &ChannelMessage, reply: OutgoingMessage) {
        if let Err(e) = self.channel.send(reply).await {
            tracing::error!(
                trace_id = %message.trace_id,
                user_id = %message.user_id,
                channel = self.channel.name(),
                error = %e,
                "Failed to send reply"
            );
        }
    }

    /// Start a background processor that handles messages from a channel.
    ///
    /// Each message runs in its own task; a panicking handler is logged and
    /// does not stop the loop.
    pub fn spawn_processor(
        dispatcher: Arc<Self>,
        mut rx: mpsc::Receiver<ChannelMessage>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Dispatcher processor started");
            let mut tasks = JoinSet::new();

            loop {
                tokio::select! {
                    received = rx.recv() => {
                        let Some(message) = received else { break };
                        let dispatcher = dispatcher.clone();
                        tasks.spawn(async move { dispatcher.handle(message).await });
                    }
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        log_joined(joined);
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                log_joined(joined);
            }

            tracing::info!("Dispatcher processor stopped");
        })
    }
}

fn log_joined(joined: Result<DispatchOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => tracing::debug!(?outcome, "Message handled"),
        Err(e) if e.is_panic() => tracing::error!(error = %e, "Message handler panicked"),
        Err(e) => tracing::warn!(error = %e, "Message handler cancelled"),
    }
}
