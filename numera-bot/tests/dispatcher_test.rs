//! Integration tests for the Numera dispatcher.
//!
//! Drives the full message flow with a recording channel and a scripted
//! completion backend.

use async_trait::async_trait;
use numera_bot::dispatcher::{
    COMPATIBILITY_REPLY, FREE_CHAT_REPLY, INVALID_DATE_REPLY, MATRIX_REPLY, START_REPLY, YEAR_REPLY,
};
use numera_bot::menu::{
    main_keyboard, COMPATIBILITY_BUTTON, FREE_CHAT_BUTTON, MATRIX_BUTTON, YEAR_BUTTON,
};
use numera_bot::prompts::{
    build_chat_prompt, build_compatibility_prompt, build_matrix_prompt, build_year_prompt,
};
use numera_bot::{
    Channel, ChannelError, ChannelMessage, ChannelResult, CompletionBackend, CompletionFailure,
    CompletionGateway, CompletionRequest, DispatchOutcome, Dispatcher, GatewaySettings,
    MemorySessionStore, MenuAction, Mode, OutgoingContent, OutgoingMessage, SessionStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

const CHAT: &str = "chat-1";
const USER: &str = "user-1";

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

/// Records every outgoing message; can be told to fail or panic on send.
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<OutgoingMessage>>,
    fail_sends: AtomicBool,
    panic_chat: Mutex<Option<String>>,
}

impl RecordingChannel {
    fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn last(&self) -> OutgoingMessage {
        self.sent().last().cloned().expect("nothing was sent")
    }

    fn sent_to(&self, chat: &str) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.channel_id == chat)
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn init(&self) -> ChannelResult<()> {
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let should_panic =
            self.panic_chat.lock().unwrap().as_deref() == Some(message.channel_id.as_str());
        if should_panic {
            panic!("transport exploded");
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("chat not found".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message);
        Ok(sent.len().to_string())
    }

    async fn listen(&self, _tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        Ok(())
    }
}

/// Records prompts and answers with a fixed result after an optional delay.
struct ScriptedBackend {
    result: Result<String, CompletionFailure>,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn answering(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(failure: CompletionFailure) -> Self {
        Self {
            result: Err(failure),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionFailure> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.result.clone()
    }
}

struct Harness {
    channel: Arc<RecordingChannel>,
    backend: Arc<ScriptedBackend>,
    sessions: Arc<MemorySessionStore>,
    dispatcher: Arc<Dispatcher>,
}

impl Harness {
    fn new(backend: ScriptedBackend) -> Self {
        let channel = Arc::new(RecordingChannel::default());
        let backend = Arc::new(backend);
        let sessions = Arc::new(MemorySessionStore::new());
        let gateway = Arc::new(CompletionGateway::new(
            backend.clone(),
            GatewaySettings {
                model: "test-model".into(),
                temperature: 0.6,
                max_tokens: 1600,
                timeout: Duration::from_secs(5),
                workers: 4,
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone() as Arc<dyn SessionStore>,
            gateway,
            channel.clone() as Arc<dyn Channel>,
        ));
        Self {
            channel,
            backend,
            sessions,
            dispatcher,
        }
    }

    async fn send(&self, text: &str) -> DispatchOutcome {
        self.dispatcher
            .handle(ChannelMessage::new(CHAT, USER, text))
            .await
    }

    fn mode(&self) -> Mode {
        self.sessions.mode_of(USER)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Menu selection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_shows_menu_and_resets_mode() {
    let h = Harness::new(ScriptedBackend::answering("unused"));
    h.sessions.set(USER, Mode::AwaitingYearQuery);

    let outcome = h.send("/start").await;

    assert_eq!(outcome, DispatchOutcome::MenuSelected(MenuAction::Start));
    assert_eq!(h.mode(), Mode::None);
    assert!(h.sessions.is_empty());

    let reply = h.channel.last();
    assert_eq!(reply.channel_id, CHAT);
    assert_eq!(reply.body(), START_REPLY);
    assert_eq!(reply.keyboard, Some(main_keyboard()));
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn test_specialised_selection_is_independent_of_history() {
    let cases = [
        (MATRIX_BUTTON, Mode::AwaitingBirthDate, MATRIX_REPLY),
        (COMPATIBILITY_BUTTON, Mode::AwaitingCompatibilityDates, COMPATIBILITY_REPLY),
        (YEAR_BUTTON, Mode::AwaitingYearQuery, YEAR_REPLY),
    ];
    let prior_modes = [
        Mode::None,
        Mode::AwaitingBirthDate,
        Mode::AwaitingCompatibilityDates,
        Mode::AwaitingYearQuery,
    ];

    for (button, expected, instructions) in cases {
        for prior in prior_modes {
            let h = Harness::new(ScriptedBackend::answering("unused"));
            h.sessions.set(USER, prior);

            h.send(button).await;

            assert_eq!(h.mode(), expected, "{button} after {prior}");
            let reply = h.channel.last();
            assert_eq!(reply.body(), instructions);
            assert!(matches!(reply.content, OutgoingContent::Markdown { .. }));
            assert_eq!(h.backend.calls(), 0);
        }
    }
}

#[tokio::test]
async fn test_free_chat_selection_clears_pending_mode() {
    let h = Harness::new(ScriptedBackend::answering("unused"));
    h.send(MATRIX_BUTTON).await;
    assert_eq!(h.mode(), Mode::AwaitingBirthDate);

    let outcome = h.send(FREE_CHAT_BUTTON).await;

    assert_eq!(outcome, DispatchOutcome::MenuSelected(MenuAction::FreeChat));
    assert_eq!(h.mode(), Mode::None);
    assert_eq!(h.channel.last().body(), FREE_CHAT_REPLY);
}

#[tokio::test]
async fn test_button_label_with_padding_is_recognised() {
    let h = Harness::new(ScriptedBackend::answering("unused"));

    h.send(&format!("  {YEAR_BUTTON}\n")).await;

    assert_eq!(h.mode(), Mode::AwaitingYearQuery);
    assert_eq!(h.backend.calls(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Free-text flows
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_matrix_flow_with_valid_date() {
    let h = Harness::new(ScriptedBackend::answering("  Разбор матрицы  "));

    h.send("/start").await;
    h.send(MATRIX_BUTTON).await;
    let outcome = h.send("14.11.2003").await;

    assert_eq!(outcome, DispatchOutcome::Answered(Mode::AwaitingBirthDate));
    assert_eq!(h.backend.prompts(), vec![build_matrix_prompt("14.11.2003")]);
    assert!(h.backend.prompts()[0].contains("14.11.2003"));
    assert_eq!(h.mode(), Mode::None);

    let sent = h.channel.sent();
    let bodies: Vec<&str> = sent.iter().map(|m| m.body()).collect();
    assert_eq!(
        bodies,
        vec![
            START_REPLY,
            MATRIX_REPLY,
            "Делаю нумерологический разбор… 🔮",
            "Разбор матрицы",
        ]
    );
}

#[tokio::test]
async fn test_matrix_date_is_trimmed_before_validation() {
    let h = Harness::new(ScriptedBackend::answering("ok"));
    h.send(MATRIX_BUTTON).await;

    h.send("  29.02.2024 \n").await;

    assert_eq!(h.backend.prompts(), vec![build_matrix_prompt("29.02.2024")]);
    assert_eq!(h.mode(), Mode::None);
}

#[tokio::test]
async fn test_invalid_date_reprompts_without_gateway_call() {
    let h = Harness::new(ScriptedBackend::answering("unused"));
    h.send(MATRIX_BUTTON).await;

    for input in ["31.13.2020", "29.02.2023", "14/11/2003", "завтра", "1.1.2000"] {
        let outcome = h.send(input).await;

        assert_eq!(outcome, DispatchOutcome::Reprompted(Mode::AwaitingBirthDate), "{input}");
        assert_eq!(h.mode(), Mode::AwaitingBirthDate);
        let reply = h.channel.last();
        assert_eq!(reply.body(), INVALID_DATE_REPLY);
        assert!(matches!(reply.content, OutgoingContent::Markdown { .. }));
    }

    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn test_compatibility_embeds_text_and_clears_on_failure() {
    let h = Harness::new(ScriptedBackend::failing(CompletionFailure::Network(
        "connection reset".into(),
    )));
    h.send(COMPATIBILITY_BUTTON).await;

    let outcome = h.send("14.11.2003 и 05.07.1998").await;

    assert!(matches!(
        outcome,
        DispatchOutcome::Failed { mode: Mode::AwaitingCompatibilityDates, kind: "network", .. }
    ));
    assert_eq!(
        h.backend.prompts(),
        vec![build_compatibility_prompt("14.11.2003 и 05.07.1998")]
    );
    assert!(h.backend.prompts()[0].contains("14.11.2003 и 05.07.1998"));
    assert_eq!(h.mode(), Mode::None);
}

#[tokio::test]
async fn test_year_flow_is_one_shot() {
    let h = Harness::new(ScriptedBackend::answering("Число года: 5"));
    h.send(YEAR_BUTTON).await;

    let first = h.send("14.11.2003, интересует 2025 год").await;
    let second = h.send("а что дальше?").await;

    assert_eq!(first, DispatchOutcome::Answered(Mode::AwaitingYearQuery));
    assert_eq!(second, DispatchOutcome::Answered(Mode::None));
    assert_eq!(
        h.backend.prompts(),
        vec![
            build_year_prompt("14.11.2003, интересует 2025 год"),
            build_chat_prompt("а что дальше?"),
        ]
    );
    assert_eq!(h.mode(), Mode::None);
}

#[tokio::test]
async fn test_free_text_without_selection_goes_to_chat() {
    let h = Harness::new(ScriptedBackend::answering("Семёрка — число поиска."));

    let outcome = h.send("Что значит число 7?").await;

    assert_eq!(outcome, DispatchOutcome::Answered(Mode::None));
    assert_eq!(h.backend.prompts(), vec![build_chat_prompt("Что значит число 7?")]);
    assert_eq!(h.mode(), Mode::None);

    // Free chat sends no progress notice, only the answer.
    let sent = h.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body(), "Семёрка — число поиска.");
    assert!(matches!(sent[0].content, OutgoingContent::Text { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_every_one_shot_mode_resolves_after_failure() {
    let inputs = [
        (Mode::AwaitingBirthDate, "14.11.2003"),
        (Mode::AwaitingCompatibilityDates, "она 14.11.2003"),
        (Mode::AwaitingYearQuery, "14.11.2003"),
    ];

    for (mode, input) in inputs {
        let h = Harness::new(ScriptedBackend::failing(CompletionFailure::RateLimited(
            "quota".into(),
        )));
        h.sessions.set(USER, mode);

        let outcome = h.send(input).await;

        assert!(matches!(outcome, DispatchOutcome::Failed { .. }), "{mode}");
        assert_eq!(h.mode(), Mode::None, "{mode}");
        assert_eq!(h.backend.calls(), 1);
    }
}

#[tokio::test]
async fn test_failure_reply_hides_error_detail() {
    let detail = "upstream said: invalid key sk-abcdefghijklmnopqrstuvwxyz";
    let h = Harness::new(ScriptedBackend::failing(CompletionFailure::Api {
        status: 500,
        body: detail.into(),
    }));

    let outcome = h.send("привет").await;

    let DispatchOutcome::Failed { kind, incident, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(kind, "api");
    assert_eq!(incident.len(), 8);

    let reply = h.channel.last();
    assert!(reply.body().contains(&incident));
    assert!(!reply.body().contains("upstream"));
    assert!(!reply.body().contains("sk-"));
}

#[tokio::test]
async fn test_empty_completion_is_reported_as_failure() {
    let h = Harness::new(ScriptedBackend::answering("   \n "));
    h.send(YEAR_BUTTON).await;

    let outcome = h.send("14.11.2003").await;

    assert!(matches!(outcome, DispatchOutcome::Failed { kind: "empty", .. }));
    assert_eq!(h.mode(), Mode::None);
}

#[tokio::test]
async fn test_send_failure_still_clears_mode() {
    let h = Harness::new(ScriptedBackend::answering("ответ"));
    h.send(MATRIX_BUTTON).await;
    h.channel.fail_sends.store(true, Ordering::SeqCst);

    let outcome = h.send("14.11.2003").await;

    assert_eq!(outcome, DispatchOutcome::Answered(Mode::AwaitingBirthDate));
    assert_eq!(h.mode(), Mode::None);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_messages_are_serialised() {
    let h = Harness::new(ScriptedBackend::answering("ok").with_delay(Duration::from_millis(100)));
    h.send(MATRIX_BUTTON).await;

    let first = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .handle(ChannelMessage::new(CHAT, USER, "14.11.2003"))
                .await
        })
    };
    let second = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .handle(ChannelMessage::new(CHAT, USER, "14.11.2003"))
                .await
        })
    };

    let mut outcomes = vec![first.await.unwrap(), second.await.unwrap()];
    outcomes.sort_by_key(|o| format!("{o:?}"));

    // Exactly one message consumed the matrix mode; the other saw free chat.
    assert_eq!(
        outcomes,
        vec![
            DispatchOutcome::Answered(Mode::AwaitingBirthDate),
            DispatchOutcome::Answered(Mode::None),
        ]
    );
    let mut prompts = h.backend.prompts();
    prompts.sort();
    let mut expected = vec![
        build_matrix_prompt("14.11.2003"),
        build_chat_prompt("14.11.2003"),
    ];
    expected.sort();
    assert_eq!(prompts, expected);
    assert_eq!(h.mode(), Mode::None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_users_keep_separate_modes() {
    let h = Harness::new(ScriptedBackend::answering("ok"));

    let alice = ChannelMessage::new("chat-a", "alice", MATRIX_BUTTON);
    let bob = ChannelMessage::new("chat-b", "bob", YEAR_BUTTON);
    tokio::join!(h.dispatcher.handle(alice), h.dispatcher.handle(bob));

    assert_eq!(h.sessions.mode_of("alice"), Mode::AwaitingBirthDate);
    assert_eq!(h.sessions.mode_of("bob"), Mode::AwaitingYearQuery);

    h.dispatcher
        .handle(ChannelMessage::new("chat-a", "alice", "14.11.2003"))
        .await;

    assert_eq!(h.sessions.mode_of("alice"), Mode::None);
    assert_eq!(h.sessions.mode_of("bob"), Mode::AwaitingYearQuery);
}

// ─────────────────────────────────────────────────────────────────────────────
// Processor loop
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_processor_survives_panicking_handler() {
    let h = Harness::new(ScriptedBackend::answering("ok"));
    h.dispatcher
        .handle(ChannelMessage::new("doomed-chat", "doomed", COMPATIBILITY_BUTTON))
        .await;
    assert_eq!(h.sessions.mode_of("doomed"), Mode::AwaitingCompatibilityDates);
    *h.channel.panic_chat.lock().unwrap() = Some("doomed-chat".into());

    let (tx, rx) = mpsc::channel(8);
    let processor = Dispatcher::spawn_processor(h.dispatcher.clone(), rx);

    tx.send(ChannelMessage::new("doomed-chat", "doomed", "14.11.2003"))
        .await
        .unwrap();
    tx.send(ChannelMessage::new(CHAT, USER, "привет"))
        .await
        .unwrap();
    drop(tx);

    let joined = assert_ok!(tokio::time::timeout(Duration::from_secs(5), processor).await);
    assert_ok!(joined);

    // The panicking handler still resolved its one-shot mode.
    assert_eq!(h.sessions.mode_of("doomed"), Mode::None);

    let replies = h.channel.sent_to(CHAT);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].body(), "ok");
}
