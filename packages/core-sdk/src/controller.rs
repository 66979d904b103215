use std::fmt::Display;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{self, Backend};
use crate::config::ChatConfig;
use crate::error::{InvalidInput, TransportError};
use crate::llm;
use crate::models::{Message, Role, Theme};
use crate::store::{self, ConversationStore, KeyValueStore};
use crate::telemetry;

/** \brief Assistant content appended when a reply is cancelled. */
pub const CANCELLED_NOTICE: &str = "Reply cancelled.";

/**
 * \brief Lifecycle phase. Terminal phases are published and immediately followed by `Idle`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    Completed,
    Failed,
    Cancelled,
}

/**
 * \brief How a send attempt settled.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

impl Outcome {
    fn phase(self) -> Phase {
        match self {
            Outcome::Completed => Phase::Completed,
            Outcome::Failed => Phase::Failed,
            Outcome::Cancelled => Phase::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/**
 * \brief Result of a settled send: the user turn and the assistant entry appended for it.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub outcome: Outcome,
    pub user: Message,
    pub reply: Message,
}

/** \brief The single live request: its cancellation token and originating user turn. */
struct PendingRequest {
    token: CancellationToken,
    user_message_id: String,
}

/**
 * \brief Conversation controller: owns the log, runs at most one request at a time.
 * \details All methods take `&self`, so `cancel` can run while `begin_send` is suspended on I/O.
 */
pub struct ChatController<S: KeyValueStore> {
    conversation: Mutex<ConversationStore<S>>,
    config: ChatConfig,
    client: reqwest::Client,
    pending: Mutex<Option<PendingRequest>>,
    phase: watch::Sender<Phase>,
    last_outcome: Mutex<Option<Outcome>>,
}

impl<S: KeyValueStore> ChatController<S> {
    /**
     * \brief Load the persisted log from `kv` and start idle.
     */
    pub fn init(kv: S, config: ChatConfig) -> Self {
        Self::with_client(kv, config, reqwest::Client::new())
    }

    pub fn with_client(kv: S, config: ChatConfig, client: reqwest::Client) -> Self {
        let conversation = ConversationStore::load(kv);
        telemetry::log_event(
            "controller.init",
            &format!("restored {} messages", conversation.len()),
        );
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            conversation: Mutex::new(conversation),
            config,
            client,
            pending: Mutex::new(None),
            phase,
            last_outcome: Mutex::new(None),
        }
    }

    /**
     * \brief Append the user turn, call the resolved backend, append exactly one assistant entry.
     * \details Rejected without touching the log when `text` is blank or a request is in flight.
     * Transport failures and cancellation are reported through the returned `SendOutcome`, never as `Err`.
     * Dropping the future before it settles records a cancellation.
     */
    pub async fn begin_send(&self, text: &str) -> Result<SendOutcome, InvalidInput> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InvalidInput::Empty);
        }

        let (user, history, token) = {
            let mut pending = lock(&self.pending);
            if pending.is_some() {
                return Err(InvalidInput::Busy);
            }
            let mut conversation = lock(&self.conversation);
            let user = conversation.append(Role::User, text);
            let token = CancellationToken::new();
            *pending = Some(PendingRequest {
                token: token.clone(),
                user_message_id: user.id.clone(),
            });
            (user, conversation.messages().to_vec(), token)
        };
        self.phase.send_replace(Phase::Sending);

        let in_flight = InFlight {
            controller: self,
            user,
            settled: false,
        };
        let backend = backend::resolve(&self.config);
        telemetry::log_event(
            "controller.send",
            &format!("backend={} history={}", backend.label(), history.len()),
        );

        let result = llm::send(&self.client, &backend, &history, &token).await;
        let (outcome, content) = settle_result(result, token.is_cancelled());
        Ok(in_flight.settle(outcome, content))
    }

    /**
     * \brief Signal the live request, if any. Returns whether a request was cancelled.
     */
    pub fn cancel(&self) -> bool {
        match lock(&self.pending).as_ref() {
            Some(pending) => {
                pending.token.cancel();
                telemetry::log_event(
                    "controller.cancel",
                    &format!("user_message={}", pending.user_message_id),
                );
                true
            }
            None => false,
        }
    }

    /**
     * \brief Empty the log. Allowed while sending; the pending outcome still lands afterwards.
     */
    pub fn clear(&self) {
        lock(&self.conversation).clear();
        telemetry::log_event("controller.clear", "conversation cleared");
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.conversation).messages().to_vec()
    }

    /**
     * \brief The log without `system` entries, as a chat view shows it.
     */
    pub fn visible_messages(&self) -> Vec<Message> {
        lock(&self.conversation)
            .messages()
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect()
    }

    pub fn state(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn is_sending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        *lock(&self.last_outcome)
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /** \brief Backend the next send would use. */
    pub fn backend(&self) -> Backend {
        backend::resolve(&self.config)
    }

    pub fn theme(&self, prefers_dark: bool) -> Theme {
        store::load_theme(lock(&self.conversation).kv(), prefers_dark)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        store::save_theme(lock(&self.conversation).kv_mut(), theme)
    }

    pub fn into_inner(self) -> S {
        self.conversation
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_inner()
    }

    fn finish(&self, outcome: Outcome, content: String) -> Message {
        let reply = lock(&self.conversation).append(Role::Assistant, content);
        lock(&self.pending).take();
        *lock(&self.last_outcome) = Some(outcome);
        self.phase.send_replace(outcome.phase());
        self.phase.send_replace(Phase::Idle);
        telemetry::log_event("controller.settle", &format!("outcome={}", outcome.as_str()));
        reply
    }
}

/**
 * \brief Guard over one dispatched send; settles as cancelled if dropped unsettled.
 */
struct InFlight<'a, S: KeyValueStore> {
    controller: &'a ChatController<S>,
    user: Message,
    settled: bool,
}

impl<S: KeyValueStore> InFlight<'_, S> {
    fn settle(mut self, outcome: Outcome, content: String) -> SendOutcome {
        self.settled = true;
        let reply = self.controller.finish(outcome, content);
        SendOutcome {
            outcome,
            user: self.user.clone(),
            reply,
        }
    }
}

impl<S: KeyValueStore> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if !self.settled {
            self.controller
                .finish(Outcome::Cancelled, CANCELLED_NOTICE.to_string());
        }
    }
}

/**
 * \brief Map a transport result to the outcome and assistant content.
 * \details A cancellation observed after the response arrived wins: the response is discarded.
 */
fn settle_result(result: Result<String, TransportError>, cancelled: bool) -> (Outcome, String) {
    if cancelled {
        return (Outcome::Cancelled, CANCELLED_NOTICE.to_string());
    }
    match result {
        Ok(reply) => (Outcome::Completed, reply),
        Err(TransportError::Cancelled) => (Outcome::Cancelled, CANCELLED_NOTICE.to_string()),
        Err(err) => {
            telemetry::log_error("controller.send", &err.to_string());
            (Outcome::Failed, failure_notice(&err))
        }
    }
}

/**
 * \brief Assistant content describing a failed send.
 */
pub fn failure_notice(err: &impl Display) -> String {
    format!("Something went wrong: {}", err)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock_reply;
    use crate::store::{MemoryStore, MESSAGES_KEY};
    use crate::testing::spawn_server;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;
    use std::time::Duration;

    fn mock_controller() -> ChatController<MemoryStore> {
        ChatController::init(MemoryStore::new(), ChatConfig::default())
    }

    fn contents(controller: &ChatController<MemoryStore>) -> Vec<(Role, String)> {
        controller
            .messages()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_input_is_rejected_without_appends() {
        let controller = mock_controller();
        assert_eq!(controller.begin_send("").await, Err(InvalidInput::Empty));
        assert_eq!(controller.begin_send("   \n\t").await, Err(InvalidInput::Empty));
        assert!(controller.messages().is_empty());
        assert_eq!(controller.state(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_send_appends_user_and_reply() {
        let controller = mock_controller();
        let result = controller.begin_send("  hello  ").await.expect("accepted");

        assert_eq!(result.outcome, Outcome::Completed);
        assert_eq!(result.user.content, "hello");
        assert_eq!(result.reply.content, mock_reply("hello"));
        assert_eq!(
            contents(&controller),
            vec![
                (Role::User, "hello".to_string()),
                (Role::Assistant, mock_reply("hello")),
            ]
        );
        assert_eq!(controller.state(), Phase::Idle);
        assert_eq!(controller.last_outcome(), Some(Outcome::Completed));
        assert!(!controller.is_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_sending_is_rejected() {
        let controller = mock_controller();
        let (first, second) = tokio::join!(controller.begin_send("a"), async {
            tokio::task::yield_now().await;
            assert!(controller.is_sending());
            controller.begin_send("b").await
        });

        assert_eq!(second, Err(InvalidInput::Busy));
        assert_eq!(first.expect("first accepted").outcome, Outcome::Completed);
        assert_eq!(controller.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_mock_delay() {
        let controller = mock_controller();
        let (result, cancelled) = tokio::join!(controller.begin_send("hello"), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(controller.state(), Phase::Sending);
            controller.cancel()
        });

        assert!(cancelled);
        let result = result.expect("accepted");
        assert_eq!(result.outcome, Outcome::Cancelled);
        assert_eq!(
            contents(&controller),
            vec![
                (Role::User, "hello".to_string()),
                (Role::Assistant, CANCELLED_NOTICE.to_string()),
            ]
        );
        assert_eq!(controller.state(), Phase::Idle);
        assert_eq!(controller.last_outcome(), Some(Outcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_idle_is_noop() {
        let controller = mock_controller();
        assert!(!controller.cancel());
        assert!(controller.messages().is_empty());
        assert_eq!(controller.state(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_cancel_grows_log_by_two_each_time() {
        let controller = mock_controller();
        let _ = tokio::join!(controller.begin_send("one"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            controller.cancel()
        });
        assert_eq!(controller.messages().len(), 2);

        controller.begin_send("one").await.expect("retry accepted");
        let roles: Vec<Role> = controller.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_send_settles_as_cancelled() {
        let controller = mock_controller();
        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), controller.begin_send("abandon")).await;
        assert!(timed_out.is_err());

        assert_eq!(
            contents(&controller),
            vec![
                (Role::User, "abandon".to_string()),
                (Role::Assistant, CANCELLED_NOTICE.to_string()),
            ]
        );
        assert!(!controller.is_sending());
        assert_eq!(controller.state(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_observe_sending() {
        let controller = mock_controller();
        let mut rx = controller.subscribe();
        let (_, seen) = tokio::join!(controller.begin_send("hi"), async {
            rx.changed().await.expect("sender alive");
            *rx.borrow_and_update()
        });
        assert_eq!(seen, Phase::Sending);
        assert_eq!(*rx.borrow(), Phase::Idle);
    }

    #[test]
    fn test_response_received_after_cancel_is_discarded() {
        let (outcome, content) = settle_result(Ok("late reply".to_string()), true);
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(content, CANCELLED_NOTICE);

        let (outcome, content) = settle_result(Ok("reply".to_string()), false);
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(content, "reply");
    }

    #[test]
    fn test_failure_notice_embeds_cause() {
        let (outcome, content) =
            settle_result(Err(TransportError::Network("refused".into())), false);
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(content, "Something went wrong: network error: refused");
    }

    #[tokio::test]
    async fn test_graphql_errors_become_assistant_message() {
        let router = Router::new().route(
            "/graphql",
            post(|| async { Json(json!({"errors": [{"message": "bad"}, {"message": "worse"}]})) }),
        );
        let base = spawn_server(router).await;
        let config = ChatConfig::default()
            .with_graphql_url(format!("{}/graphql", base))
            .with_rest_url(format!("{}/unused", base));
        let controller = ChatController::init(MemoryStore::new(), config);

        let result = controller.begin_send("hi").await.expect("accepted");
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.reply.content.contains("bad; worse"));
        assert_eq!(controller.messages().len(), 2);
        assert_eq!(controller.last_outcome(), Some(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_rest_reply_is_appended_verbatim() {
        let router = Router::new().route(
            "/chat",
            post(|Json(body): Json<serde_json::Value>| async move {
                let n = body["messages"].as_array().map(|a| a.len()).unwrap_or(0);
                Json(json!({"reply": format!(" saw {} messages ", n)}))
            }),
        );
        let base = spawn_server(router).await;
        let config = ChatConfig::default().with_rest_url(format!("{}/chat", base));
        let controller = ChatController::init(MemoryStore::new(), config);

        let first = controller.begin_send("one").await.expect("accepted");
        assert_eq!(first.reply.content, " saw 1 messages ");
        let second = controller.begin_send("two").await.expect("accepted");
        assert_eq!(second.reply.content, " saw 3 messages ");
    }

    #[tokio::test]
    async fn test_rest_status_failure_is_reported() {
        let router = Router::new().route(
            "/chat",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let base = spawn_server(router).await;
        let config = ChatConfig::default().with_rest_url(format!("{}/chat", base));
        let controller = ChatController::init(MemoryStore::new(), config);

        let result = controller.begin_send("hi").await.expect("accepted");
        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(
            result.reply.content,
            "Something went wrong: API request failed: 503"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_survives_reinit() {
        let controller = mock_controller();
        controller.begin_send("persist me").await.expect("accepted");
        let before = controller.messages();

        let controller = ChatController::init(controller.into_inner(), ChatConfig::default());
        assert_eq!(controller.messages(), before);

        controller.clear();
        let controller = ChatController::init(controller.into_inner(), ChatConfig::default());
        assert!(controller.messages().is_empty());
    }

    #[test]
    fn test_visible_messages_hide_system_entries() {
        let kv = MemoryStore::new().with_entry(
            MESSAGES_KEY,
            r#"[{"id":"s","role":"system","content":"rules"},{"id":"u","role":"user","content":"hi"}]"#,
        );
        let controller = ChatController::init(kv, ChatConfig::default());
        assert_eq!(controller.messages().len(), 2);
        let visible = controller.visible_messages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "u");
    }

    #[test]
    fn test_theme_round_trip() {
        let controller = mock_controller();
        assert_eq!(controller.theme(true), Theme::Dark);
        controller.set_theme(Theme::Light).expect("save theme");
        assert_eq!(controller.theme(true), Theme::Light);
    }

    #[test]
    fn test_backend_follows_config() {
        let controller = mock_controller();
        assert_eq!(controller.backend(), Backend::Mock);
    }
}
