//! ConversationController: owns one participant's chat session and applies
//! generator decisions to it.
//!
//! Every generator call captures a request token when it is issued. When the
//! call resolves, its result is applied only if no newer call was issued in
//! the meantime; superseded results are dropped without touching the
//! transcript, the step, or the loading flag. The underlying call is never
//! cancelled.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::scenario::{Scenario, ScenarioCatalog, StepInput};
use crate::store::{ChatTranscript, Database, PersistenceGateway};

use super::generator::{ResponseGenerator, TurnInput};
use super::message::{Message, Role, Sender};
use super::step::ConversationStep;

/// Identity of one issued generator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestToken(u64);

/// What happened to one generator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was appended.
    Replied { sender: Sender, advanced: bool },
    /// The generator failed; the fallback reply was appended.
    Failed,
    /// A newer call superseded this one; nothing changed.
    Stale,
}

/// Result of asking for the next scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// Moved on and opened the next scenario.
    Advanced { index: usize },
    /// Tutorial is over; the presentation layer shows the transition screen
    /// and then calls `start_training`.
    ShowTransition,
    /// No scenarios left.
    AllFinished,
}

/// Mutable per-session state.
#[derive(Debug, Default)]
struct ChatState {
    scenario_index: usize,
    step: ConversationStep,
    mistake_count: u32,
    messages: Vec<Message>,
    session_id: String,
    request_seq: u64,
    loading: bool,
    finished: bool,
}

impl ChatState {
    fn issue(&mut self) -> RequestToken {
        self.request_seq += 1;
        self.loading = true;
        RequestToken(self.request_seq)
    }

    fn is_current(&self, token: RequestToken) -> bool {
        self.request_seq == token.0
    }

    /// Invalidate whatever is in flight.
    fn supersede(&mut self) {
        self.request_seq += 1;
        self.loading = false;
    }
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSnapshot {
    pub scenario_index: usize,
    pub scenario: Scenario,
    /// Position among training levels; `None` while in the tutorial.
    pub training_level: Option<usize>,
    pub training_count: usize,
    pub step: ConversationStep,
    pub mistake_count: u32,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub session_id: String,
    pub user_turn: bool,
    pub input: StepInput,
    pub finished: bool,
}

/// Drives one participant through the scenario catalog.
pub struct ConversationController {
    user_email: String,
    catalog: Arc<ScenarioCatalog>,
    generator: Arc<dyn ResponseGenerator>,
    db: Arc<dyn Database>,
    gateway: PersistenceGateway,
    state: RwLock<ChatState>,
}

impl ConversationController {
    pub fn new(
        user_email: impl Into<String>,
        catalog: Arc<ScenarioCatalog>,
        generator: Arc<dyn ResponseGenerator>,
        db: Arc<dyn Database>,
        gateway: PersistenceGateway,
    ) -> Self {
        Self {
            user_email: user_email.into(),
            catalog,
            generator,
            db,
            gateway,
            state: RwLock::new(ChatState::default()),
        }
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn snapshot(&self) -> Option<ChatSnapshot> {
        let s = self.state.read().await;
        let scenario = self.catalog.get(s.scenario_index)?;
        let user_turn = !s.loading && s.step.is_user_step();
        let input = if user_turn {
            scenario.input_for(s.step)
        } else {
            StepInput::FreeText
        };
        Some(ChatSnapshot {
            scenario_index: s.scenario_index,
            scenario: scenario.clone(),
            training_level: self.catalog.training_level(s.scenario_index),
            training_count: self.catalog.training_count(),
            step: s.step,
            mistake_count: s.mistake_count,
            messages: s.messages.clone(),
            loading: s.loading,
            session_id: s.session_id.clone(),
            user_turn,
            input,
            finished: s.finished,
        })
    }

    pub async fn step(&self) -> ConversationStep {
        self.state.read().await.step
    }

    pub async fn is_finished(&self) -> bool {
        self.state.read().await.finished
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Open the current scenario: fresh transcript, bot states its wrong reading.
    pub async fn initialize(&self) -> TurnOutcome {
        let (token, index) = {
            let mut s = self.state.write().await;
            (s.issue(), s.scenario_index)
        };
        let Some(scenario) = self.catalog.get(index) else {
            warn!(index, "No scenario at index");
            let mut s = self.state.write().await;
            if s.is_current(token) {
                s.loading = false;
            }
            return TurnOutcome::Failed;
        };

        let session_id = self.resolve_session_id(scenario.id).await;

        {
            let mut s = self.state.write().await;
            if !s.is_current(token) {
                debug!(scenario_id = scenario.id, "Opening superseded during session lookup");
                return TurnOutcome::Stale;
            }
            s.messages.clear();
            s.step = ConversationStep::InitMisled;
            s.mistake_count = 0;
            s.finished = false;
            s.session_id = session_id.clone();
        }

        info!(
            user_email = %self.user_email,
            scenario_id = scenario.id,
            session_id = %session_id,
            "Initializing scenario"
        );

        let result = self
            .generator
            .generate(TurnInput {
                user_text: "",
                history: &[],
                scenario,
                step: ConversationStep::InitMisled,
                mistake_count: 0,
                tutorial_mode: scenario.is_tutorial(),
            })
            .await;

        let mut s = self.state.write().await;
        if !s.is_current(token) {
            debug!(scenario_id = scenario.id, "Discarding stale opening reply");
            return TurnOutcome::Stale;
        }
        s.loading = false;

        match result {
            Ok(decision) => {
                let sender = decision.sender;
                let advanced = decision.should_advance;
                s.messages = vec![decision.into_message()];
                if advanced {
                    s.step = ConversationStep::UserCorrects;
                }
                self.persist(scenario, &session_id, &s.messages);
                TurnOutcome::Replied { sender, advanced }
            }
            Err(e) => {
                warn!(scenario_id = scenario.id, error = %e, "Opening reply failed");
                s.messages = vec![Message::fallback()];
                TurnOutcome::Failed
            }
        }
    }

    /// Append a user message and let the bot answer it.
    pub async fn submit_user_message(&self, text: &str) -> Result<TurnOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (history, session_id) = {
            let mut s = self.state.write().await;
            s.messages.push(Message::user(text));
            if let Some(scenario) = self.catalog.get(s.scenario_index) {
                self.persist(scenario, &s.session_id, &s.messages);
            }
            (s.messages.clone(), s.session_id.clone())
        };

        Ok(self.process_turn(text, history, session_id).await)
    }

    /// Run one generator turn against `history` and apply the decision.
    ///
    /// `history` becomes the transcript on success (plus the reply), so it
    /// must already contain the user message being answered.
    pub async fn process_turn(
        &self,
        user_text: &str,
        history: Vec<Message>,
        session_id: String,
    ) -> TurnOutcome {
        let (token, index, step, mistake_count) = {
            let mut s = self.state.write().await;
            let token = s.issue();
            (token, s.scenario_index, s.step, s.mistake_count)
        };

        let Some(scenario) = self.catalog.get(index) else {
            warn!(index, "No scenario at index");
            let mut s = self.state.write().await;
            if s.is_current(token) {
                s.loading = false;
            }
            return TurnOutcome::Failed;
        };
        let potential_next = step.potential_next();

        debug!(
            scenario_id = scenario.id,
            step = %step,
            mistake_count,
            request = token.0,
            "Processing turn"
        );

        let result = self
            .generator
            .generate(TurnInput {
                user_text,
                history: &history,
                scenario,
                step,
                mistake_count,
                tutorial_mode: scenario.is_tutorial(),
            })
            .await;

        let mut s = self.state.write().await;
        if !s.is_current(token) {
            debug!(request = token.0, latest = s.request_seq, "Discarding stale reply");
            return TurnOutcome::Stale;
        }
        s.loading = false;

        match result {
            Ok(decision) => {
                let sender = decision.sender;
                let advanced = decision.should_advance;

                let mut messages = history;
                messages.push(decision.into_message());
                s.messages = messages;

                if advanced {
                    s.step = potential_next;
                    s.mistake_count = 0;
                } else if sender == Sender::Guide {
                    s.mistake_count += 1;
                }

                info!(
                    scenario_id = scenario.id,
                    step = %s.step,
                    sender = sender.as_str(),
                    advanced,
                    mistake_count = s.mistake_count,
                    "Turn applied"
                );

                self.persist(scenario, &session_id, &s.messages);
                TurnOutcome::Replied { sender, advanced }
            }
            Err(e) => {
                warn!(scenario_id = scenario.id, step = %step, error = %e, "Generator failed");
                s.messages.push(Message::fallback());
                TurnOutcome::Failed
            }
        }
    }

    /// Retry after a failure.
    ///
    /// With no user message yet this reopens the scenario. Otherwise the
    /// fallback replies are dropped and the latest user message is sent again.
    pub async fn resend_last(&self) -> TurnOutcome {
        let prepared = {
            let mut s = self.state.write().await;
            if !s.messages.iter().any(|m| m.role == Role::User) {
                None
            } else {
                s.messages.retain(|m| !m.is_fallback());
                let last_user = s
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.text.clone());
                last_user.map(|text| (text, s.messages.clone(), s.session_id.clone()))
            }
        };

        match prepared {
            None => self.initialize().await,
            Some((text, history, session_id)) => {
                self.process_turn(&text, history, session_id).await
            }
        }
    }

    /// Move past a completed scenario.
    pub async fn advance_scenario(&self) -> Result<AdvanceOutcome, ChatError> {
        let outcome = {
            let mut s = self.state.write().await;
            if s.step != ConversationStep::Completed {
                return Err(ChatError::NotCompleted {
                    step: s.step.to_string(),
                });
            }

            let next = s.scenario_index + 1;
            let current_is_tutorial = self
                .catalog
                .get(s.scenario_index)
                .is_some_and(|sc| sc.is_tutorial());

            match self.catalog.get(next) {
                None => {
                    s.finished = true;
                    AdvanceOutcome::AllFinished
                }
                Some(next_scenario) if current_is_tutorial && !next_scenario.is_tutorial() => {
                    AdvanceOutcome::ShowTransition
                }
                Some(_) => {
                    s.scenario_index = next;
                    s.supersede();
                    AdvanceOutcome::Advanced { index: next }
                }
            }
        };

        info!(user_email = %self.user_email, outcome = ?outcome, "Advance scenario");
        if matches!(outcome, AdvanceOutcome::Advanced { .. }) {
            self.initialize().await;
        }
        Ok(outcome)
    }

    /// Leave the tutorial and open the first training scenario.
    pub async fn start_training(&self) -> TurnOutcome {
        {
            let mut s = self.state.write().await;
            s.scenario_index = self.catalog.first_training_index();
            s.supersede();
        }
        self.initialize().await
    }

    /// Start the module over from the first scenario.
    pub async fn restart(&self) -> TurnOutcome {
        {
            let mut s = self.state.write().await;
            s.scenario_index = 0;
            s.supersede();
        }
        self.initialize().await
    }

    /// Drop all session state (leaving for the dashboard).
    pub async fn reset(&self) {
        let mut s = self.state.write().await;
        let request_seq = s.request_seq;
        *s = ChatState {
            request_seq,
            ..ChatState::default()
        };
        s.supersede();
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Session id for (scenario, user): reuse the stored one or allocate.
    ///
    /// Storage failures fall back to a fresh id so the chat never blocks.
    async fn resolve_session_id(&self, scenario_id: i64) -> String {
        match self.db.get_session_key(scenario_id, &self.user_email).await {
            Ok(Some(existing)) => return existing,
            Ok(None) => {}
            Err(e) => warn!(scenario_id, error = %e, "Failed to read session key"),
        }

        let fresh = Uuid::new_v4().to_string();
        if let Err(e) = self
            .db
            .set_session_key(scenario_id, &self.user_email, &fresh)
            .await
        {
            warn!(scenario_id, error = %e, "Failed to store session key");
        }
        fresh
    }

    fn persist(&self, scenario: &Scenario, session_id: &str, messages: &[Message]) {
        if self.user_email.is_empty() || session_id.is_empty() {
            return;
        }
        self.gateway.save_transcript(ChatTranscript {
            session_id: session_id.to_string(),
            user_email: self.user_email.clone(),
            scenario_id: scenario.id,
            scenario_title: scenario.title.clone(),
            messages: messages.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::conversation::BotDecision;
    use crate::error::{DatabaseError, GeneratorError};
    use crate::store::{LibSqlBackend, StoredChat};

    const EMAIL: &str = "ana@example.com";

    fn model(text: &str, advance: bool) -> Result<BotDecision, GeneratorError> {
        Ok(BotDecision {
            sender: Sender::Model,
            text: text.to_string(),
            should_advance: advance,
        })
    }

    fn guide(text: &str) -> Result<BotDecision, GeneratorError> {
        Ok(BotDecision {
            sender: Sender::Guide,
            text: text.to_string(),
            should_advance: false,
        })
    }

    fn failure() -> Result<BotDecision, GeneratorError> {
        Err(GeneratorError::Malformed("garbage".to_string()))
    }

    /// Replies from a queue, immediately. Records what it was asked.
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<BotDecision, GeneratorError>>>,
        seen: Mutex<Vec<(String, ConversationStep, u32, bool, usize)>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<BotDecision, GeneratorError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ResponseGenerator for ScriptedGenerator {
        async fn generate(&self, input: TurnInput<'_>) -> Result<BotDecision, GeneratorError> {
            self.seen.lock().unwrap().push((
                input.user_text.to_string(),
                input.step,
                input.mistake_count,
                input.tutorial_mode,
                input.history.len(),
            ));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(failure)
        }
    }

    type Responder = oneshot::Sender<Result<BotDecision, GeneratorError>>;

    /// Blocks every call until the test answers it.
    struct GatedGenerator {
        calls: mpsc::UnboundedSender<(String, Responder)>,
    }

    impl GatedGenerator {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Responder)>) {
            let (calls, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { calls }), rx)
        }
    }

    #[async_trait]
    impl ResponseGenerator for GatedGenerator {
        async fn generate(&self, input: TurnInput<'_>) -> Result<BotDecision, GeneratorError> {
            let (tx, rx) = oneshot::channel();
            self.calls
                .send((input.user_text.to_string(), tx))
                .expect("test receiver alive");
            rx.await
                .unwrap_or_else(|_| Err(GeneratorError::Malformed("never answered".to_string())))
        }
    }

    struct Harness {
        controller: Arc<ConversationController>,
        db: Arc<LibSqlBackend>,
        gateway: PersistenceGateway,
    }

    async fn harness(generator: Arc<dyn ResponseGenerator>) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let (gateway, _) = PersistenceGateway::spawn(db.clone());
        let controller = Arc::new(ConversationController::new(
            EMAIL,
            Arc::new(ScenarioCatalog::builtin()),
            generator,
            db.clone(),
            gateway.clone(),
        ));
        Harness {
            controller,
            db,
            gateway,
        }
    }

    /// Open the first training scenario.
    async fn open_training(h: &Harness) {
        h.controller.start_training().await;
    }

    #[tokio::test]
    async fn initialize_opens_with_one_model_message() {
        let generator = ScriptedGenerator::new(vec![model("Taxes nearly doubled!", true)]);
        let h = harness(generator.clone()).await;

        let outcome = h.controller.start_training().await;
        assert_eq!(
            outcome,
            TurnOutcome::Replied {
                sender: Sender::Model,
                advanced: true
            }
        );

        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.scenario.title, "Annual Tax Rate");
        assert_eq!(snap.messages, vec![Message::model("Taxes nearly doubled!")]);
        assert_eq!(snap.step, ConversationStep::UserCorrects);
        assert!(!snap.loading);
        assert!(snap.user_turn);
        assert_eq!(snap.input, StepInput::FreeText);

        let seen = generator.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(String::new(), ConversationStep::InitMisled, 0, false, 0)]);

        h.gateway.flush().await;
        let stored = h.db.get_chat_session(&snap.session_id).await.unwrap().unwrap();
        assert_eq!(stored.transcript.messages.len(), 1);
        assert_eq!(stored.transcript.scenario_id, 1);
    }

    #[tokio::test]
    async fn initialize_without_advance_stays_misled() {
        let h = harness(ScriptedGenerator::new(vec![model("Hmm.", false)])).await;
        open_training(&h).await;
        assert_eq!(h.controller.step().await, ConversationStep::InitMisled);
    }

    #[tokio::test]
    async fn initialize_failure_appends_fallback() {
        let h = harness(ScriptedGenerator::new(vec![failure()])).await;
        assert_eq!(h.controller.initialize().await, TurnOutcome::Failed);

        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.messages, vec![Message::fallback()]);
        assert_eq!(snap.step, ConversationStep::InitMisled);
        assert!(!snap.loading);
    }

    #[tokio::test]
    async fn successful_turns_walk_every_step() {
        let h = harness(ScriptedGenerator::new(vec![
            model("Taxes nearly doubled!", true),
            model("Wait, what tricked me?", true),
            model("How does that change things?", true),
            model("Aha! Always check the baseline.", true),
        ]))
        .await;
        open_training(&h).await;

        let expected = [
            ConversationStep::UserExplainsFeature,
            ConversationStep::UserSuggestsFix,
            ConversationStep::Completed,
        ];
        let mut previous = h.controller.step().await;
        for (text, want) in ["you're wrong", "the axis is truncated", "start at zero"]
            .into_iter()
            .zip(expected)
        {
            h.controller.submit_user_message(text).await.unwrap();
            let now = h.controller.step().await;
            assert!(previous.can_transition_to(now), "{previous} -> {now}");
            assert_eq!(now, want);
            previous = now;
        }

        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.messages.len(), 7);
        assert!(!snap.user_turn);
    }

    #[tokio::test]
    async fn example_truncated_axis_flow() {
        let h = harness(ScriptedGenerator::new(vec![
            model("Taxes nearly doubled!", true),
            model("Oh no, what tricked me?", true),
        ]))
        .await;
        open_training(&h).await;
        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.messages[0].role, Role::Model);
        assert_eq!(snap.step, ConversationStep::UserCorrects);

        h.controller.submit_user_message("you're wrong").await.unwrap();
        assert_eq!(
            h.controller.step().await,
            ConversationStep::UserExplainsFeature
        );
    }

    #[tokio::test]
    async fn guide_counts_mistakes_and_success_resets() {
        let generator = ScriptedGenerator::new(vec![
            model("Taxes nearly doubled!", true),
            guide("Tell the bot it is wrong."),
            guide("Type: you are wrong."),
            model("Wait, really?", true),
        ]);
        let h = harness(generator.clone()).await;
        open_training(&h).await;

        h.controller.submit_user_message("cool").await.unwrap();
        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.mistake_count, 1);
        assert_eq!(snap.step, ConversationStep::UserCorrects);
        assert_eq!(snap.messages.last().unwrap().role, Role::Guide);

        h.controller.submit_user_message("nice").await.unwrap();
        assert_eq!(h.controller.snapshot().await.unwrap().mistake_count, 2);

        h.controller.submit_user_message("you are wrong").await.unwrap();
        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.mistake_count, 0);
        assert_eq!(snap.step, ConversationStep::UserExplainsFeature);

        // Generator saw the running mistake count.
        let counts: Vec<u32> = generator.seen.lock().unwrap().iter().map(|s| s.2).collect();
        assert_eq!(counts, vec![0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn confident_model_reply_changes_nothing() {
        let h = harness(ScriptedGenerator::new(vec![
            model("Latency is improving!", true),
            model("I'm pretty sure I'm right!", false),
        ]))
        .await;
        h.controller.initialize().await;
        h.controller.submit_user_message("ok").await.unwrap();

        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.step, ConversationStep::UserCorrects);
        assert_eq!(snap.mistake_count, 0);
        assert_eq!(snap.messages.len(), 3);
    }

    #[tokio::test]
    async fn failed_turn_appends_fallback_and_keeps_step() {
        let h = harness(ScriptedGenerator::new(vec![
            model("Taxes nearly doubled!", true),
            failure(),
        ]))
        .await;
        open_training(&h).await;

        let outcome = h.controller.submit_user_message("you're wrong").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Failed);
        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.step, ConversationStep::UserCorrects);
        assert_eq!(snap.mistake_count, 0);
        assert!(snap.messages.last().unwrap().is_fallback());
        assert!(!snap.loading);
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let h = harness(ScriptedGenerator::new(vec![])).await;
        assert!(matches!(
            h.controller.submit_user_message("   ").await,
            Err(ChatError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn tutorial_mode_flag_and_scripted_input() {
        let generator = ScriptedGenerator::new(vec![model("Latency is improving!", true)]);
        let h = harness(generator.clone()).await;
        h.controller.restart().await;

        let snap = h.controller.snapshot().await.unwrap();
        assert!(snap.scenario.is_tutorial());
        assert_eq!(snap.training_level, None);
        match snap.input {
            StepInput::Scripted { options, .. } => {
                assert_eq!(options, vec!["You're wrong! The latency is actually getting worse."]);
            }
            other => panic!("expected scripted input, got {other:?}"),
        }
        assert!(generator.seen.lock().unwrap()[0].3, "tutorial flag passed");
    }

    #[tokio::test]
    async fn resend_without_user_message_reinitializes() {
        let h = harness(ScriptedGenerator::new(vec![
            failure(),
            model("Taxes nearly doubled!", true),
        ]))
        .await;
        open_training(&h).await;
        assert!(h.controller.snapshot().await.unwrap().messages[0].is_fallback());

        let outcome = h.controller.resend_last().await;
        assert!(matches!(outcome, TurnOutcome::Replied { advanced: true, .. }));
        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.messages, vec![Message::model("Taxes nearly doubled!")]);
        assert_eq!(snap.step, ConversationStep::UserCorrects);
    }

    #[tokio::test]
    async fn resend_strips_fallbacks_and_resends_last_user_message() {
        let generator = ScriptedGenerator::new(vec![
            model("Taxes nearly doubled!", true),
            failure(),
            failure(),
            model("Wait, what tricked me?", true),
        ]);
        let h = harness(generator.clone()).await;
        open_training(&h).await;
        h.controller.submit_user_message("you're wrong").await.unwrap();

        // Two failed retries in a row keep resending the same text.
        assert_eq!(h.controller.resend_last().await, TurnOutcome::Failed);
        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.messages.iter().filter(|m| m.is_fallback()).count(), 1);

        let outcome = h.controller.resend_last().await;
        assert!(matches!(outcome, TurnOutcome::Replied { advanced: true, .. }));

        let snap = h.controller.snapshot().await.unwrap();
        assert!(snap.messages.iter().all(|m| !m.is_fallback()));
        assert_eq!(
            snap.messages,
            vec![
                Message::model("Taxes nearly doubled!"),
                Message::user("you're wrong"),
                Message::model("Wait, what tricked me?"),
            ]
        );
        assert_eq!(snap.step, ConversationStep::UserExplainsFeature);

        let texts: Vec<String> = generator.seen.lock().unwrap()[1..]
            .iter()
            .map(|s| s.0.clone())
            .collect();
        assert_eq!(texts, vec!["you're wrong"; 3]);
    }

    #[tokio::test]
    async fn stale_reply_is_dropped() {
        let (generator, mut calls) = GatedGenerator::new();
        let h = harness(generator).await;

        let c = h.controller.clone();
        let init = tokio::spawn(async move { c.start_training().await });
        let (_, reply) = calls.recv().await.unwrap();
        reply.send(model("Taxes nearly doubled!", true)).unwrap();
        init.await.unwrap();

        let c = h.controller.clone();
        let first = tokio::spawn(async move { c.submit_user_message("first").await });
        let (text_a, reply_a) = calls.recv().await.unwrap();
        assert_eq!(text_a, "first");

        let c = h.controller.clone();
        let second = tokio::spawn(async move { c.submit_user_message("second").await });
        let (text_b, reply_b) = calls.recv().await.unwrap();
        assert_eq!(text_b, "second");

        // B resolves first.
        reply_b.send(model("Wait, what tricked me?", true)).unwrap();
        assert!(matches!(
            second.await.unwrap().unwrap(),
            TurnOutcome::Replied { .. }
        ));
        let after_b = h.controller.snapshot().await.unwrap();

        // A resolves afterwards and must change nothing.
        reply_a.send(guide("Tell it it's wrong.")).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), TurnOutcome::Stale);
        let after_a = h.controller.snapshot().await.unwrap();

        assert_eq!(after_a.messages, after_b.messages);
        assert_eq!(after_a.step, ConversationStep::UserExplainsFeature);
        assert_eq!(after_a.mistake_count, 0);
        assert!(!after_a.loading);
        assert_eq!(
            after_a.messages,
            vec![
                Message::model("Taxes nearly doubled!"),
                Message::user("first"),
                Message::user("second"),
                Message::model("Wait, what tricked me?"),
            ]
        );

        // Nothing from A reached storage either.
        h.gateway.flush().await;
        let stored = h
            .db
            .get_chat_session(&after_b.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.transcript.messages, after_b.messages);
        assert!(
            stored
                .transcript
                .messages
                .iter()
                .all(|m| m.role != Role::Guide)
        );
    }

    /// Holds `get_session_key` for one scenario until the test releases it.
    struct GatedKeyDb {
        inner: LibSqlBackend,
        gated_scenario: i64,
        entered: Mutex<Option<oneshot::Sender<()>>>,
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl Database for GatedKeyDb {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }
        async fn upsert_chat_session(&self, t: &ChatTranscript) -> Result<(), DatabaseError> {
            self.inner.upsert_chat_session(t).await
        }
        async fn get_chat_session(&self, id: &str) -> Result<Option<StoredChat>, DatabaseError> {
            self.inner.get_chat_session(id).await
        }
        async fn list_chat_sessions(&self, email: &str) -> Result<Vec<StoredChat>, DatabaseError> {
            self.inner.list_chat_sessions(email).await
        }
        async fn upsert_user_group(&self, email: &str, group: &str) -> Result<(), DatabaseError> {
            self.inner.upsert_user_group(email, group).await
        }
        async fn get_user_group(&self, email: &str) -> Result<Option<String>, DatabaseError> {
            self.inner.get_user_group(email).await
        }
        async fn get_session_key(
            &self,
            scenario_id: i64,
            email: &str,
        ) -> Result<Option<String>, DatabaseError> {
            if scenario_id == self.gated_scenario {
                if let Some(entered) = self.entered.lock().unwrap().take() {
                    let _ = entered.send(());
                }
                let release = self.release.lock().unwrap().take();
                if let Some(release) = release {
                    let _ = release.await;
                }
            }
            self.inner.get_session_key(scenario_id, email).await
        }
        async fn set_session_key(
            &self,
            scenario_id: i64,
            email: &str,
            session_id: &str,
        ) -> Result<(), DatabaseError> {
            self.inner.set_session_key(scenario_id, email, session_id).await
        }
    }

    #[tokio::test]
    async fn opening_superseded_during_session_lookup_is_dropped() {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let db = Arc::new(GatedKeyDb {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            gated_scenario: 1,
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let (gateway, _) = PersistenceGateway::spawn(db.clone());
        let generator = ScriptedGenerator::new(vec![model("Latency is improving!", true)]);
        let controller = Arc::new(ConversationController::new(
            EMAIL,
            Arc::new(ScenarioCatalog::builtin()),
            generator.clone(),
            db.clone(),
            gateway.clone(),
        ));

        // Older call parks inside the session lookup for the training scenario.
        let c = controller.clone();
        let older = tokio::spawn(async move { c.start_training().await });
        entered_rx.await.unwrap();

        // Newer call runs to completion on the tutorial.
        let newer = controller.restart().await;
        assert!(matches!(newer, TurnOutcome::Replied { advanced: true, .. }));

        release_tx.send(()).unwrap();
        assert_eq!(older.await.unwrap(), TurnOutcome::Stale);

        let snap = controller.snapshot().await.unwrap();
        assert_eq!(snap.scenario_index, 0);
        assert_eq!(snap.scenario.title, "Network Latency Log");
        assert_eq!(snap.messages, vec![Message::model("Latency is improving!")]);
        assert_eq!(snap.step, ConversationStep::UserCorrects);
        assert!(!snap.loading);
        assert_eq!(
            db.get_session_key(101, EMAIL).await.unwrap().as_deref(),
            Some(snap.session_id.as_str())
        );

        // The older call never reached the generator.
        let seen = generator.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].3, "only the tutorial opening was generated");

        gateway.flush().await;
        let stored = db.list_chat_sessions(EMAIL).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].transcript.scenario_id, 101);
    }

    #[tokio::test]
    async fn superseded_reply_does_not_clear_loading() {
        let (generator, mut calls) = GatedGenerator::new();
        let h = harness(generator).await;

        let c = h.controller.clone();
        let init = tokio::spawn(async move { c.start_training().await });
        let (_, reply) = calls.recv().await.unwrap();
        reply.send(model("Taxes nearly doubled!", true)).unwrap();
        init.await.unwrap();

        let c = h.controller.clone();
        let first = tokio::spawn(async move { c.submit_user_message("first").await });
        let (_, reply_a) = calls.recv().await.unwrap();

        // Hung call: user hits retry, which supersedes it.
        let c = h.controller.clone();
        let retry = tokio::spawn(async move { c.resend_last().await });
        let (text_retry, reply_retry) = calls.recv().await.unwrap();
        assert_eq!(text_retry, "first");

        reply_a.send(failure()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), TurnOutcome::Stale);
        let mid = h.controller.snapshot().await.unwrap();
        assert!(mid.loading, "newer request still owns the loading flag");
        assert!(mid.messages.iter().all(|m| !m.is_fallback()));

        reply_retry.send(model("What tricked me?", true)).unwrap();
        retry.await.unwrap();
        let done = h.controller.snapshot().await.unwrap();
        assert!(!done.loading);
        assert_eq!(done.step, ConversationStep::UserExplainsFeature);
    }

    #[tokio::test]
    async fn advance_requires_completion() {
        let h = harness(ScriptedGenerator::new(vec![model("Taxes nearly doubled!", true)])).await;
        open_training(&h).await;
        assert!(matches!(
            h.controller.advance_scenario().await,
            Err(ChatError::NotCompleted { .. })
        ));
    }

    async fn complete_current(h: &Harness) {
        for text in ["you're wrong", "feature", "fix"] {
            h.controller.submit_user_message(text).await.unwrap();
        }
        assert_eq!(h.controller.step().await, ConversationStep::Completed);
    }

    fn always_advance(n: usize) -> Vec<Result<BotDecision, GeneratorError>> {
        (0..n).map(|i| model(&format!("reply {i}"), true)).collect()
    }

    #[tokio::test]
    async fn advance_from_last_tutorial_shows_transition() {
        let h = harness(ScriptedGenerator::new(always_advance(20))).await;
        h.controller.restart().await;
        complete_current(&h).await;

        assert_eq!(
            h.controller.advance_scenario().await.unwrap(),
            AdvanceOutcome::Advanced { index: 1 }
        );
        assert_eq!(h.controller.step().await, ConversationStep::UserCorrects);

        complete_current(&h).await;
        assert_eq!(
            h.controller.advance_scenario().await.unwrap(),
            AdvanceOutcome::ShowTransition
        );
        // Index did not move.
        assert_eq!(h.controller.snapshot().await.unwrap().scenario_index, 1);

        h.controller.start_training().await;
        let snap = h.controller.snapshot().await.unwrap();
        assert_eq!(snap.scenario_index, 2);
        assert_eq!(snap.training_level, Some(0));
    }

    #[tokio::test]
    async fn advance_past_last_scenario_finishes() {
        let catalog = ScenarioCatalog::builtin();
        let last = catalog.get(catalog.len() - 1).unwrap().clone();
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let (gateway, _) = PersistenceGateway::spawn(db.clone());
        let h = Harness {
            controller: Arc::new(ConversationController::new(
                EMAIL,
                Arc::new(ScenarioCatalog::new(vec![last])),
                ScriptedGenerator::new(always_advance(4)),
                db.clone(),
                gateway.clone(),
            )),
            db,
            gateway,
        };

        h.controller.initialize().await;
        complete_current(&h).await;
        assert!(!h.controller.is_finished().await);
        assert_eq!(
            h.controller.advance_scenario().await.unwrap(),
            AdvanceOutcome::AllFinished
        );
        assert!(h.controller.is_finished().await);
    }

    #[tokio::test]
    async fn session_id_is_stable_per_scenario() {
        let h = harness(ScriptedGenerator::new(always_advance(3))).await;
        h.controller.start_training().await;
        let first = h.controller.snapshot().await.unwrap().session_id;

        h.controller.restart().await;
        let tutorial = h.controller.snapshot().await.unwrap().session_id;
        assert_ne!(first, tutorial);

        h.controller.start_training().await;
        assert_eq!(h.controller.snapshot().await.unwrap().session_id, first);
        assert_eq!(
            h.db.get_session_key(1, EMAIL).await.unwrap().as_deref(),
            Some(first.as_str())
        );
    }

    #[tokio::test]
    async fn reset_clears_session_and_supersedes_in_flight() {
        let (generator, mut calls) = GatedGenerator::new();
        let h = harness(generator).await;

        let c = h.controller.clone();
        let init = tokio::spawn(async move { c.start_training().await });
        let (_, reply) = calls.recv().await.unwrap();

        h.controller.reset().await;
        reply.send(model("Taxes nearly doubled!", true)).unwrap();
        assert_eq!(init.await.unwrap(), TurnOutcome::Stale);

        let snap = h.controller.snapshot().await.unwrap();
        assert!(snap.messages.is_empty());
        assert!(snap.session_id.is_empty());
        assert_eq!(snap.scenario_index, 0);
        assert!(!snap.loading);
    }

    #[tokio::test]
    async fn transcript_saved_after_each_turn() {
        let h = harness(ScriptedGenerator::new(always_advance(2))).await;
        open_training(&h).await;
        h.controller.submit_user_message("you're wrong").await.unwrap();
        h.gateway.flush().await;

        let session_id = h.controller.snapshot().await.unwrap().session_id;
        let stored = h.db.get_chat_session(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.transcript.messages.len(), 3);
        assert_eq!(stored.transcript.user_email, EMAIL);
        assert_eq!(h.db.list_chat_sessions(EMAIL).await.unwrap().len(), 1);
    }
}
