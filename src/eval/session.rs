//! Evaluation session: one question asked about one image by one backend.
//!
//! A session owns its conversation state and drives it through its turns:
//! the image is attached to the first call only, each later call carries the
//! role-tagged history, and every successful turn is written to the sink
//! before the next call starts.

use std::fmt;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::attachment::ImageAttachment;
use crate::backend::{BackendError, GenerationConfig, InvokeRequest, ModelBackend};
use crate::conversation::ConversationState;
use crate::corpus::QuestionSpec;
use crate::error::{Error, Result};
use crate::eval::report::{RecordSink, ResultRecord, round_seconds};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not run yet.
    NotStarted,
    /// Waiting on the call for this 1-based turn.
    InProgress(usize),
    /// Every turn answered.
    Completed,
    /// The call for this 1-based turn failed; later turns were not sent.
    Failed(usize),
}

impl SessionState {
    /// Whether the session can no longer run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::InProgress(turn) => write!(f, "in progress (turn {turn})"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(turn) => write!(f, "failed at turn {turn}"),
        }
    }
}

/// What a finished session produced.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Final state, `Completed` or `Failed`.
    pub state: SessionState,

    /// Records written to the sink.
    pub records_written: usize,

    /// The backend error behind a `Failed` state.
    pub error: Option<BackendError>,
}

impl SessionOutcome {
    /// Whether every turn was answered.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// The turn that failed, if any.
    #[must_use]
    pub fn failed_turn(&self) -> Option<usize> {
        match self.state {
            SessionState::Failed(turn) => Some(turn),
            _ => None,
        }
    }
}

/// Session controller for one (backend, image, question) item.
///
/// # Example
///
/// ```rust,ignore
/// use card_eval::{EvalSession, QuestionSpec, TurnMode};
///
/// let question = QuestionSpec::parse("Where?|What company?|Notes?", TurnMode::MultiTurn)?;
/// let mut session = EvalSession::new(&backend, question, image, &generation)
///     .with_system_instruction(Some("You read business cards."));
/// let outcome = session.run(&mut writer)?;
/// ```
pub struct EvalSession<'a> {
    backend: &'a dyn ModelBackend,
    question: QuestionSpec,
    image: ImageAttachment,
    generation: &'a GenerationConfig,
    system_instruction: Option<&'a str>,
    conversation: ConversationState,
    state: SessionState,
    clock: Box<dyn Fn() -> Instant + 'a>,
}

impl<'a> EvalSession<'a> {
    /// Create a session that has not run yet.
    #[must_use]
    pub fn new(
        backend: &'a dyn ModelBackend,
        question: QuestionSpec,
        image: ImageAttachment,
        generation: &'a GenerationConfig,
    ) -> Self {
        Self {
            backend,
            question,
            image,
            generation,
            system_instruction: None,
            conversation: ConversationState::new(),
            state: SessionState::NotStarted,
            clock: Box::new(Instant::now),
        }
    }

    /// Set the system instruction sent with every call.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: Option<&'a str>) -> Self {
        self.system_instruction = instruction;
        self
    }

    /// Replace the time source used to measure call latency.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> Instant + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The question this session asks.
    #[must_use]
    pub fn question(&self) -> &QuestionSpec {
        &self.question
    }

    /// Conversation so far.
    #[must_use]
    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Run every turn, writing one record per answered turn.
    ///
    /// A malformed question is rejected before any backend call. A backend
    /// failure ends the session in `Failed` and is returned in the outcome,
    /// not as an error. Errors are reserved for validation, sink failures and
    /// running a session twice.
    pub fn run(&mut self, sink: &mut dyn RecordSink) -> Result<SessionOutcome> {
        if self.state != SessionState::NotStarted {
            return Err(Error::SessionFinished(self.state.to_string()));
        }
        self.question.validate()?;

        let model = self.backend.id().to_string();
        let label = self.question.label().to_string();
        let multi_turn = self.question.is_multi_turn();
        let turns: Vec<String> = self.question.turns().into_iter().map(str::to_string).collect();
        let images = std::slice::from_ref(&self.image);

        info!(
            model = %model,
            image = %self.image.name,
            turns = turns.len(),
            "Starting session"
        );

        let mut records_written = 0;
        for (idx, text) in turns.iter().enumerate() {
            let turn = idx + 1;
            self.state = SessionState::InProgress(turn);

            let prepared = self.conversation.begin_turn(text, images);
            let request = InvokeRequest {
                system_instruction: self.system_instruction,
                content: &prepared.content,
                config: self.generation,
            };

            let start = (self.clock)();
            let result = self.backend.invoke(&request);
            let inference_time = round_seconds((self.clock)().saturating_duration_since(start));

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    warn!(model = %model, image = %self.image.name, turn, error = %err, "Backend call failed");
                    self.state = SessionState::Failed(turn);
                    return Ok(SessionOutcome {
                        state: self.state,
                        records_written,
                        error: Some(err),
                    });
                }
            };

            debug!(model = %model, turn, inference_time, "Turn answered");
            self.conversation.record_reply(&response);
            sink.append(ResultRecord {
                model: model.clone(),
                image: self.image.name.clone(),
                turn: multi_turn.then_some(turn),
                question: label.clone(),
                response,
                inference_time: Some(inference_time),
            })?;
            records_written += 1;
        }

        self.state = SessionState::Completed;
        Ok(SessionOutcome {
            state: self.state,
            records_written,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;
    use crate::backend::scripted::ScriptedBackend;
    use crate::config::TurnMode;

    fn card() -> ImageAttachment {
        ImageAttachment::new("image_1.png", vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
    }

    fn multi_turn() -> QuestionSpec {
        QuestionSpec::parse("Where?|What company?|Any notes?", TurnMode::MultiTurn).unwrap()
    }

    #[test]
    fn test_multi_turn_completes() {
        let backend = ScriptedBackend::new("gemini-1.5-flash-002").with_replies(&["Seoul", "Acme", "none"]);
        let generation = GenerationConfig::gemini_default();
        let mut sink = Vec::new();

        let mut session = EvalSession::new(&backend, multi_turn(), card(), &generation)
            .with_system_instruction(Some("Read the card."));
        let outcome = session.run(&mut sink).unwrap();

        assert!(outcome.is_completed());
        assert_eq!(outcome.records_written, 3);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(backend.call_count(), 3);

        // image only on the first call
        assert_eq!(backend.call(0).images, vec!["image_1.png".to_string()]);
        assert!(backend.call(1).images.is_empty());
        assert!(backend.call(2).images.is_empty());

        // later calls carry the history, answers included
        assert_eq!(
            backend.call(2).texts,
            vec![
                (Role::User, "Where?".to_string()),
                (Role::Assistant, "Seoul".to_string()),
                (Role::User, "What company?".to_string()),
                (Role::Assistant, "Acme".to_string()),
                (Role::User, "Any notes?".to_string()),
            ]
        );
        assert_eq!(backend.call(0).system_instruction.as_deref(), Some("Read the card."));

        let turns: Vec<_> = sink.iter().map(|r| r.turn).collect();
        assert_eq!(turns, vec![Some(1), Some(2), Some(3)]);
        for rec in &sink {
            assert_eq!(rec.model, "gemini-1.5-flash-002");
            assert_eq!(rec.image, "image_1.png");
            assert_eq!(rec.question, "Where?|What company?|Any notes?");
            assert!(rec.inference_time.is_some_and(|t| t >= 0.0));
        }
        assert_eq!(sink[1].response, "Acme");
    }

    #[test]
    fn test_single_turn_latency_is_rounded() {
        use std::cell::Cell;
        use std::time::Duration;

        let backend = ScriptedBackend::new("gemini-1.5-flash-002").with_replies(&["Jane Doe"]);
        let generation = GenerationConfig::gemini_default();
        let question = QuestionSpec::parse("What is the name on this card?", TurnMode::Single).unwrap();
        let base = Instant::now();
        let ticks = Cell::new(0u64);
        let clock = || {
            let tick = ticks.get();
            ticks.set(tick + 1);
            base + Duration::from_micros(1_231_400 * tick)
        };
        let mut sink = Vec::new();

        EvalSession::new(&backend, question, card(), &generation)
            .with_clock(clock)
            .run(&mut sink)
            .unwrap();

        assert_eq!(
            sink,
            vec![ResultRecord {
                model: "gemini-1.5-flash-002".to_string(),
                image: "image_1.png".to_string(),
                turn: None,
                question: "What is the name on this card?".to_string(),
                response: "Jane Doe".to_string(),
                inference_time: Some(1.23),
            }]
        );
    }

    #[test]
    fn test_single_turn_record_has_no_turn() {
        let backend = ScriptedBackend::new("llava").with_replies(&["Kim Minsu"]);
        let generation = GenerationConfig::default();
        let question = QuestionSpec::parse("What is the name?", TurnMode::Single).unwrap();
        let mut sink = Vec::new();

        let outcome = EvalSession::new(&backend, question, card(), &generation).run(&mut sink).unwrap();

        assert!(outcome.is_completed());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].turn, None);
        assert_eq!(sink[0].question, "What is the name?");
        assert_eq!(backend.call(0).images.len(), 1);
    }

    #[test]
    fn test_failure_on_second_turn_stops_session() {
        let backend = ScriptedBackend::new("m").failing_on(2);
        let generation = GenerationConfig::default();
        let mut sink = Vec::new();

        let mut session = EvalSession::new(&backend, multi_turn(), card(), &generation);
        let outcome = session.run(&mut sink).unwrap();

        assert_eq!(outcome.state, SessionState::Failed(2));
        assert_eq!(outcome.failed_turn(), Some(2));
        assert!(outcome.error.is_some());
        assert_eq!(outcome.records_written, 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].turn, Some(1));
        assert_eq!(backend.call_count(), 2);
    }

    #[test]
    fn test_failure_on_first_turn_writes_nothing() {
        let backend = ScriptedBackend::new("m").failing_on(1);
        let generation = GenerationConfig::default();
        let mut sink = Vec::new();

        let mut session = EvalSession::new(&backend, multi_turn(), card(), &generation);
        let outcome = session.run(&mut sink).unwrap();

        assert_eq!(outcome.state, SessionState::Failed(1));
        assert_eq!(outcome.records_written, 0);
        assert!(sink.is_empty());
        assert_eq!(backend.call_count(), 1);
        assert_eq!(session.conversation().turn_index(), 1);
        assert_eq!(session.conversation().history().len(), 1);
    }

    #[test]
    fn test_invalid_question_makes_no_calls() {
        let backend = ScriptedBackend::new("m");
        let generation = GenerationConfig::default();
        let question = QuestionSpec::MultiTurn {
            raw: "Where?|Company?".to_string(),
            turns: vec!["Where?".to_string(), "Company?".to_string()],
        };
        let mut sink = Vec::new();

        let mut session = EvalSession::new(&backend, question, card(), &generation);
        let err = session.run(&mut sink).unwrap_err();

        assert!(err.is_validation());
        assert_eq!(backend.call_count(), 0);
        assert!(sink.is_empty());
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_turn_index_counts_attempts() {
        let backend = ScriptedBackend::new("m").failing_on(3);
        let generation = GenerationConfig::default();
        let mut sink = Vec::new();

        let mut session = EvalSession::new(&backend, multi_turn(), card(), &generation);
        session.run(&mut sink).unwrap();

        assert_eq!(session.conversation().turn_index(), 3);
        assert!(session.conversation().image_attached());
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let backend = ScriptedBackend::new("m");
        let generation = GenerationConfig::default();
        let mut sink = Vec::new();

        let mut session = EvalSession::new(&backend, multi_turn(), card(), &generation);
        session.run(&mut sink).unwrap();
        let err = session.run(&mut sink).unwrap_err();

        assert!(matches!(err, Error::SessionFinished(_)));
        assert_eq!(backend.call_count(), 3);
        assert_eq!(sink.len(), 3);
    }
}
