//! # card-eval
//!
//! Evaluation harness for vision-language models reading business cards.
//!
//! The library runs every configured model over a corpus of card images and
//! questions, one [`EvalSession`] per (image, question) item, and writes one
//! result record per answered turn. Multi-turn questions keep the conversation
//! going with the image attached to the first call only.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use card_eval::{EvalConfig, Harness, ModelBackend, ModelSpec, TurnMode, build_backend};
//!
//! let config = EvalConfig::builder()
//!     .images_dir("data/images")
//!     .questions_path("data/multi_turn_questions.txt")
//!     .output_path("multi_turn_results.csv")
//!     .mode(TurnMode::MultiTurn)
//!     .model("gemini:gemini-1.5-flash-002".parse::<ModelSpec>()?)
//!     .build();
//!
//! let mut backends = config
//!     .models
//!     .iter()
//!     .map(|spec| build_backend(spec, &config.providers))
//!     .collect::<card_eval::Result<Vec<_>>>()?;
//! let mut refs: Vec<_> = backends
//!     .iter_mut()
//!     .map(|b| b.as_mut() as &mut dyn ModelBackend)
//!     .collect();
//!
//! let summary = Harness::new(&config).run_to_csv(&mut refs)?;
//! ```
//!
//! ## Modules
//!
//! - [`error`]: Error types for the library
//! - [`config`]: Run configuration, TOML loading and provider settings
//! - [`corpus`]: Image discovery and question parsing
//! - [`backend`]: Model backend trait and provider clients
//! - [`conversation`]: History and attach-once image state
//! - [`eval`]: Evaluation sessions, run driver and result output
//! - [`chat`]: Interactive card chat and contact extraction
//! - [`stats`]: Latency statistics over result files

pub mod attachment;
pub mod backend;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod corpus;
pub mod error;
pub mod eval;
pub mod stats;

// Re-export commonly used types
pub use attachment::ImageAttachment;
pub use backend::{
    BackendError, ContentPart, GenerationConfig, InvokeRequest, ModelBackend, Role, build_backend,
};
pub use chat::{ChatSession, ContactInfo};
pub use config::{EvalConfig, EvalConfigBuilder, ModelSpec, Pairing, Provider, ProviderSettings, TurnMode};
pub use conversation::{ConversationState, HistoryEntry};
pub use corpus::{Corpus, CorpusImage, QuestionSpec};
pub use error::{Error, Result};
pub use eval::{
    CsvResultsWriter, EvalSession, Harness, RecordSink, ResultRecord, RunSummary, SessionOutcome,
    SessionState,
};
pub use stats::{GroupBy, LatencyReport, Summary};
