//! Run driver: every configured model over every corpus item.
//!
//! The harness is strictly sequential. Per model it initializes the backend,
//! runs one [`EvalSession`] per (image, question) pair in corpus order and
//! releases the backend. Item-level problems (unreadable image, malformed
//! question, backend failure) are logged and the run moves on; a backend
//! that runs out of resources stops that model only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::ModelBackend;
use crate::config::EvalConfig;
use crate::corpus::{Corpus, QuestionSpec};
use crate::error::Result;
use crate::eval::report::{CsvResultsWriter, RecordSink, ResultRecord, TableLayout};
use crate::eval::session::{EvalSession, SessionState};

/// Counters for a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,

    /// Models that initialized and ran.
    pub models_run: usize,

    /// Models skipped because initialization failed.
    pub models_skipped: usize,

    /// Sessions that answered every turn.
    pub sessions_completed: usize,

    /// Sessions that stopped on a backend failure.
    pub sessions_failed: usize,

    /// Items skipped before any call (bad question, unreadable image).
    pub items_skipped: usize,

    /// Records written, failure records included.
    pub records_written: usize,
}

impl RunSummary {
    fn started() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            models_run: 0,
            models_skipped: 0,
            sessions_completed: 0,
            sessions_failed: 0,
            items_skipped: 0,
            records_written: 0,
        }
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Drives evaluation runs for one configuration.
pub struct Harness<'a> {
    config: &'a EvalConfig,
}

impl<'a> Harness<'a> {
    /// Create a harness for `config`.
    #[must_use]
    pub fn new(config: &'a EvalConfig) -> Self {
        Self { config }
    }

    /// Load the configured corpus.
    pub fn load_corpus(&self) -> Result<Corpus> {
        let corpus = Corpus::load(&self.config.images_dir, &self.config.questions_path)?;
        info!(
            images = corpus.images.len(),
            questions = corpus.questions.len(),
            pairing = ?self.config.pairing,
            "Loaded corpus"
        );
        Ok(corpus)
    }

    /// Load the corpus, then write results to the configured CSV file.
    ///
    /// The results file is only created once the corpus has loaded, so a
    /// missing or empty corpus leaves no file behind.
    pub fn run_to_csv(&self, backends: &mut [&mut dyn ModelBackend]) -> Result<RunSummary> {
        let corpus = self.load_corpus()?;
        let mut writer =
            CsvResultsWriter::create(&self.config.output_path, TableLayout::from(self.config.mode))?;
        let summary = self.run(&corpus, backends, &mut writer)?;
        info!(
            path = %writer.path().display(),
            records = writer.written(),
            "Results written"
        );
        Ok(summary)
    }

    /// Run every backend over `corpus`, writing records to `sink`.
    pub fn run(
        &self,
        corpus: &Corpus,
        backends: &mut [&mut dyn ModelBackend],
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::started();
        for backend in backends.iter_mut() {
            self.run_model(corpus, &mut **backend, sink, &mut summary)?;
        }
        summary.finished_at = Utc::now();

        info!(
            models = summary.models_run,
            skipped_models = summary.models_skipped,
            completed = summary.sessions_completed,
            failed = summary.sessions_failed,
            skipped_items = summary.items_skipped,
            records = summary.records_written,
            "Run finished"
        );
        Ok(summary)
    }

    fn run_model(
        &self,
        corpus: &Corpus,
        backend: &mut dyn ModelBackend,
        sink: &mut dyn RecordSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let model = backend.id().to_string();
        info!(model = %model, "Initializing model");
        if let Err(err) = backend.initialize() {
            warn!(model = %model, error = %err, "Model failed to initialize, skipping");
            summary.models_skipped += 1;
            return Ok(());
        }
        summary.models_run += 1;

        let result = self.run_items(corpus, &*backend, sink, summary);
        backend.release();
        info!(model = %model, "Released model");
        result
    }

    fn run_items(
        &self,
        corpus: &Corpus,
        backend: &dyn ModelBackend,
        sink: &mut dyn RecordSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let model = backend.id();
        for (image, line) in corpus.pairs(self.config.pairing) {
            let question = match QuestionSpec::parse(line, self.config.mode) {
                Ok(question) => question,
                Err(err) => {
                    warn!(model, image = %image.name, error = %err, "Skipping malformed question");
                    summary.items_skipped += 1;
                    continue;
                }
            };
            let attachment = match image.load() {
                Ok(attachment) => attachment,
                Err(err) => {
                    warn!(model, image = %image.name, error = %err, "Skipping unreadable image");
                    summary.items_skipped += 1;
                    continue;
                }
            };

            let mut session = EvalSession::new(backend, question, attachment, &self.config.generation)
                .with_system_instruction(self.config.system_instruction.as_deref());
            let outcome = session.run(sink)?;
            summary.records_written += outcome.records_written;

            let SessionState::Failed(turn) = outcome.state else {
                summary.sessions_completed += 1;
                continue;
            };
            summary.sessions_failed += 1;

            let Some(err) = outcome.error else {
                continue;
            };
            if self.config.record_failures {
                let question = session.question();
                sink.append(ResultRecord::failure(
                    model,
                    &image.name,
                    question.is_multi_turn().then_some(turn),
                    question.label(),
                    &err,
                ))?;
                summary.records_written += 1;
            }
            if err.is_resource_exhausted() {
                warn!(model, error = %err, "Model ran out of resources, skipping its remaining items");
                break;
            }
        }
        Ok(())
    }
}
