//! Result records and the sinks they are written to.
//!
//! Records are written through as soon as they are produced, so a run that is
//! interrupted keeps everything measured up to that point. The CSV layout is
//! `model,image,question,response,inference_time`, with a `turn` column after
//! `image` for multi-turn runs. Files start with a UTF-8 byte order mark so
//! spreadsheet tools pick the right encoding for Korean text.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TurnMode;
use crate::error::{Error, Result};

/// UTF-8 byte order mark written at the start of result files.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Prefix of the response text in failure records.
pub const FAILURE_PREFIX: &str = "Error: ";

/// One row of evaluation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Backend identifier.
    pub model: String,

    /// Image file name.
    pub image: String,

    /// 1-based turn number for multi-turn sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<usize>,

    /// Question label. For multi-turn sessions this is the undivided line.
    pub question: String,

    /// Model response, or the error text of a failure record.
    pub response: String,

    /// Wall-clock seconds for the call, rounded to 2 decimals.
    /// `None` marks a failure record.
    pub inference_time: Option<f64>,
}

impl ResultRecord {
    /// Record for a call that did not produce a response.
    #[must_use]
    pub fn failure(
        model: impl Into<String>,
        image: impl Into<String>,
        turn: Option<usize>,
        question: impl Into<String>,
        error: &impl std::fmt::Display,
    ) -> Self {
        Self {
            model: model.into(),
            image: image.into(),
            turn,
            question: question.into(),
            response: format!("{FAILURE_PREFIX}{error}"),
            inference_time: None,
        }
    }

    /// Whether this is a failure record.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.inference_time.is_none()
    }
}

/// Round a measured duration to seconds with 2 decimals.
#[must_use]
pub fn round_seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

/// Destination for result records.
pub trait RecordSink {
    /// Persist one record. Must not buffer it past the call.
    fn append(&mut self, record: ResultRecord) -> Result<()>;
}

impl RecordSink for Vec<ResultRecord> {
    fn append(&mut self, record: ResultRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Column layout of a results file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLayout {
    /// `model,image,question,response,inference_time`
    SingleTurn,
    /// `model,image,turn,question,response,inference_time`
    MultiTurn,
}

impl TableLayout {
    /// Header row.
    #[must_use]
    pub fn header(self) -> &'static [&'static str] {
        match self {
            Self::SingleTurn => &["model", "image", "question", "response", "inference_time"],
            Self::MultiTurn => &["model", "image", "turn", "question", "response", "inference_time"],
        }
    }
}

impl From<TurnMode> for TableLayout {
    fn from(mode: TurnMode) -> Self {
        match mode {
            TurnMode::Single => Self::SingleTurn,
            TurnMode::MultiTurn => Self::MultiTurn,
        }
    }
}

/// Write-through CSV results file.
pub struct CsvResultsWriter {
    writer: csv::Writer<File>,
    layout: TableLayout,
    path: PathBuf,
    written: usize,
}

impl CsvResultsWriter {
    /// Create (or truncate) the file and write the BOM and header.
    pub fn create(path: impl AsRef<Path>, layout: TableLayout) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&path)?;
        file.write_all(UTF8_BOM)?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(layout.header())?;
        writer.flush()?;

        Ok(Self { writer, layout, path, written: 0 })
    }

    /// Path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl RecordSink for CsvResultsWriter {
    fn append(&mut self, record: ResultRecord) -> Result<()> {
        let inference_time = record.inference_time.map_or(String::new(), |t| t.to_string());
        match self.layout {
            TableLayout::SingleTurn => self.writer.write_record([
                &record.model,
                &record.image,
                &record.question,
                &record.response,
                &inference_time,
            ])?,
            TableLayout::MultiTurn => self.writer.write_record([
                &record.model,
                &record.image,
                &record.turn.map_or(String::new(), |t| t.to_string()),
                &record.question,
                &record.response,
                &inference_time,
            ])?,
        }
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

/// Read a results file written by [`CsvResultsWriter`].
///
/// The `turn` column is optional. An empty `inference_time` reads as a
/// failure record.
pub fn read_results(path: impl AsRef<Path>) -> Result<Vec<ResultRecord>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut reader = csv::Reader::from_reader(content);
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let required = |name: &str| {
        column(name).ok_or_else(|| {
            Error::Report(format!("{}: missing column '{}'", path.display(), name))
        })
    };

    let model = required("model")?;
    let image = required("image")?;
    let question = required("question")?;
    let response = required("response")?;
    let inference_time = required("inference_time")?;
    let turn = column("turn");

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let field = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let line = row + 2;

        let turn = match turn.map(&field) {
            Some(text) if !text.trim().is_empty() => Some(text.trim().parse::<usize>().map_err(|e| {
                Error::Report(format!("{}:{}: invalid turn '{}': {}", path.display(), line, text, e))
            })?),
            _ => None,
        };
        let time_text = field(inference_time);
        let inference_time = if time_text.trim().is_empty() {
            None
        } else {
            Some(time_text.trim().parse::<f64>().map_err(|e| {
                Error::Report(format!(
                    "{}:{}: invalid inference_time '{}': {}",
                    path.display(),
                    line,
                    time_text,
                    e
                ))
            })?)
        };

        records.push(ResultRecord {
            model: field(model),
            image: field(image),
            turn,
            question: field(question),
            response: field(response),
            inference_time,
        });
    }

    Ok(records)
}
