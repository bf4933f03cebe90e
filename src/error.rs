//! Error types for card-eval operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias for card-eval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading a corpus or running an evaluation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A multi-turn question did not split into the expected number of turns.
    #[error("Invalid question format: expected {expected} turns, got {actual}: {question}")]
    InvalidQuestion {
        /// The raw question line.
        question: String,
        /// Turn count required by the mode.
        expected: usize,
        /// Turn count found.
        actual: usize,
    },

    /// A question (or one of its turns) is empty after trimming.
    #[error("Empty question text: {0:?}")]
    EmptyQuestion(String),

    /// `run()` was called on a session that already reached a terminal state.
    #[error("Session already finished in state {0}")]
    SessionFinished(String),

    /// An image name is not among the uploaded images.
    #[error("Unknown image: {0}")]
    UnknownImage(String),

    /// Error from a model backend.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The image directory contains no image files.
    #[error("No images found in {}", dir.display())]
    NoImagesFound {
        /// Directory that was scanned.
        dir: PathBuf,
    },

    /// The questions file contains no non-empty lines.
    #[error("No questions found in {}", path.display())]
    NoQuestionsFound {
        /// Questions file that was read.
        path: PathBuf,
    },

    /// Other corpus loading problem.
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Invalid or incomplete configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Error writing or reading the results table.
    #[error("Report error: {0}")]
    Report(String),

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML config parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error only invalidates a single (image, question) item.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuestion { .. }
                | Self::EmptyQuestion(_)
                | Self::SessionFinished(_)
                | Self::UnknownImage(_)
        )
    }

    /// Whether this error means the corpus itself is unusable.
    #[must_use]
    pub fn is_corpus(&self) -> bool {
        matches!(
            self,
            Self::NoImagesFound { .. } | Self::NoQuestionsFound { .. } | Self::Corpus(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = Error::InvalidQuestion {
            question: "a|b".to_string(),
            expected: 3,
            actual: 2,
        };
        assert!(err.is_validation());
        assert!(!err.is_corpus());

        let err = Error::NoImagesFound { dir: PathBuf::from("data/images") };
        assert!(err.is_corpus());
        assert_eq!(err.to_string(), "No images found in data/images");
    }
}
