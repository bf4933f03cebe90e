//! Question loading and turn parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::TurnMode;
use crate::error::{Error, Result};

/// Separator between the turns of a multi-turn question.
pub const TURN_DELIMITER: char = '|';

/// Number of turns a multi-turn question must have.
pub const MULTI_TURN_SEGMENTS: usize = 3;

/// Read non-empty, trimmed lines from a questions file.
pub fn load_questions(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Corpus(format!("Failed to read {}: {}", path.display(), e)))?;
    let questions: Vec<String> = content
        .lines()
        .map(|line| line.trim_start_matches('\u{feff}').trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if questions.is_empty() {
        return Err(Error::NoQuestionsFound { path: path.to_path_buf() });
    }
    Ok(questions)
}

/// A question as asked in one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSpec {
    /// One question, one call.
    Single(String),
    /// Ordered turns of one conversation.
    MultiTurn {
        /// The undivided line the turns were split from.
        raw: String,
        /// Trimmed turn texts.
        turns: Vec<String>,
    },
}

impl QuestionSpec {
    /// Parse a question line for the given mode.
    ///
    /// Multi-turn lines must split into exactly [`MULTI_TURN_SEGMENTS`]
    /// non-empty turns.
    pub fn parse(line: &str, mode: TurnMode) -> Result<Self> {
        let line = line.trim();
        let spec = match mode {
            TurnMode::Single => Self::Single(line.to_string()),
            TurnMode::MultiTurn => Self::MultiTurn {
                raw: line.to_string(),
                turns: line.split(TURN_DELIMITER).map(|t| t.trim().to_string()).collect(),
            },
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the invariants `parse` establishes.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Single(text) => {
                if text.trim().is_empty() {
                    return Err(Error::EmptyQuestion(text.clone()));
                }
            }
            Self::MultiTurn { raw, turns } => {
                if turns.len() != MULTI_TURN_SEGMENTS {
                    return Err(Error::InvalidQuestion {
                        question: raw.clone(),
                        expected: MULTI_TURN_SEGMENTS,
                        actual: turns.len(),
                    });
                }
                if turns.iter().any(|t| t.trim().is_empty()) {
                    return Err(Error::EmptyQuestion(raw.clone()));
                }
            }
        }
        Ok(())
    }

    /// Turn texts in order.
    #[must_use]
    pub fn turns(&self) -> Vec<&str> {
        match self {
            Self::Single(text) => vec![text.as_str()],
            Self::MultiTurn { turns, .. } => turns.iter().map(String::as_str).collect(),
        }
    }

    /// Number of turns.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::MultiTurn { turns, .. } => turns.len(),
        }
    }

    /// Text written to the `question` column of every record of the session.
    ///
    /// Multi-turn sessions label all their records with the undivided line.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Single(text) => text,
            Self::MultiTurn { raw, .. } => raw,
        }
    }

    /// Whether this is a multi-turn spec.
    #[must_use]
    pub fn is_multi_turn(&self) -> bool {
        matches!(self, Self::MultiTurn { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_turn() {
        let spec = QuestionSpec::parse(" Where? | What company?|Any notes? ", TurnMode::MultiTurn).unwrap();
        assert_eq!(spec.turns(), vec!["Where?", "What company?", "Any notes?"]);
        assert_eq!(spec.label(), "Where? | What company?|Any notes?");
        assert!(spec.is_multi_turn());
    }

    #[test]
    fn test_parse_wrong_turn_count() {
        for line in ["Only one", "One|Two", "1|2|3|4"] {
            let err = QuestionSpec::parse(line, TurnMode::MultiTurn).unwrap_err();
            assert!(matches!(err, Error::InvalidQuestion { expected: 3, .. }), "{line}");
        }
    }

    #[test]
    fn test_parse_empty_turn() {
        let err = QuestionSpec::parse("Where?||Notes?", TurnMode::MultiTurn).unwrap_err();
        assert!(matches!(err, Error::EmptyQuestion(_)));
    }

    #[test]
    fn test_single_keeps_pipes() {
        let spec = QuestionSpec::parse("Name|Phone", TurnMode::Single).unwrap();
        assert_eq!(spec.turn_count(), 1);
        assert_eq!(spec.label(), "Name|Phone");
    }

    #[test]
    fn test_validate_hand_built_spec() {
        let spec = QuestionSpec::MultiTurn {
            raw: "a|b".to_string(),
            turns: vec!["a".to_string(), "b".to_string()],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_load_questions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questions.txt");
        std::fs::write(&path, "\u{feff}이 명함의 이름은?\n\n  What company?  \r\n\t\n").unwrap();

        let questions = load_questions(&path).unwrap();
        assert_eq!(questions, vec!["이 명함의 이름은?", "What company?"]);
    }

    #[test]
    fn test_load_questions_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questions.txt");
        std::fs::write(&path, "\n   \n").unwrap();

        assert!(matches!(load_questions(&path).unwrap_err(), Error::NoQuestionsFound { .. }));
    }
}
