//! Conversation state shared by evaluation and chat sessions.
//!
//! The state owns the role-tagged history, the image-attached flag and the
//! turn counter. Each turn's backend content is rebuilt from the history, so
//! an image that was attached on an earlier turn is never sent again.

use serde::{Deserialize, Serialize};

use crate::attachment::ImageAttachment;
use crate::backend::{ContentPart, Role};

/// One message in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author.
    pub role: Role,

    /// Message text.
    pub content: String,

    /// Names of images attached to this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Content prepared for one turn.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    /// Ordered content for the backend call.
    pub content: Vec<ContentPart>,

    /// Whether this turn carries the images.
    pub attached_images: bool,
}

/// History, image flag and turn counter of one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    history: Vec<HistoryEntry>,
    image_attached: bool,
    turn_index: usize,
}

impl ConversationState {
    /// Empty conversation: no history, no image sent, turn 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in conversation order.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Whether an image has been sent in this conversation.
    #[must_use]
    pub fn image_attached(&self) -> bool {
        self.image_attached
    }

    /// Number of turns attempted.
    #[must_use]
    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    /// Start a turn: record the question and build the call content.
    ///
    /// Content is the prior history as role-tagged text, then `images` if no
    /// image has been attached yet, then the question. Images are only
    /// attached when `images` is non-empty; after that the flag stays set.
    pub fn begin_turn(&mut self, question: &str, images: &[ImageAttachment]) -> PreparedTurn {
        let mut content: Vec<ContentPart> = self
            .history
            .iter()
            .map(|entry| ContentPart {
                role: entry.role,
                part: crate::backend::Part::Text(entry.content.clone()),
            })
            .collect();

        let attach = !self.image_attached && !images.is_empty();
        if attach {
            content.extend(images.iter().cloned().map(ContentPart::image));
            self.image_attached = true;
        }
        content.push(ContentPart::user_text(question));

        self.history.push(HistoryEntry {
            role: Role::User,
            content: question.to_string(),
            images: if attach {
                images.iter().map(|img| img.name.clone()).collect()
            } else {
                Vec::new()
            },
        });
        self.turn_index += 1;

        PreparedTurn { content, attached_images: attach }
    }

    /// Record the model's reply to the current turn.
    pub fn record_reply(&mut self, reply: &str) {
        self.history.push(HistoryEntry {
            role: Role::Assistant,
            content: reply.to_string(),
            images: Vec::new(),
        });
    }

    /// Undo a turn whose call failed, so it can be retried as if never sent.
    ///
    /// Used by interactive chat; evaluation sessions keep failed turns.
    pub fn abort_turn(&mut self, turn: &PreparedTurn) {
        if self.history.last().is_some_and(|entry| entry.role == Role::User) {
            self.history.pop();
        }
        if turn.attached_images {
            self.image_attached = false;
        }
        self.turn_index = self.turn_index.saturating_sub(1);
    }

    /// Allow the next turn to attach images again (new upload in chat).
    pub fn reset_image_attachment(&mut self) {
        self.image_attached = false;
    }
}
