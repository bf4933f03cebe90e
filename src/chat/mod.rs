//! Interactive business-card chat.
//!
//! A [`ChatSession`] keeps one conversation with one backend. Uploaded card
//! images are attached to the next message only; after that the conversation
//! continues as text until a new upload arrives.

mod contact;

use std::path::Path;

use tracing::{debug, warn};

pub use contact::{CLOSE_TAG, ContactInfo, OPEN_TAG};

use crate::attachment::ImageAttachment;
use crate::backend::{GenerationConfig, InvokeRequest, ModelBackend, Role};
use crate::conversation::{ConversationState, HistoryEntry};
use crate::error::{Error, Result};

/// Default system instruction for card chat.
pub const DEFAULT_CHAT_INSTRUCTION: &str = "\
You are an assistant for a smart business-card management service. Users send \
business-card images and talk about the people they met.

When you receive a card image, extract its details as JSON inside tags:
<extracted_info>
{
  \"name\": \"\",
  \"position\": \"\",
  \"company\": \"\",
  \"phone\": \"\",
  \"email\": \"\",
  \"address\": \"\",
  \"website\": \"\",
  \"other_details\": []
}
</extracted_info>

Then ask friendly follow-up questions about where the user met this person and \
what they discussed. Summarize the collected information and ask the user to \
confirm it. Once confirmed, ask whether there is another card to process.";

/// One chat conversation with card uploads.
pub struct ChatSession<'a> {
    backend: &'a dyn ModelBackend,
    system_instruction: Option<String>,
    generation: GenerationConfig,
    conversation: ConversationState,
    uploaded: Vec<ImageAttachment>,
    selected: Vec<usize>,
}

impl<'a> ChatSession<'a> {
    /// Start an empty chat with the default card instruction and sampling.
    #[must_use]
    pub fn new(backend: &'a dyn ModelBackend) -> Self {
        Self {
            backend,
            system_instruction: Some(DEFAULT_CHAT_INSTRUCTION.to_string()),
            generation: GenerationConfig::chat_default(),
            conversation: ConversationState::new(),
            uploaded: Vec::new(),
            selected: Vec::new(),
        }
    }

    /// Replace the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction;
        self
    }

    /// Replace the sampling parameters.
    #[must_use]
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Replace the uploaded images. The next message carries them.
    pub fn upload(&mut self, images: Vec<ImageAttachment>) {
        debug!(count = images.len(), "Images uploaded");
        self.uploaded = images;
        self.selected.clear();
        self.conversation.reset_image_attachment();
    }

    /// Read image files and upload them.
    pub fn upload_paths<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<usize> {
        let images = paths
            .iter()
            .map(ImageAttachment::from_path)
            .collect::<Result<Vec<_>>>()?;
        let count = images.len();
        self.upload(images);
        Ok(count)
    }

    /// Restrict the next message's images to the named uploads.
    ///
    /// An empty list clears the selection, so every upload is sent.
    pub fn select(&mut self, names: &[&str]) -> Result<()> {
        let selected = names
            .iter()
            .map(|name| {
                self.uploaded
                    .iter()
                    .position(|img| img.name == *name)
                    .ok_or_else(|| Error::UnknownImage((*name).to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.selected = selected;
        Ok(())
    }

    /// Uploaded images.
    #[must_use]
    pub fn uploaded(&self) -> &[ImageAttachment] {
        &self.uploaded
    }

    /// Currently selected images.
    #[must_use]
    pub fn selected(&self) -> Vec<&ImageAttachment> {
        self.selected.iter().filter_map(|&idx| self.uploaded.get(idx)).collect()
    }

    /// Whether the uploaded images have been sent.
    #[must_use]
    pub fn image_sent(&self) -> bool {
        self.conversation.image_attached()
    }

    /// Conversation history.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        self.conversation.history()
    }

    /// Send a message and return the reply.
    ///
    /// Images go out with the first message after an upload: the selection
    /// if there is one, otherwise every upload. On a backend error the
    /// message is withdrawn and the images stay pending.
    pub fn send(&mut self, text: &str) -> Result<String> {
        let images: Vec<ImageAttachment> = if self.selected.is_empty() {
            self.uploaded.clone()
        } else {
            self.selected().into_iter().cloned().collect()
        };

        let prepared = self.conversation.begin_turn(text, &images);
        let request = InvokeRequest {
            system_instruction: self.system_instruction.as_deref(),
            content: &prepared.content,
            config: &self.generation,
        };

        match self.backend.invoke(&request) {
            Ok(reply) => {
                self.conversation.record_reply(&reply);
                self.selected.clear();
                Ok(reply)
            }
            Err(err) => {
                warn!(model = self.backend.id(), error = %err, "Chat message failed");
                self.conversation.abort_turn(&prepared);
                Err(err.into())
            }
        }
    }

    /// Latest contact block the model reported.
    #[must_use]
    pub fn last_contact(&self) -> Option<ContactInfo> {
        self.history()
            .iter()
            .rev()
            .filter(|entry| entry.role == Role::Assistant)
            .find_map(|entry| ContactInfo::extract(&entry.content))
    }

    /// Write the history as pretty JSON.
    pub fn save_transcript(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self.history())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::ScriptedBackend;

    fn card(name: &str) -> ImageAttachment {
        ImageAttachment::new(name, vec![0xFF, 0xD8, 0xFF, 0xE0])
    }

    #[test]
    fn test_upload_attaches_to_next_message_only() {
        let backend = ScriptedBackend::new("gemini-2.0-flash");
        let mut chat = ChatSession::new(&backend);
        chat.upload(vec![card("a.jpg"), card("b.jpg")]);

        chat.send("Please read these").unwrap();
        chat.send("We met at a conference").unwrap();

        assert_eq!(backend.call(0).images, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        assert!(backend.call(1).images.is_empty());
        assert!(chat.image_sent());
        assert_eq!(chat.history().len(), 4);
        assert_eq!(chat.history()[0].images.len(), 2);
    }

    #[test]
    fn test_new_upload_resets_attachment() {
        let backend = ScriptedBackend::new("m");
        let mut chat = ChatSession::new(&backend);
        chat.upload(vec![card("a.jpg")]);
        chat.send("first").unwrap();

        chat.upload(vec![card("c.jpg")]);
        assert!(!chat.image_sent());
        chat.send("second").unwrap();

        assert_eq!(backend.call(1).images, vec!["c.jpg".to_string()]);
    }

    #[test]
    fn test_selection_limits_images_and_clears_after_send() {
        let backend = ScriptedBackend::new("m");
        let mut chat = ChatSession::new(&backend);
        chat.upload(vec![card("a.jpg"), card("b.jpg")]);
        chat.select(&["b.jpg"]).unwrap();

        chat.send("Only the second one").unwrap();

        assert_eq!(backend.call(0).images, vec!["b.jpg".to_string()]);
        assert!(chat.selected().is_empty());
        assert!(matches!(chat.select(&["missing.jpg"]), Err(Error::UnknownImage(_))));
    }

    #[test]
    fn test_failed_send_rolls_back() {
        let backend = ScriptedBackend::new("m").failing_on(1);
        let mut chat = ChatSession::new(&backend);
        chat.upload(vec![card("a.jpg")]);

        assert!(chat.send("hello").is_err());
        assert!(chat.history().is_empty());
        assert!(!chat.image_sent());

        chat.send("hello again").unwrap();
        assert_eq!(backend.call(1).images, vec!["a.jpg".to_string()]);
    }

    #[test]
    fn test_system_instruction_and_defaults() {
        let backend = ScriptedBackend::new("m");
        let mut chat = ChatSession::new(&backend);
        chat.send("hi").unwrap();
        assert!(backend.call(0).system_instruction.unwrap().contains(OPEN_TAG));

        let backend = ScriptedBackend::new("m");
        let mut chat = ChatSession::new(&backend).with_system_instruction(None);
        chat.send("hi").unwrap();
        assert!(backend.call(0).system_instruction.is_none());
    }

    #[test]
    fn test_last_contact_and_transcript() {
        let backend = ScriptedBackend::new("m").with_replies(&[
            "<extracted_info>{\"name\": \"Kim\", \"company\": \"Acme\"}</extracted_info> Where did you meet?",
            "Noted!",
        ]);
        let mut chat = ChatSession::new(&backend);
        chat.upload(vec![card("a.jpg")]);
        chat.send("Read this card").unwrap();
        chat.send("At the Seoul expo").unwrap();

        let contact = chat.last_contact().unwrap();
        assert_eq!(contact.name, "Kim");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_history.json");
        chat.save_transcript(&path).unwrap();

        let saved: Vec<HistoryEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.len(), 4);
        assert_eq!(saved[0].role, Role::User);
        assert_eq!(saved[0].images, vec!["a.jpg".to_string()]);
        assert_eq!(saved[3].content, "Noted!");
    }
}
