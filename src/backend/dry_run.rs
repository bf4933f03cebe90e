//! Offline echo backend.

use super::{BackendError, InvokeRequest, ModelBackend, Role};

/// Answers every call by echoing the latest user text.
///
/// Useful for checking a corpus and config end to end without network
/// access or quota.
#[derive(Debug, Clone)]
pub struct DryRunBackend {
    id: String,
}

impl DryRunBackend {
    /// Create an echo backend reporting `id` as its model.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl ModelBackend for DryRunBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String, BackendError> {
        let question = request
            .content
            .iter()
            .rev()
            .filter(|part| part.role == Role::User)
            .find_map(|part| part.text())
            .unwrap_or_default();
        let images = request.images().count();
        Ok(format!("[{}] {} (images: {})", self.id, question, images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::ImageAttachment;
    use crate::backend::{ContentPart, GenerationConfig};

    #[test]
    fn test_echoes_latest_question() {
        let backend = DryRunBackend::new("echo");
        let content = vec![
            ContentPart::user_text("first"),
            ContentPart::image(ImageAttachment::new("a.png", vec![1])),
            ContentPart::assistant_text("reply"),
            ContentPart::user_text("second"),
        ];
        let config = GenerationConfig::default();
        let request = InvokeRequest { system_instruction: None, content: &content, config: &config };

        assert_eq!(backend.invoke(&request).unwrap(), "[echo] second (images: 1)");
    }
}
