//! Model backends.
//!
//! A backend accepts an ordered sequence of role-tagged content parts (text
//! and images) plus a generation configuration and returns the generated
//! text. Provider adapters live in submodules:
//!
//! - [`dry_run`]: echo backend, no network
//! - [`gemini`]: Gemini `generateContent` (Vertex AI or API key)
//! - [`ollama`]: Ollama `/api/chat`
//! - [`openai`]: OpenAI-compatible `/chat/completions` (vLLM, llama.cpp, ...)

pub mod dry_run;
#[cfg(feature = "http")]
pub mod gemini;
#[cfg(feature = "http")]
pub mod ollama;
#[cfg(feature = "http")]
pub mod openai;
#[cfg(test)]
pub(crate) mod scripted;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attachment::ImageAttachment;
use crate::config::{ModelSpec, Provider, ProviderSettings};
use crate::error::{Error, Result};

pub use dry_run::DryRunBackend;

/// Who produced a piece of conversation content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person (or harness) asking.
    User,
    /// The model.
    Assistant,
}

/// Payload of a content part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Plain text.
    Text(String),
    /// Encoded image with mime type.
    Image(ImageAttachment),
}

/// One element of the ordered content sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPart {
    /// Author of this part.
    pub role: Role,
    /// Text or image.
    pub part: Part,
}

impl ContentPart {
    /// User text part.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: Role::User, part: Part::Text(text.into()) }
    }

    /// Model text part.
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, part: Part::Text(text.into()) }
    }

    /// User image part.
    #[must_use]
    pub fn image(image: ImageAttachment) -> Self {
        Self { role: Role::User, part: Part::Image(image) }
    }

    /// Text payload, if this is a text part.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.part {
            Part::Text(text) => Some(text),
            Part::Image(_) => None,
        }
    }

    /// Image payload, if this is an image part.
    #[must_use]
    pub fn as_image(&self) -> Option<&ImageAttachment> {
        match &self.part {
            Part::Image(image) => Some(image),
            Part::Text(_) => None,
        }
    }
}

/// Sampling parameters passed through to the backend.
///
/// Values are opaque: unset fields are left to the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold.
    pub top_p: Option<f32>,
    /// Top-k sampling.
    pub top_k: Option<u32>,
    /// Maximum number of generated tokens.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop_sequences: Vec<String>,
    /// Frequency penalty.
    pub frequency_penalty: Option<f32>,
    /// Presence penalty.
    pub presence_penalty: Option<f32>,
}

impl GenerationConfig {
    /// Settings the Gemini harness used: temperature 0.2, top_p 1, top_k 32.
    #[must_use]
    pub fn gemini_default() -> Self {
        Self {
            temperature: Some(0.2),
            top_p: Some(1.0),
            top_k: Some(32),
            ..Self::default()
        }
    }

    /// Settings the interactive chat used: temperature 0.7, 1000 output tokens.
    #[must_use]
    pub fn chat_default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(1000),
            ..Self::default()
        }
    }
}

/// A single backend call.
#[derive(Debug, Clone, Copy)]
pub struct InvokeRequest<'a> {
    /// Optional system instruction.
    pub system_instruction: Option<&'a str>,
    /// Ordered content, oldest first.
    pub content: &'a [ContentPart],
    /// Sampling parameters.
    pub config: &'a GenerationConfig,
}

impl<'a> InvokeRequest<'a> {
    /// Images carried by this request, in order.
    pub fn images(&self) -> impl Iterator<Item = &'a ImageAttachment> + 'a {
        self.content.iter().filter_map(ContentPart::as_image)
    }

    /// Group consecutive parts with the same role into messages.
    #[must_use]
    pub fn messages(&self) -> Vec<Message<'a>> {
        let mut messages: Vec<Message<'a>> = Vec::new();
        for part in self.content {
            match messages.last_mut() {
                Some(last) if last.role == part.role => last.parts.push(&part.part),
                _ => messages.push(Message { role: part.role, parts: vec![&part.part] }),
            }
        }
        messages
    }
}

/// Consecutive content parts from one role.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    /// Author of the message.
    pub role: Role,
    /// Parts in order.
    pub parts: Vec<&'a Part>,
}

impl<'a> Message<'a> {
    /// Text parts joined with blank lines.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Images in this message.
    pub fn images(&self) -> impl Iterator<Item = &'a ImageAttachment> + '_ {
        self.parts.iter().copied().filter_map(|part| match part {
            Part::Image(image) => Some(image),
            Part::Text(_) => None,
        })
    }
}

/// Errors raised by a backend call or lifecycle step.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Transport failure (connect, timeout, TLS).
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        /// Backend identifier.
        backend: String,
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The response could not be decoded.
    #[error("{backend} returned an unreadable response: {reason}")]
    InvalidResponse {
        /// Backend identifier.
        backend: String,
        /// What was wrong.
        reason: String,
    },

    /// The response contained no generated text (e.g. blocked by safety filters).
    #[error("{backend} returned no text{}", reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    EmptyResponse {
        /// Backend identifier.
        backend: String,
        /// Block or finish reason, if the provider gave one.
        reason: Option<String>,
    },

    /// The model ran out of memory or another hard resource.
    #[error("{backend} ran out of resources: {message}")]
    ResourceExhausted {
        /// Backend identifier.
        backend: String,
        /// Provider message.
        message: String,
    },

    /// The backend could not be initialized.
    #[error("{backend} is unavailable: {message}")]
    Unavailable {
        /// Backend identifier.
        backend: String,
        /// Reason.
        message: String,
    },

    /// Failure reported by a backend without a more specific category.
    #[error("{backend}: {message}")]
    Other {
        /// Backend identifier.
        backend: String,
        /// Message.
        message: String,
    },
}

impl BackendError {
    /// Whether the failure means further calls to this model will also fail.
    #[must_use]
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }

    /// Classify a non-success HTTP response.
    #[must_use]
    pub fn from_status(backend: &str, status: u16, body: &str) -> Self {
        const MAX_BODY: usize = 512;

        if body.to_lowercase().contains("out of memory") {
            return Self::ResourceExhausted {
                backend: backend.to_string(),
                message: body.trim().to_string(),
            };
        }

        let body = body.trim();
        let body = match body.char_indices().nth(MAX_BODY) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        Self::Status { backend: backend.to_string(), status, body }
    }
}

/// A multimodal model that can be invoked synchronously.
///
/// Backends own any model-lifetime resources. The harness calls
/// [`initialize`](Self::initialize) before a model's first session and
/// [`release`](Self::release) after its last.
pub trait ModelBackend {
    /// Model identifier written to result records.
    fn id(&self) -> &str;

    /// Prepare the model (load weights, probe the server).
    fn initialize(&mut self) -> std::result::Result<(), BackendError> {
        Ok(())
    }

    /// Generate a response for the request.
    fn invoke(&self, request: &InvokeRequest<'_>) -> std::result::Result<String, BackendError>;

    /// Free whatever `initialize` acquired.
    fn release(&mut self) {}
}

/// Construct the backend a [`ModelSpec`] names.
pub fn build_backend(spec: &ModelSpec, providers: &ProviderSettings) -> Result<Box<dyn ModelBackend>> {
    match spec.provider {
        Provider::DryRun => Ok(Box::new(DryRunBackend::new(&spec.model))),
        #[cfg(feature = "http")]
        Provider::Gemini => {
            let api_key = providers.google_api_key.clone().ok_or_else(|| {
                Error::Config("GOOGLE_API_KEY is required for the gemini provider".to_string())
            })?;
            let endpoint = gemini::GeminiEndpoint::GenerativeLanguage { api_key };
            Ok(Box::new(gemini::GeminiBackend::new(&spec.model, endpoint, providers.timeout())?))
        }
        #[cfg(feature = "http")]
        Provider::Vertex => {
            let vertex = &providers.vertex;
            let (Some(project), Some(location)) = (vertex.project.clone(), vertex.location.clone())
            else {
                return Err(Error::Config(
                    "vertex provider needs [providers.vertex] project and location".to_string(),
                ));
            };
            let access_token = vertex.access_token.clone().ok_or_else(|| {
                Error::Config("VERTEX_ACCESS_TOKEN is required for the vertex provider".to_string())
            })?;
            let endpoint = gemini::GeminiEndpoint::VertexAi { project, location, access_token };
            Ok(Box::new(gemini::GeminiBackend::new(&spec.model, endpoint, providers.timeout())?))
        }
        #[cfg(feature = "http")]
        Provider::Ollama => {
            let host = providers.ollama.host.clone().ok_or_else(|| {
                Error::Config("OLLAMA_HOST (or HOST_URL) is required for the ollama provider".to_string())
            })?;
            Ok(Box::new(ollama::OllamaBackend::new(&spec.model, host, providers.timeout())?))
        }
        #[cfg(feature = "http")]
        Provider::OpenAi => {
            let openai = &providers.openai;
            Ok(Box::new(openai::OpenAiBackend::new(
                &spec.model,
                openai.base_url.clone(),
                openai.api_key.clone(),
                providers.timeout(),
            )?))
        }
        #[cfg(not(feature = "http"))]
        _ => Err(Error::Config(format!(
            "provider {} requires the `http` feature",
            spec.provider
        ))),
    }
}
