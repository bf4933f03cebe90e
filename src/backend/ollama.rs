//! Ollama chat API (`/api/chat`, non-streaming).

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendError, GenerationConfig, InvokeRequest, ModelBackend, Role};

/// Model served by an Ollama host.
#[derive(Debug)]
pub struct OllamaBackend {
    model: String,
    host: String,
    client: Client,
}

impl OllamaBackend {
    /// Create a backend for `model` on `host` (e.g. `http://localhost:11434`).
    pub fn new(model: &str, host: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        let host = host.into().trim_end_matches('/').to_string();
        Ok(Self { model: model.to_string(), host, client })
    }
}

impl ModelBackend for OllamaBackend {
    fn id(&self) -> &str {
        &self.model
    }

    /// Check that the host has the model pulled.
    fn initialize(&mut self) -> Result<(), BackendError> {
        let response = self.client.get(format!("{}/api/tags", self.host)).send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(BackendError::from_status(&self.model, status.as_u16(), &text));
        }

        let tags: TagsResponse = serde_json::from_str(&text).map_err(|e| BackendError::InvalidResponse {
            backend: self.model.clone(),
            reason: e.to_string(),
        })?;
        if !tags.models.iter().any(|m| model_matches(&m.name, &self.model)) {
            return Err(BackendError::Unavailable {
                backend: self.model.clone(),
                message: format!("model is not pulled on {}", self.host),
            });
        }
        info!(model = %self.model, host = %self.host, "ollama model available");
        Ok(())
    }

    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String, BackendError> {
        let body = ChatRequest::from_invoke(&self.model, request);
        debug!(model = %self.model, messages = body.messages.len(), "ollama chat");

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&body)
            .send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            return Err(BackendError::from_status(&self.model, status.as_u16(), &message));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| BackendError::InvalidResponse {
            backend: self.model.clone(),
            reason: e.to_string(),
        })?;
        // A missing message yields an empty answer, which is still a valid response.
        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }
}

/// `llama3.2-vision` matches `llama3.2-vision:latest`.
fn model_matches(listed: &str, wanted: &str) -> bool {
    listed == wanted || (!wanted.contains(':') && listed.strip_suffix(":latest") == Some(wanted))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: WireOptions,
}

impl<'a> ChatRequest<'a> {
    fn from_invoke(model: &'a str, request: &InvokeRequest<'_>) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = request.system_instruction {
            messages.push(WireMessage {
                role: "system",
                content: system.to_string(),
                images: Vec::new(),
            });
        }
        for message in request.messages() {
            messages.push(WireMessage {
                role: match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: message.joined_text(),
                images: message.images().map(|img| BASE64.encode(&img.bytes)).collect(),
            });
        }

        Self {
            model,
            messages,
            stream: false,
            options: WireOptions::from(request.config),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

impl From<&GenerationConfig> for WireOptions {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            num_predict: config.max_tokens,
            stop: config.stop_sequences.clone(),
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
