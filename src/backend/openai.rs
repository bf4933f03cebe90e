//! OpenAI-compatible chat completions.
//!
//! Covers locally served models (vLLM, llama.cpp server, SGLang) as well as
//! hosted APIs. Images travel as `data:` URIs inside `image_url` parts.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendError, InvokeRequest, ModelBackend, Part, Role};

/// Default base URL for a local OpenAI-compatible server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";

/// Model behind an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiBackend {
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Create a backend. `base_url` defaults to [`DEFAULT_BASE_URL`].
    pub fn new(
        model: &str,
        base_url: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self { model: model.to_string(), base_url, api_key, client })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

impl ModelBackend for OpenAiBackend {
    fn id(&self) -> &str {
        &self.model
    }

    /// Probe `/models` so a server that has not loaded the model is skipped up front.
    fn initialize(&mut self) -> Result<(), BackendError> {
        let response = self.authorized(self.client.get(format!("{}/models", self.base_url))).send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(BackendError::from_status(&self.model, status.as_u16(), &text));
        }

        let models: ModelList = serde_json::from_str(&text).map_err(|e| BackendError::InvalidResponse {
            backend: self.model.clone(),
            reason: e.to_string(),
        })?;
        if !models.data.iter().any(|m| m.id == self.model) {
            return Err(BackendError::Unavailable {
                backend: self.model.clone(),
                message: format!("not served by {}", self.base_url),
            });
        }
        info!(model = %self.model, base_url = %self.base_url, "openai-compatible model available");
        Ok(())
    }

    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String, BackendError> {
        let body = ChatCompletionRequest::from_invoke(&self.model, request);
        debug!(model = %self.model, messages = body.messages.len(), "chat completion");

        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        let response = self.authorized(builder).send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(BackendError::from_status(&self.model, status.as_u16(), &text));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::InvalidResponse {
                backend: self.model.clone(),
                reason: e.to_string(),
            })?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| BackendError::EmptyResponse {
            backend: self.model.clone(),
            reason: None,
        })?;
        choice.message.content.ok_or_else(|| BackendError::EmptyResponse {
            backend: self.model.clone(),
            reason: choice.finish_reason,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    /// Not part of the OpenAI schema; vLLM and SGLang accept it.
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

impl<'a> ChatCompletionRequest<'a> {
    fn from_invoke(model: &'a str, request: &InvokeRequest<'_>) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = request.system_instruction {
            messages.push(WireMessage {
                role: "system",
                content: WireContent::Text(system.to_string()),
            });
        }
        for message in request.messages() {
            let content = match message.role {
                // Assistant turns are plain strings; user turns may carry images.
                Role::Assistant => WireContent::Text(message.joined_text()),
                Role::User => WireContent::Parts(
                    message
                        .parts
                        .iter()
                        .map(|part| match part {
                            Part::Text(text) => WirePart::Text { text: text.clone() },
                            Part::Image(image) => WirePart::ImageUrl {
                                image_url: ImageUrl {
                                    url: format!(
                                        "data:{};base64,{}",
                                        image.mime_type,
                                        BASE64.encode(&image.bytes)
                                    ),
                                },
                            },
                        })
                        .collect(),
                ),
            };
            messages.push(WireMessage {
                role: match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content,
            });
        }

        let config = request.config;
        Self {
            model,
            messages,
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_tokens: config.max_tokens,
            stop: config.stop_sequences.clone(),
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::ImageAttachment;
    use crate::backend::{ContentPart, GenerationConfig};

    #[test]
    fn test_request_wire_format() {
        let content = vec![
            ContentPart::user_text("Read this card."),
            ContentPart::image(ImageAttachment::new("card.png", vec![1u8, 2, 3]).with_mime_type("image/png")),
            ContentPart::assistant_text("Jane Doe, Acme"),
            ContentPart::user_text("Phone?"),
        ];
        let config = GenerationConfig { max_tokens: Some(200), ..GenerationConfig::default() };
        let request = InvokeRequest {
            system_instruction: Some("You are a helpful assistant."),
            content: &content,
            config: &config,
        };

        let json = serde_json::to_value(ChatCompletionRequest::from_invoke("Qwen/Qwen2.5-VL-3B-Instruct", &request)).unwrap();
        assert_eq!(json["messages"][0]["content"], "You are a helpful assistant.");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        assert_eq!(json["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(json["messages"][1]["content"][1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert_eq!(json["messages"][2]["content"], "Jane Doe, Acme");
        assert_eq!(json["max_tokens"], 200);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Acme Corp"},"finish_reason":"stop"}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Acme Corp"));
    }
}
