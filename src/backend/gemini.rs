//! Gemini `generateContent` over REST.
//!
//! Two endpoints speak the same wire format: Vertex AI (project + region,
//! OAuth bearer token) and the public Generative Language API (API key).

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendError, GenerationConfig, InvokeRequest, ModelBackend, Part, Role};

const GENERATIVE_LANGUAGE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Where Gemini requests are sent and how they authenticate.
#[derive(Clone)]
pub enum GeminiEndpoint {
    /// Vertex AI publisher model in a Google Cloud project.
    VertexAi {
        /// Google Cloud project ID.
        project: String,
        /// Region, e.g. `us-central1`.
        location: String,
        /// OAuth access token (`gcloud auth print-access-token`).
        access_token: String,
    },
    /// Generative Language API with an API key.
    GenerativeLanguage {
        /// API key.
        api_key: String,
    },
}

impl GeminiEndpoint {
    fn url(&self, model: &str) -> String {
        match self {
            Self::VertexAi { project, location, .. } => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent"
            ),
            Self::GenerativeLanguage { .. } => {
                format!("{GENERATIVE_LANGUAGE_URL}/models/{model}:generateContent")
            }
        }
    }
}

impl std::fmt::Debug for GeminiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VertexAi { project, location, .. } => f
                .debug_struct("VertexAi")
                .field("project", project)
                .field("location", location)
                .finish_non_exhaustive(),
            Self::GenerativeLanguage { .. } => f.debug_struct("GenerativeLanguage").finish_non_exhaustive(),
        }
    }
}

/// Gemini model reached over REST.
#[derive(Debug)]
pub struct GeminiBackend {
    model: String,
    endpoint: GeminiEndpoint,
    client: Client,
}

impl GeminiBackend {
    /// Create a backend for `model` (e.g. `gemini-2.0-flash`).
    pub fn new(model: &str, endpoint: GeminiEndpoint, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { model: model.to_string(), endpoint, client })
    }
}

impl ModelBackend for GeminiBackend {
    fn id(&self) -> &str {
        &self.model
    }

    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String, BackendError> {
        let body = GenerateContentRequest::from_invoke(request);
        let url = self.endpoint.url(&self.model);
        debug!(model = %self.model, contents = body.contents.len(), "gemini generateContent");

        let builder = self.client.post(url).json(&body);
        let builder = match &self.endpoint {
            GeminiEndpoint::VertexAi { access_token, .. } => builder.bearer_auth(access_token),
            GeminiEndpoint::GenerativeLanguage { api_key } => builder.header("x-goog-api-key", api_key),
        };

        let response = builder.send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(BackendError::from_status(&self.model, status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::InvalidResponse {
                backend: self.model.clone(),
                reason: e.to_string(),
            })?;
        parsed.into_text(&self.model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    contents: Vec<WireContent>,
    generation_config: WireGenerationConfig,
}

impl GenerateContentRequest {
    fn from_invoke(request: &InvokeRequest<'_>) -> Self {
        let system_instruction = request.system_instruction.map(|text| WireContent {
            role: None,
            parts: vec![WirePart::Text { text: text.to_string() }],
        });

        let contents = request
            .messages()
            .into_iter()
            .map(|message| WireContent {
                role: Some(match message.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }),
                parts: message.parts.iter().map(|part| WirePart::from_part(part)).collect(),
            })
            .collect();

        Self {
            system_instruction,
            contents,
            generation_config: WireGenerationConfig::from(request.config),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: InlineData },
}

impl WirePart {
    fn from_part(part: &Part) -> Self {
        match part {
            Part::Text(text) => Self::Text { text: text.clone() },
            Part::Image(image) => Self::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: BASE64.encode(&image.bytes),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

impl From<&GenerationConfig> for WireGenerationConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_tokens,
            stop_sequences: config.stop_sequences.clone(),
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenate the text parts of the first candidate.
    fn into_text(self, backend: &str) -> Result<String, BackendError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(BackendError::EmptyResponse { backend: backend.to_string(), reason: block_reason });
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(BackendError::EmptyResponse {
                backend: backend.to_string(),
                reason: candidate.finish_reason.or(block_reason),
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::ImageAttachment;
    use crate::backend::ContentPart;

    #[test]
    fn test_request_wire_format() {
        let image = ImageAttachment::new("card_1.png", vec![1u8, 2, 3]).with_mime_type("image/png");
        let content = vec![
            ContentPart::user_text("Extract the contact."),
            ContentPart::image(image),
            ContentPart::assistant_text("Jane Doe"),
            ContentPart::user_text("Where did we meet?"),
        ];
        let config = GenerationConfig::gemini_default();
        let request = InvokeRequest {
            system_instruction: Some("You manage business cards."),
            content: &content,
            config: &config,
        };

        let json = serde_json::to_value(GenerateContentRequest::from_invoke(&request)).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "You manage business cards.");
        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["data"], "AQID");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["topK"], 32);
        assert!(json["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_response_text() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Jane "},{"text":"Doe"}]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_text("gemini").unwrap(), "Jane Doe");
    }

    #[test]
    fn test_blocked_response() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let err = parsed.into_text("gemini").unwrap_err();
        assert_eq!(err.to_string(), "gemini returned no text (SAFETY)");
    }

    #[test]
    fn test_vertex_url() {
        let endpoint = GeminiEndpoint::VertexAi {
            project: "demo".to_string(),
            location: "us-central1".to_string(),
            access_token: "token".to_string(),
        };
        assert_eq!(
            endpoint.url("gemini-pro-vision"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/demo/locations/us-central1/publishers/google/models/gemini-pro-vision:generateContent"
        );
    }
}
