//! Evaluation configuration.
//!
//! An [`EvalConfig`] is built once at process start, from the builder, a TOML
//! file, or both, and passed by reference to the harness. Provider secrets
//! are never read from the file; they come from the environment (see
//! [`ProviderSettings::apply_env`]).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::GenerationConfig;
use crate::error::{Error, Result};

/// Default request timeout for HTTP backends.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// How each question line is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnMode {
    /// One question, one call.
    #[default]
    Single,
    /// `|`-separated turns in one conversation.
    MultiTurn,
}

impl FromStr for TurnMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "single-turn" => Ok(Self::Single),
            "multi" | "multi-turn" | "multiturn" => Ok(Self::MultiTurn),
            other => Err(format!("unknown turn mode: {other} (expected single or multi-turn)")),
        }
    }
}

/// How images and questions are combined into sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pairing {
    /// i-th image with i-th question; the longer list is truncated.
    #[default]
    Zip,
    /// Every question against every image.
    Cross,
}

impl FromStr for Pairing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "cross" => Ok(Self::Cross),
            other => Err(format!("unknown pairing: {other} (expected zip or cross)")),
        }
    }
}

/// Model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Gemini via the Generative Language API (API key).
    Gemini,
    /// Gemini via Vertex AI (project, region, access token).
    Vertex,
    /// Ollama host.
    Ollama,
    /// OpenAI-compatible server.
    OpenAi,
    /// Offline echo backend.
    DryRun,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gemini => "gemini",
            Self::Vertex => "vertex",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::DryRun => "dry-run",
        })
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "vertex" | "vertexai" | "vertex-ai" => Ok(Self::Vertex),
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai-compatible" | "vllm" => Ok(Self::OpenAi),
            "dry-run" | "dryrun" | "echo" => Ok(Self::DryRun),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// A model to evaluate, written `provider:model` (e.g. `ollama:llama3.2-vision`).
///
/// Only the first `:` separates the provider, so Ollama tags survive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelSpec {
    /// Provider that serves the model.
    pub provider: Provider,
    /// Provider-specific model name.
    pub model: String,
}

impl FromStr for ModelSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once(':')
            .ok_or_else(|| format!("model must be written provider:name, got {s:?}"))?;
        let model = model.trim();
        if model.is_empty() {
            return Err(format!("missing model name in {s:?}"));
        }
        Ok(Self { provider: provider.trim().parse()?, model: model.to_string() })
    }
}

impl TryFrom<String> for ModelSpec {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelSpec> for String {
    fn from(spec: ModelSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Vertex AI settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VertexSettings {
    /// Google Cloud project ID.
    pub project: Option<String>,
    /// Region, e.g. `us-central1`.
    pub location: Option<String>,
    /// OAuth access token, from `VERTEX_ACCESS_TOKEN` only.
    #[serde(skip)]
    pub access_token: Option<String>,
}

/// Ollama settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OllamaSettings {
    /// Host URL, e.g. `http://localhost:11434`.
    pub host: Option<String>,
}

/// OpenAI-compatible server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenAiSettings {
    /// Base URL including `/v1`.
    pub base_url: Option<String>,
    /// Bearer token, from `OPENAI_API_KEY` only.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Per-provider connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    /// HTTP request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Gemini API key, from `GOOGLE_API_KEY` only.
    #[serde(skip)]
    pub google_api_key: Option<String>,
    /// Vertex AI.
    pub vertex: VertexSettings,
    /// Ollama.
    pub ollama: OllamaSettings,
    /// OpenAI-compatible.
    pub openai: OpenAiSettings,
}

impl ProviderSettings {
    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Fill secrets and unset values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    /// Fill secrets and unset values from `lookup`.
    ///
    /// Secrets always come from the lookup; other values only fill gaps left
    /// by the config file.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.google_api_key = lookup("GOOGLE_API_KEY").or(self.google_api_key.take());
        self.vertex.access_token = lookup("VERTEX_ACCESS_TOKEN").or(self.vertex.access_token.take());
        self.openai.api_key = lookup("OPENAI_API_KEY").or(self.openai.api_key.take());

        if self.vertex.project.is_none() {
            self.vertex.project = lookup("VERTEX_PROJECT");
        }
        if self.vertex.location.is_none() {
            self.vertex.location = lookup("VERTEX_LOCATION");
        }
        if self.ollama.host.is_none() {
            self.ollama.host = lookup("OLLAMA_HOST").or_else(|| lookup("HOST_URL"));
        }
        if self.openai.base_url.is_none() {
            self.openai.base_url = lookup("OPENAI_BASE_URL");
        }
    }
}

/// Configuration for an evaluation run.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Directory holding the card images.
    pub images_dir: PathBuf,

    /// Newline-delimited questions file.
    pub questions_path: PathBuf,

    /// Results table path.
    pub output_path: PathBuf,

    /// Single or multi-turn questions.
    pub mode: TurnMode,

    /// How images and questions are combined.
    pub pairing: Pairing,

    /// System instruction sent with every call.
    pub system_instruction: Option<String>,

    /// Sampling parameters.
    pub generation: GenerationConfig,

    /// Models to evaluate, in order.
    pub models: Vec<ModelSpec>,

    /// Provider connection settings.
    pub providers: ProviderSettings,

    /// Append an `Error: ...` record with no latency when a session fails.
    pub record_failures: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("data/images"),
            questions_path: PathBuf::from("data/questions.txt"),
            output_path: PathBuf::from("test_results.csv"),
            mode: TurnMode::Single,
            pairing: Pairing::Zip,
            system_instruction: None,
            generation: GenerationConfig::default(),
            models: Vec::new(),
            providers: ProviderSettings::default(),
            record_failures: false,
        }
    }
}

impl EvalConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> EvalConfigBuilder {
        EvalConfigBuilder::default()
    }

    /// Load a TOML config file. Relative paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base)
    }

    /// Parse a TOML config, resolving relative paths against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        file.into_config(base_dir)
    }

    /// Check that the run can start.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::Config("no models configured".to_string()));
        }
        Ok(())
    }
}

/// On-disk shape of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    images_dir: Option<PathBuf>,
    questions: Option<PathBuf>,
    output: Option<PathBuf>,
    mode: Option<TurnMode>,
    pairing: Option<Pairing>,
    system_instruction: Option<String>,
    system_instruction_file: Option<PathBuf>,
    record_failures: Option<bool>,
    models: Vec<ModelSpec>,
    generation: Option<GenerationConfig>,
    providers: ProviderSettings,
}

impl ConfigFile {
    fn into_config(self, base_dir: &Path) -> Result<EvalConfig> {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base_dir.join(p) };

        let system_instruction = match (self.system_instruction, self.system_instruction_file) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "set either system_instruction or system_instruction_file, not both".to_string(),
                ));
            }
            (Some(text), None) => Some(text),
            (None, Some(file)) => {
                let file = resolve(file);
                let text = std::fs::read_to_string(&file)
                    .map_err(|e| Error::Config(format!("cannot read {}: {e}", file.display())))?;
                Some(text.trim().to_string())
            }
            (None, None) => None,
        };

        let defaults = EvalConfig::default();
        Ok(EvalConfig {
            images_dir: self.images_dir.map(resolve).unwrap_or(defaults.images_dir),
            questions_path: self.questions.map(resolve).unwrap_or(defaults.questions_path),
            output_path: self.output.map(resolve).unwrap_or(defaults.output_path),
            mode: self.mode.unwrap_or(defaults.mode),
            pairing: self.pairing.unwrap_or(defaults.pairing),
            system_instruction,
            generation: self.generation.unwrap_or_default(),
            models: self.models,
            providers: self.providers,
            record_failures: self.record_failures.unwrap_or(false),
        })
    }
}

/// Builder for [`EvalConfig`].
#[derive(Debug, Default)]
pub struct EvalConfigBuilder {
    config: EvalConfig,
}

impl EvalConfigBuilder {
    /// Start from an existing configuration (e.g. one loaded from a file).
    #[must_use]
    pub fn from_config(config: EvalConfig) -> Self {
        Self { config }
    }

    /// Set the image directory.
    #[must_use]
    pub fn images_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.images_dir = path.into();
        self
    }

    /// Set the questions file.
    #[must_use]
    pub fn questions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.questions_path = path.into();
        self
    }

    /// Set the results table path.
    #[must_use]
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    /// Set the turn mode.
    #[must_use]
    pub fn mode(mut self, mode: TurnMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the image/question pairing.
    #[must_use]
    pub fn pairing(mut self, pairing: Pairing) -> Self {
        self.config.pairing = pairing;
        self
    }

    /// Set the system instruction.
    #[must_use]
    pub fn system_instruction(mut self, text: impl Into<String>) -> Self {
        self.config.system_instruction = Some(text.into());
        self
    }

    /// Set the sampling parameters.
    #[must_use]
    pub fn generation(mut self, generation: GenerationConfig) -> Self {
        self.config.generation = generation;
        self
    }

    /// Add a model to evaluate.
    #[must_use]
    pub fn model(mut self, spec: ModelSpec) -> Self {
        self.config.models.push(spec);
        self
    }

    /// Set the provider settings.
    #[must_use]
    pub fn providers(mut self, providers: ProviderSettings) -> Self {
        self.config.providers = providers;
        self
    }

    /// Record failed sessions as `Error: ...` rows.
    #[must_use]
    pub fn record_failures(mut self, enabled: bool) -> Self {
        self.config.record_failures = enabled;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> EvalConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_spec_parse() {
        let spec: ModelSpec = "ollama:llama3.2-vision:90b".parse().unwrap();
        assert_eq!(spec.provider, Provider::Ollama);
        assert_eq!(spec.model, "llama3.2-vision:90b");
        assert_eq!(spec.to_string(), "ollama:llama3.2-vision:90b");

        assert!("gemini-pro-vision".parse::<ModelSpec>().is_err());
        assert!("ollama:".parse::<ModelSpec>().is_err());
        assert!("bard:x".parse::<ModelSpec>().is_err());
    }

    #[test]
    fn test_eval_config_builder() {
        let config = EvalConfig::builder()
            .images_dir("/tmp/images")
            .mode(TurnMode::MultiTurn)
            .pairing(Pairing::Cross)
            .model("dry-run:echo".parse().unwrap())
            .generation(GenerationConfig::gemini_default())
            .build();

        assert_eq!(config.images_dir, PathBuf::from("/tmp/images"));
        assert_eq!(config.questions_path, PathBuf::from("data/questions.txt"));
        assert_eq!(config.mode, TurnMode::MultiTurn);
        assert_eq!(config.generation.top_k, Some(32));
        assert!(config.validate().is_ok());
        assert!(EvalConfig::default().validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("system.txt"), "You manage business cards.\n").unwrap();

        let toml = r#"
            images_dir = "cards"
            mode = "multi-turn"
            system_instruction_file = "system.txt"
            models = ["vertex:gemini-pro-vision", "ollama:llama3.2-vision"]

            [generation]
            temperature = 0.2
            top_k = 32

            [providers]
            timeout_secs = 30

            [providers.vertex]
            project = "demo"
            location = "us-central1"
        "#;
        let config = EvalConfig::from_toml_str(toml, dir.path()).unwrap();

        assert_eq!(config.images_dir, dir.path().join("cards"));
        assert_eq!(config.mode, TurnMode::MultiTurn);
        assert_eq!(config.system_instruction.as_deref(), Some("You manage business cards."));
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].provider, Provider::Vertex);
        assert_eq!(config.providers.timeout(), Duration::from_secs(30));
        assert_eq!(config.providers.vertex.location.as_deref(), Some("us-central1"));
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = EvalConfig::from_toml_str("imgs = \"x\"", Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_apply_env() {
        let mut providers = ProviderSettings::default();
        providers.ollama.host = Some("http://gpu-box:11434".to_string());
        providers.apply_env_from(|key| match key {
            "GOOGLE_API_KEY" => Some("secret".to_string()),
            "HOST_URL" => Some("http://other:11434".to_string()),
            "VERTEX_PROJECT" => Some("demo".to_string()),
            _ => None,
        });

        assert_eq!(providers.google_api_key.as_deref(), Some("secret"));
        // File value wins over the environment for non-secrets
        assert_eq!(providers.ollama.host.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(providers.vertex.project.as_deref(), Some("demo"));
        assert_eq!(providers.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }
}
