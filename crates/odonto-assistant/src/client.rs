//! Assistant backends.

use std::sync::Mutex;

use thiserror::Error;

/// Assistant errors.
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Model returned no usable candidate")]
    EmptyResponse,

    #[error("Assistant is not configured: {0}")]
    NotConfigured(String),
}

pub type AssistantResult<T> = Result<T, AssistantError>;

/// Shown when the call itself failed.
pub const REPLY_ON_FAILURE: &str =
    "Lo siento, ocurrió un error al procesar tu mensaje. Por favor, intenta nuevamente.";
/// Shown when the API rejected the request.
pub const REPLY_ON_API_ERROR: &str =
    "Error al comunicarse con el servicio de IA. Por favor, verifica tu API key.";
/// Shown when the model answered with nothing.
pub const REPLY_ON_EMPTY: &str =
    "Lo siento, no pude generar una respuesta válida para esa consulta.";
/// Shown when the response body could not be read.
pub const REPLY_ON_PARSE_ERROR: &str = "Error al procesar la respuesta.";

/// Text a patient sees in place of a model answer.
pub fn fallback_reply(error: &AssistantError) -> &'static str {
    match error {
        AssistantError::Json(_) => REPLY_ON_PARSE_ERROR,
        AssistantError::Api(_) | AssistantError::NotConfigured(_) => REPLY_ON_API_ERROR,
        AssistantError::EmptyResponse => REPLY_ON_EMPTY,
        AssistantError::Http(_) => REPLY_ON_FAILURE,
    }
}

/// A text generation backend.
pub trait Assistant: Send + Sync {
    /// Generate a reply for a fully assembled prompt.
    fn generate(&self, prompt: &str) -> AssistantResult<String>;
}

/// Backend used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

impl Assistant for Unconfigured {
    fn generate(&self, _prompt: &str) -> AssistantResult<String> {
        Err(AssistantError::NotConfigured("missing API key".into()))
    }
}

/// Mock backend for tests. Records every prompt it receives.
pub struct MockAssistant {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockAssistant {
    /// Always answer with `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with an HTTP error.
    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl Assistant for MockAssistant {
    fn generate(&self, prompt: &str) -> AssistantResult<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.reply
            .clone()
            .ok_or_else(|| AssistantError::Http("connection refused".into()))
    }
}

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Connection settings for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub generation: crate::gemini::GenerationConfig,
}

impl GeminiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: 30,
            generation: crate::gemini::GenerationConfig::default(),
        }
    }

    /// Endpoint URL without the key query parameter.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Blocking Gemini client.
#[cfg(feature = "gemini")]
pub struct GeminiClient {
    http: reqwest::blocking::Client,
    settings: GeminiSettings,
}

#[cfg(feature = "gemini")]
impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> AssistantResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AssistantError::Http(e.to_string()))?;
        Ok(Self { http, settings })
    }
}

#[cfg(feature = "gemini")]
impl Assistant for GeminiClient {
    fn generate(&self, prompt: &str) -> AssistantResult<String> {
        let request =
            crate::gemini::GenerateContentRequest::from_prompt(prompt, self.settings.generation);

        tracing::info!(model = %self.settings.model, "calling Gemini generateContent");

        let response = self
            .http
            .post(self.settings.endpoint())
            .query(&[("key", self.settings.api_key.as_str())])
            .json(&request)
            .send()
            .map_err(|e| AssistantError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| AssistantError::Http(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(%status, body = %body, "Gemini API returned an error status");
            return Err(AssistantError::Api(format!("status {}", status)));
        }

        crate::gemini::extract_reply(&body)
    }
}
