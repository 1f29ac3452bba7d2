//! Language-model port for structured JSON generation.
//!
//! The pipeline never parses free text from the model: every call requests
//! JSON output and the implementation is responsible for repairing the
//! usual model quirks (markdown fences, trailing commentary) before the
//! value reaches a stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{GenerationError, GenerationResult};

/// A structured-generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    /// System instructions
    pub system: Option<String>,

    /// User prompt
    pub prompt: String,

    /// Model name override; `None` uses the implementation default
    pub model: Option<String>,

    /// Sampling temperature (0.0 for deterministic stages)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    /// Create a deterministic (temperature 0) request.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            model: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    /// Set the system instructions.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Language-model port.
///
/// Implementations wrap a specific backend (Ollama, OpenAI-compatible
/// servers, ...) and return parsed JSON.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a structured JSON value for the request.
    async fn generate(&self, request: &GenerateRequest) -> GenerationResult<serde_json::Value>;
}

/// Primary/fallback model pair for classification stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRouting {
    /// Model used first
    pub primary: String,

    /// Model retried once when the primary errors
    pub fallback: Option<String>,
}

impl Default for ModelRouting {
    fn default() -> Self {
        Self {
            primary: "qwen3:latest".to_string(),
            fallback: Some("phi3:latest".to_string()),
        }
    }
}

/// Strip markdown code fences and locate the first JSON value in a model
/// response. Models wrap JSON in ```json fences or prepend commentary
/// often enough that strict parsing alone loses usable batches.
pub fn parse_model_json(raw: &str) -> GenerationResult<serde_json::Value> {
    let mut text = raw.trim();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }

    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped.trim_start();
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped.trim_start();
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped.trim_end();
    }

    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            // Fall back to the first bracketed region
            let object = extract_delimited(text, '{', '}');
            let array = extract_delimited(text, '[', ']');
            let candidate = match (object, array) {
                (Some(o), Some(a)) => {
                    // Prefer whichever starts earlier
                    if text.find('{').unwrap_or(usize::MAX) < text.find('[').unwrap_or(usize::MAX) {
                        Some(o)
                    } else {
                        Some(a)
                    }
                }
                (o, a) => o.or(a),
            };
            match candidate.and_then(|c| serde_json::from_str(c).ok()) {
                Some(value) => {
                    debug!("Recovered JSON value from noisy model output");
                    Ok(value)
                }
                None => Err(GenerationError::Unparseable {
                    reason: first_err.to_string(),
                }),
            }
        }
    }
}

fn extract_delimited(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Ollama-backed language model.
///
/// Talks to an Ollama-compatible `/api/generate` endpoint with
/// `format: "json"` and non-streaming responses.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    /// Create a generator against a base URL (e.g. `http://ollama:11434`).
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            default_model: default_model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl LanguageModel for OllamaGenerator {
    async fn generate(&self, request: &GenerateRequest) -> GenerationResult<serde_json::Value> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = OllamaRequest {
            model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let send = self.client.post(&url).json(&body).timeout(self.timeout).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result.map_err(|e| GenerationError::Backend(Box::new(e)))?,
            Err(_) => {
                return Err(GenerationError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                })
            }
        };

        if !response.status().is_success() {
            warn!("model backend returned status {}", response.status());
            return Err(GenerationError::Backend(Box::new(std::io::Error::other(
                format!("model backend error: {}", response.status()),
            ))));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(Box::new(e)))?;

        parse_model_json(&parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let value = parse_model_json(r#"{"queries": ["a", "b"]}"#).unwrap();
        assert_eq!(value["queries"][0], "a");
    }

    #[test]
    fn test_parse_fenced_json() {
        let value = parse_model_json("```json\n[\"x\", \"y\"]\n```").unwrap();
        assert_eq!(value[1], "y");
    }

    #[test]
    fn test_parse_noisy_output() {
        let value =
            parse_model_json("Here are the results: [\"one\", \"two\"] hope that helps").unwrap();
        assert_eq!(value[0], "one");
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(matches!(parse_model_json("   "), Err(GenerationError::Empty)));
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_model_json("no json here"),
            Err(GenerationError::Unparseable { .. })
        ));
    }

    #[test]
    fn test_request_builder() {
        let req = GenerateRequest::new("p")
            .with_system("s")
            .with_model("m")
            .with_temperature(0.5)
            .with_max_tokens(100);
        assert_eq!(req.temperature, 0.5);
        assert_eq!(req.model.as_deref(), Some("m"));
    }
}
