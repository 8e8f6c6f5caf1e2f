//! HTTP clients for the generative and embedding model endpoints.
//!
//! Both clients speak JSON over a blocking `ureq` agent. Every failure mode (transport, non-2xx
//! status, unexpected envelope, empty content) surfaces as `PipelineError::Inference`. Calls are
//! never retried here.

use std::time::Duration;

use exam_rag_core::{DecodingConfig, Embedder, Embedding, PipelineError, TextGenerator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationEndpoint {
    pub url: String,
    pub model: String,
    /// Name of the environment variable holding a bearer token, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingEndpoint {
    pub url: String,
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_dimensions() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}

#[derive(Debug, Clone)]
pub struct HttpTextGenerator {
    agent: ureq::Agent,
    url: String,
    model: String,
    bearer: Option<String>,
}

impl HttpTextGenerator {
    /// # Errors
    /// Returns `PipelineError::Configuration` when the URL is blank or the configured API key
    /// variable is unset.
    pub fn new(endpoint: &GenerationEndpoint) -> Result<Self, PipelineError> {
        Ok(Self {
            agent: build_agent(endpoint.timeout_secs),
            url: require_url(&endpoint.url, "generation")?,
            model: endpoint.model.clone(),
            bearer: resolve_bearer(endpoint.api_key_env.as_deref())?,
        })
    }
}

impl TextGenerator for HttpTextGenerator {
    fn generate(&self, prompt: &str, config: DecodingConfig) -> Result<String, PipelineError> {
        let body = generation_request_body(&self.model, prompt, config);
        tracing::debug!(
            model = %self.model,
            temperature = config.temperature,
            max_output_tokens = config.max_output_tokens,
            prompt_chars = prompt.chars().count(),
            "invoking generative model"
        );
        let response = post_json(&self.agent, &self.url, self.bearer.as_deref(), &body)?;
        parse_generation_response(&response)
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    agent: ureq::Agent,
    url: String,
    model: String,
    dimensions: usize,
    bearer: Option<String>,
}

impl HttpEmbedder {
    /// # Errors
    /// Returns `PipelineError::Configuration` when the URL is blank, the dimension is zero, or the
    /// configured API key variable is unset.
    pub fn new(endpoint: &EmbeddingEndpoint) -> Result<Self, PipelineError> {
        if endpoint.dimensions == 0 {
            return Err(PipelineError::Configuration(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            agent: build_agent(endpoint.timeout_secs),
            url: require_url(&endpoint.url, "embedding")?,
            model: endpoint.model.clone(),
            dimensions: endpoint.dimensions,
            bearer: resolve_bearer(endpoint.api_key_env.as_deref())?,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Embedding, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::Inference("embedding input text is empty".to_string()));
        }
        let body = json!({
            "modelId": self.model,
            "inputText": text,
            "dimensions": self.dimensions,
            "normalize": true,
        });
        tracing::debug!(model = %self.model, dimensions = self.dimensions, "invoking embedding model");
        let response = post_json(&self.agent, &self.url, self.bearer.as_deref(), &body)?;
        parse_embedding_response(&response, self.dimensions)
    }
}

/// Conversation-style request envelope: one user turn plus the decoding configuration.
#[must_use]
pub fn generation_request_body(model: &str, prompt: &str, config: DecodingConfig) -> Value {
    json!({
        "modelId": model,
        "messages": [
            {"role": "user", "content": [{"text": prompt}]}
        ],
        "inferenceConfig": {
            "temperature": config.temperature,
            "maxTokens": config.max_output_tokens,
        }
    })
}

/// Extract `output.message.content[0].text`.
///
/// # Errors
/// Returns `PipelineError::Inference` when the envelope shape is unexpected or the text is blank.
pub fn parse_generation_response(response: &Value) -> Result<String, PipelineError> {
    let content = response
        .pointer("/output/message/content")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PipelineError::Inference(
                "unexpected model response format: missing output.message.content".to_string(),
            )
        })?;
    let text = content
        .first()
        .ok_or_else(|| PipelineError::Inference("model returned empty content".to_string()))?
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            PipelineError::Inference("model content block has no text field".to_string())
        })?;

    if text.trim().is_empty() {
        return Err(PipelineError::Inference("model returned blank text".to_string()));
    }
    Ok(text.to_string())
}

/// # Errors
/// Returns `PipelineError::Inference` when the vector is absent, empty, non-numeric, non-finite,
/// or of the wrong dimension.
pub fn parse_embedding_response(
    response: &Value,
    expected_dimensions: usize,
) -> Result<Embedding, PipelineError> {
    let raw = response.get("embedding").and_then(Value::as_array).ok_or_else(|| {
        PipelineError::Inference("embedding response has no `embedding` array".to_string())
    })?;

    #[allow(clippy::cast_possible_truncation)]
    let values = raw
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            PipelineError::Inference("embedding contains non-numeric components".to_string())
        })?;

    if values.len() != expected_dimensions {
        return Err(PipelineError::Inference(format!(
            "embedding has {} dimensions, expected {expected_dimensions}",
            values.len()
        )));
    }
    Embedding::new(values).map_err(|err| PipelineError::Inference(err.message().to_string()))
}

fn build_agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(Duration::from_secs(timeout_secs.max(1))).build()
}

fn require_url(url: &str, purpose: &str) -> Result<String, PipelineError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PipelineError::Configuration(format!("{purpose} endpoint url is empty")));
    }
    Ok(url.to_string())
}

fn resolve_bearer(api_key_env: Option<&str>) -> Result<Option<String>, PipelineError> {
    let Some(name) = api_key_env.map(str::trim).filter(|name| !name.is_empty()) else {
        return Ok(None);
    };
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
        _ => Err(PipelineError::Configuration(format!(
            "environment variable {name} must hold the endpoint API key"
        ))),
    }
}

fn post_json(
    agent: &ureq::Agent,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<Value, PipelineError> {
    let mut request = agent.post(url).set("Accept", "application/json");
    if let Some(token) = bearer {
        request = request.set("Authorization", &format!("Bearer {token}"));
    }

    match request.send_json(body) {
        Ok(response) => response.into_json::<Value>().map_err(|err| {
            PipelineError::Inference(format!("model endpoint returned invalid JSON: {err}"))
        }),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            let preview = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect::<String>();
            tracing::warn!(status, url, "model endpoint returned an error status");
            Err(PipelineError::Inference(format!(
                "model endpoint returned HTTP {status}: {preview}"
            )))
        }
        Err(ureq::Error::Transport(transport)) => Err(PipelineError::Inference(format!(
            "model endpoint transport failure: {transport}"
        ))),
    }
}
