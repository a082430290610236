// Gemini streaming client using reqwest-eventsource.
//
// Calls `models/{model}:streamGenerateContent?alt=sse` and accumulates the
// text parts of every streamed candidate chunk into one response string.

use anyhow::{anyhow, bail};
use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::Value;
use tracing::{debug, warn};

use voicecart_core::config::{Config, DEFAULT_GEMINI_API_BASE};

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

/// Low-level Gemini API streaming client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    /// Create a new client with the given API key and model identifier.
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            api_key,
            model,
        }
    }

    /// Point the client at a different API base (proxies, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.api_base.trim_end_matches('/'),
            self.model
        )
    }

    /// Send a single-turn prompt and return the full generated text.
    ///
    /// Returns an error on transport failure, a non-success status, a blocked
    /// prompt, or a stream that produced no text.
    pub async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        if self.api_key.is_empty() {
            bail!("API key not configured");
        }

        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let request = self
            .http
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        let mut es = request
            .eventsource()
            .map_err(|e| anyhow!("Failed to create event source: {e}"))?;

        let mut full_text = String::new();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("SSE connection opened");
                }
                Ok(Event::Message(msg)) => {
                    if let Some(reason) = parse_block_reason(&msg.data) {
                        es.close();
                        bail!("Prompt blocked: {reason}");
                    }
                    if let Some(text) = parse_chunk_text(&msg.data) {
                        full_text.push_str(&text);
                    }
                    if let Some(reason) = parse_finish_reason(&msg.data) {
                        debug!(reason, "streaming complete");
                        es.close();
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    es.close();
                    break;
                }
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    es.close();
                    bail!(extract_error_message(&err));
                }
            }
        }

        if full_text.trim().is_empty() {
            bail!("Stream ended without any content");
        }
        Ok(full_text)
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that can be either an active Gemini client or disabled.
pub enum LlmClient {
    /// Gemini API is configured and ready.
    Active(GeminiClient),
    /// LLM functionality is disabled (no API key configured).
    Disabled,
}

impl LlmClient {
    /// Build an `LlmClient` from the application config.
    ///
    /// Returns `Active` if an API key is present in credentials, otherwise
    /// returns `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.gemini_api_key {
            Some(key) if !key.is_empty() => LlmClient::Active(
                GeminiClient::new(key.clone(), config.llm.model.clone())
                    .with_api_base(config.llm.api_base.clone()),
            ),
            _ => LlmClient::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }

    /// Generate text, delegating to the inner `GeminiClient` or failing
    /// immediately if disabled.
    pub async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        match self {
            LlmClient::Active(client) => client.generate(prompt).await,
            LlmClient::Disabled => bail!("LLM not configured"),
        }
    }
}

// ---------------------------------------------------------------------------
// SSE JSON parsing helpers
// ---------------------------------------------------------------------------

/// Concatenate `candidates[0].content.parts[*].text` from one streamed chunk.
///
/// Expected shape:
/// `{ "candidates": [{ "content": { "parts": [{ "text": "..." }] } }] }`
pub(crate) fn parse_chunk_text(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    let parts = v
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Some(text)
}

/// Extract `candidates[0].finishReason`, present on the final chunk.
pub(crate) fn parse_finish_reason(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("candidates")?
        .get(0)?
        .get("finishReason")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract `promptFeedback.blockReason` from a chunk.
pub(crate) fn parse_block_reason(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("promptFeedback")?
        .get("blockReason")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract a human-readable error message from an SSE error.
fn extract_error_message(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            format!("API returned status {status}")
        }
        reqwest_eventsource::Error::InvalidContentType(_, _response) => {
            "API returned a non-streaming response".to_string()
        }
        reqwest_eventsource::Error::Transport(e) => {
            format!("Network error: {e}")
        }
        other => format!("Stream error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
