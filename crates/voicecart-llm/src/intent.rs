// Intent extraction backed by the Gemini client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use voicecart_core::error::VoiceError;
use voicecart_core::services::IntentExtractor;
use voicecart_core::shopping::command::NOT_A_SHOPPING_COMMAND;
use voicecart_core::shopping::ParsedCommand;

use crate::client::LlmClient;
use crate::prompt::build_intent_prompt;

pub struct GeminiIntentExtractor {
    client: Arc<LlmClient>,
}

impl GeminiIntentExtractor {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntentExtractor for GeminiIntentExtractor {
    async fn extract(&self, text: &str) -> Result<ParsedCommand, VoiceError> {
        let raw = self
            .client
            .generate(&build_intent_prompt(text))
            .await
            .map_err(|e| VoiceError::ExtractionFailed(e.to_string()))?;
        debug!("Intent response: {}", raw.trim());
        parse_intent_response(&raw)
    }
}

/// Strip markdown code fences the model sometimes wraps JSON in.
pub fn clean_json_response(text: &str) -> String {
    let trimmed = text.trim();
    let without_open = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("```json") => &trimmed[7..],
        _ => trimmed,
    };
    without_open.replace("```", "").trim().to_string()
}

/// Turn raw model output into a validated command.
///
/// The literal non-shopping answer (with or without quotes or the trailing
/// period) maps to `Unrecognized`. Anything that is not JSON is an
/// `ExtractionFailed` error.
pub fn parse_intent_response(raw: &str) -> Result<ParsedCommand, VoiceError> {
    let cleaned = clean_json_response(raw);
    if is_not_a_shopping_command(&cleaned) {
        return Ok(ParsedCommand::Unrecognized);
    }

    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(e) => embedded_object(&cleaned)
            .ok_or_else(|| VoiceError::ExtractionFailed(format!("invalid intent JSON: {e}")))?,
    };
    Ok(ParsedCommand::from_intent_value(&value))
}

fn is_not_a_shopping_command(text: &str) -> bool {
    let bare = text.trim().trim_matches('"').trim().trim_end_matches('.');
    bare.eq_ignore_ascii_case(NOT_A_SHOPPING_COMMAND.trim_end_matches('.'))
}

/// Last-chance parse of the outermost `{...}` when the model added prose.
fn embedded_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
