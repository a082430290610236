// Language-model and translation collaborators.

use async_trait::async_trait;

use crate::error::VoiceError;
use crate::shopping::{HistoryRecord, ParsedCommand};

/// Turns English free text into a validated command.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ParsedCommand, VoiceError>;
}

/// Suggests items from the add-history.
#[async_trait]
pub trait RecommendationService: Send + Sync {
    async fn recommend(&self, history: &[HistoryRecord]) -> Result<Vec<String>, VoiceError>;
}

/// Translates between language tags (e.g. "hi" -> "en").
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, VoiceError>;
}

// ---------------------------------------------------------------------------
// Language tags
// ---------------------------------------------------------------------------

/// Primary subtag of a BCP-47 style tag, lowercased ("hi-IN" -> "hi").
/// Missing or blank tags are treated as English.
pub fn primary_language(tag: Option<&str>) -> String {
    tag.map(str::trim)
        .and_then(|t| t.split(['-', '_']).next())
        .filter(|t| !t.is_empty())
        .map_or_else(|| "en".to_string(), str::to_lowercase)
}

/// Whether text in `tag` must be translated before intent extraction.
pub fn needs_translation(tag: Option<&str>) -> bool {
    primary_language(tag) != "en"
}
