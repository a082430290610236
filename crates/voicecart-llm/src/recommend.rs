// Recommendation generation from the add-history.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use voicecart_core::error::VoiceError;
use voicecart_core::services::RecommendationService;
use voicecart_core::shopping::HistoryRecord;

use crate::client::LlmClient;
use crate::intent::clean_json_response;
use crate::prompt::build_recommendation_prompt;

/// Number of suggestions asked for when not configured otherwise.
pub const DEFAULT_SUGGESTIONS: usize = 5;

/// Assembles the recommendation prompt from the full add-history (never the
/// current list).
#[derive(Debug, Clone)]
pub struct RecommendationRequestBuilder<'a> {
    history: &'a [HistoryRecord],
    max_suggestions: usize,
}

impl<'a> RecommendationRequestBuilder<'a> {
    pub fn new(history: &'a [HistoryRecord]) -> Self {
        Self {
            history,
            max_suggestions: DEFAULT_SUGGESTIONS,
        }
    }

    pub fn max_suggestions(mut self, n: usize) -> Self {
        self.max_suggestions = n.max(1);
        self
    }

    pub fn build(&self) -> String {
        build_recommendation_prompt(self.history, self.max_suggestions)
    }
}

pub struct GeminiRecommender {
    client: Arc<LlmClient>,
    max_suggestions: usize,
}

impl GeminiRecommender {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self {
            client,
            max_suggestions: DEFAULT_SUGGESTIONS,
        }
    }

    pub fn with_max_suggestions(mut self, n: usize) -> Self {
        self.max_suggestions = n;
        self
    }
}

#[async_trait]
impl RecommendationService for GeminiRecommender {
    /// Suggestions as returned by the model. A response that is not a JSON
    /// array yields an empty list rather than an error.
    async fn recommend(&self, history: &[HistoryRecord]) -> Result<Vec<String>, VoiceError> {
        let prompt = RecommendationRequestBuilder::new(history)
            .max_suggestions(self.max_suggestions)
            .build();
        let raw = self
            .client
            .generate(&prompt)
            .await
            .map_err(|e| VoiceError::RecommendationFailed(e.to_string()))?;

        match parse_recommendations(&raw) {
            Some(items) => {
                debug!("Received {} recommendations", items.len());
                Ok(items)
            }
            None => {
                warn!("Malformed recommendation response, using none");
                Ok(Vec::new())
            }
        }
    }
}

/// Parse a JSON array of strings, dropping non-string elements.
/// Returns `None` when no array can be found.
pub fn parse_recommendations(raw: &str) -> Option<Vec<String>> {
    let cleaned = clean_json_response(raw);
    let value: Value = serde_json::from_str(&cleaned).ok().or_else(|| {
        let start = cleaned.find('[')?;
        let end = cleaned.rfind(']')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&cleaned[start..=end]).ok()
    })?;
    let items = value
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    Some(items)
}
