// HTTP translator against a Google-Translate-compatible `gtx` endpoint.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use voicecart_core::config::Config;
use voicecart_core::error::VoiceError;
use voicecart_core::services::{primary_language, Translator};

pub struct HttpTranslator {
    http: reqwest::Client,
    api_base: String,
}

impl HttpTranslator {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    /// `Some` only when translation is enabled in the config.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .translation
            .enabled
            .then(|| Self::new(config.translation.api_base.clone()))
    }

    fn endpoint(&self) -> String {
        format!("{}/translate_a/single", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, VoiceError> {
        let from = primary_language(Some(from));
        let to = primary_language(Some(to));
        if from == to || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let response = self
            .http
            .get(self.endpoint())
            .query(&[
                ("client", "gtx"),
                ("sl", from.as_str()),
                ("tl", to.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| VoiceError::TranslationFailed(format!("Network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::TranslationFailed(format!(
                "API returned status {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| VoiceError::TranslationFailed(format!("invalid response body: {e}")))?;

        let translated = parse_gtx_response(&body).ok_or_else(|| {
            VoiceError::TranslationFailed("response contained no translated segments".into())
        })?;
        debug!("Translated {from}->{to}: {translated}");
        Ok(translated)
    }
}

/// Join the translated segments of a `gtx` response.
///
/// Expected shape: `[[["translated", "original", ...], ...], null, "hi", ...]`
pub(crate) fn parse_gtx_response(body: &Value) -> Option<String> {
    let segments = body.get(0)?.as_array()?;
    let text: String = segments
        .iter()
        .filter_map(|seg| seg.get(0).and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
