// Failures reported by the external collaborators of a voice session.

use thiserror::Error;

/// Collaborator errors. All of them are recoverable: the session degrades
/// (fallback text, `Unrecognized`, empty suggestions) instead of aborting.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Voice recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("Intent extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Translation failed: {0}")]
    TranslationFailed(String),

    #[error("Mirror write failed: {0}")]
    MirrorWriteFailed(String),

    #[error("Recommendation failed: {0}")]
    RecommendationFailed(String),
}
