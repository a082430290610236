// JSON messages exchanged with the client over the WebSocket.

use serde::{Deserialize, Serialize};

use crate::shopping::{ListEntry, ListView, StatusLevel};

/// Inbound frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// A finished speech transcript. `lang` is the recognizer's language tag
    /// (e.g. "hi-IN"); absent means English.
    VoiceCommand {
        text: String,
        #[serde(default)]
        lang: Option<String>,
    },
    /// The client has no speech recognition capability.
    RecognitionUnavailable {
        #[serde(default)]
        reason: String,
    },
    RequestSnapshot,
    RequestRecommendations,
    ClearSearch,
}

/// Outbound frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Snapshot {
        items: Vec<ListEntry>,
        view: ListView,
    },
    Status {
        level: StatusLevel,
        message: String,
    },
    Recommendations {
        items: Vec<String>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
