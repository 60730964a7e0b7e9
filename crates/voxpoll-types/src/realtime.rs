//! Realtime-session types shared by the client controller and the server.

use serde::{Deserialize, Serialize};

/// Speech-to-speech models a realtime token may be issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RealtimeModel {
    #[serde(rename = "gpt-realtime")]
    GptRealtime,
    #[serde(rename = "gpt-realtime-mini")]
    GptRealtimeMini,
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl RealtimeModel {
    /// The allow-list, in display order.
    pub const ALL: [RealtimeModel; 4] = [
        Self::GptRealtime,
        Self::GptRealtimeMini,
        Self::Gpt4oRealtimePreview,
        Self::Gpt4oMiniRealtimePreview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GptRealtime => "gpt-realtime",
            Self::GptRealtimeMini => "gpt-realtime-mini",
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Parses an allow-listed model id.
    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == id)
    }

    /// Environment variable that may remap this id to a concrete upstream
    /// model name.
    pub fn env_key(self) -> &'static str {
        match self {
            Self::GptRealtime => "OPENAI_REALTIME_MODEL_GPT_REALTIME",
            Self::GptRealtimeMini => "OPENAI_REALTIME_MODEL_GPT_REALTIME_MINI",
            Self::Gpt4oRealtimePreview => "OPENAI_REALTIME_MODEL_GPT_4O_REALTIME_PREVIEW",
            Self::Gpt4oMiniRealtimePreview => {
                "OPENAI_REALTIME_MODEL_GPT_4O_MINI_REALTIME_PREVIEW"
            }
        }
    }
}

impl std::fmt::Display for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heuristic hesitation/fatigue signals attached to every transcript event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParalinguisticReading {
    /// Gap before this utterance, clamped.
    pub silence_ms_before: u64,
    /// Length-derived duration estimate, clamped.
    pub utterance_ms: u64,
    pub hesitation: bool,
    #[serde(default)]
    pub filler: Option<Vec<String>>,
    /// Reserved; always `None` from the built-in estimator.
    #[serde(default)]
    pub fatigue_score: Option<f64>,
}
