use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use voxpoll_types::RealtimeModel;

/// Output voice used when none is configured.
pub const DEFAULT_VOICE: &str = "marin";

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_language() -> String {
    "ko".to_string()
}

fn default_greeting_delay_ms() -> u64 {
    200
}

fn default_response_debounce_ms() -> u64 {
    500
}

fn default_event_capacity() -> usize {
    256
}

/// Settings for one [`crate::RealtimeSessionController`].
#[derive(Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Model requested from the token endpoint. `None` lets the server pick.
    #[serde(default)]
    pub model: Option<RealtimeModel>,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Input transcription model announced in `session.update`.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Session instructions passed to the transport on connect.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Sent as a user message right after connect to make the assistant
    /// open the conversation.
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default = "default_greeting_delay_ms")]
    pub greeting_delay_ms: u64,
    #[serde(default = "default_response_debounce_ms")]
    pub response_debounce_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            model: None,
            voice: default_voice(),
            transcription_model: default_transcription_model(),
            language: default_language(),
            instructions: None,
            greeting: None,
            greeting_delay_ms: default_greeting_delay_ms(),
            response_debounce_ms: default_response_debounce_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RealtimeConfig {
    pub fn greeting_delay(&self) -> Duration {
        Duration::from_millis(self.greeting_delay_ms)
    }

    pub fn response_debounce(&self) -> Duration {
        Duration::from_millis(self.response_debounce_ms)
    }
}

// Instructions can carry the whole survey definition; keep logs short.
impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("transcription_model", &self.transcription_model)
            .field("language", &self.language)
            .field(
                "instructions",
                &self.instructions.as_ref().map(|i| format!("<{} chars>", i.chars().count())),
            )
            .field("greeting", &self.greeting)
            .field("greeting_delay_ms", &self.greeting_delay_ms)
            .field("response_debounce_ms", &self.response_debounce_ms)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: RealtimeConfig = toml::from_str("").unwrap();
        assert_eq!(config.voice, "marin");
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.language, "ko");
        assert_eq!(config.greeting_delay(), Duration::from_millis(200));
        assert_eq!(config.response_debounce(), Duration::from_millis(500));
        assert!(config.model.is_none());
    }

    #[test]
    fn model_parses_from_allow_listed_id() {
        let config: RealtimeConfig =
            toml::from_str("model = \"gpt-realtime-mini\"\ngreeting = \"안녕하세요\"").unwrap();
        assert_eq!(config.model, Some(RealtimeModel::GptRealtimeMini));
        assert_eq!(config.greeting.as_deref(), Some("안녕하세요"));
    }

    #[test]
    fn debug_hides_instruction_text() {
        let config = RealtimeConfig {
            instructions: Some("secret survey script".into()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret survey script"));
        assert!(rendered.contains("<20 chars>"));
    }
}
