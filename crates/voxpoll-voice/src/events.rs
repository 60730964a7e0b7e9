//! Realtime protocol event vocabulary.
//!
//! Client events are what the controller sends; server events are the subset
//! of upstream events the controller reacts to. Anything else deserializes to
//! [`ServerEvent::Unknown`] and is ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseRequest },

    #[serde(rename = "response.cancel")]
    ResponseCancel,

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

impl ClientEvent {
    /// `response.create` with audio and text output in `voice`.
    pub fn response(voice: &str, instructions: Option<String>) -> Self {
        Self::ResponseCreate {
            response: ResponseRequest {
                output_modalities: vec!["audio".into(), "text".into()],
                audio: AudioOutput::voice(voice),
                instructions,
            },
        }
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::message("user", "input_text", text),
        }
    }

    pub fn assistant_message(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::message("assistant", "output_text", text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub output_modalities: Vec<String>,
    pub audio: SessionAudio,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl SessionUpdate {
    pub fn new(voice: &str, transcription_model: &str, language: &str) -> Self {
        Self {
            kind: "realtime".into(),
            output_modalities: vec!["audio".into(), "text".into()],
            audio: SessionAudio {
                input: AudioInput {
                    transcription: Transcription {
                        model: transcription_model.into(),
                        language: language.into(),
                    },
                },
                output: AudioOutput::voice(voice).output,
            },
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAudio {
    pub input: AudioInput,
    pub output: VoiceSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioInput {
    pub transcription: Transcription,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcription {
    pub model: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioOutput {
    pub output: VoiceSelection,
}

impl AudioOutput {
    fn voice(voice: &str) -> Self {
        Self {
            output: VoiceSelection {
                voice: voice.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSelection {
    pub voice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRequest {
    pub output_modalities: Vec<String>,
    pub audio: AudioOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    fn message(role: &str, part: &str, text: impl Into<String>) -> Self {
        Self {
            kind: "message".into(),
            role: role.into(),
            content: vec![ContentPart {
                kind: part.into(),
                text: text.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta {
        #[serde(default)]
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// End of the user's turn as detected by server VAD.
    #[serde(
        rename = "input_audio_buffer.speech_final",
        alias = "input_audio_buffer.speech_stopped"
    )]
    SpeechFinal,

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: String,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.output_audio_transcript.delta")]
    OutputAudioTranscriptDelta {
        #[serde(default)]
        delta: String,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.output_audio_transcript.done")]
    OutputAudioTranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioStarted,

    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioStopped,

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_create_shape() {
        let event = ClientEvent::response("marin", Some("짧게".into()));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "response.create",
                "response": {
                    "output_modalities": ["audio", "text"],
                    "audio": {"output": {"voice": "marin"}},
                    "instructions": "짧게"
                }
            })
        );

        let bare = serde_json::to_value(ClientEvent::response("marin", None)).unwrap();
        assert!(bare["response"].get("instructions").is_none());
    }

    #[test]
    fn session_update_carries_transcription_settings() {
        let event = ClientEvent::SessionUpdate {
            session: SessionUpdate::new("marin", "whisper-1", "ko"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["audio"]["input"]["transcription"]["model"], "whisper-1");
        assert_eq!(value["session"]["audio"]["input"]["transcription"]["language"], "ko");
        assert_eq!(value["session"]["audio"]["output"]["voice"], "marin");
        assert!(value["session"].get("instructions").is_none());
    }

    #[test]
    fn user_message_uses_input_text() {
        let value = serde_json::to_value(ClientEvent::user_message("안녕")).unwrap();
        assert_eq!(value["item"]["role"], "user");
        assert_eq!(value["item"]["content"][0]["type"], "input_text");
        assert_eq!(value["item"]["content"][0]["text"], "안녕");
    }

    #[test]
    fn server_events_parse() {
        let delta: ServerEvent = serde_json::from_value(json!({
            "type": "conversation.item.input_audio_transcription.delta",
            "delta": "안",
            "item_id": "item_1",
            "event_id": "ev_1"
        }))
        .unwrap();
        assert_eq!(
            delta,
            ServerEvent::TranscriptionDelta {
                delta: "안".into(),
                item_id: Some("item_1".into())
            }
        );

        let stopped: ServerEvent =
            serde_json::from_value(json!({"type": "input_audio_buffer.speech_stopped"})).unwrap();
        assert_eq!(stopped, ServerEvent::SpeechFinal);

        let unknown: ServerEvent =
            serde_json::from_value(json!({"type": "rate_limits.updated", "rate_limits": []}))
                .unwrap();
        assert_eq!(unknown, ServerEvent::Unknown);

        let error: ServerEvent = serde_json::from_value(json!({
            "type": "error",
            "error": {"message": "bad", "code": "invalid_value", "type": "invalid_request_error"}
        }))
        .unwrap();
        match error {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "bad");
                assert_eq!(error.code.as_deref(), Some("invalid_value"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
