use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("realtime connect failed: {0}")]
    Connect(String),

    #[error("realtime transport error: {0}")]
    Transport(String),

    #[error("realtime session is closed")]
    Closed,

    #[error("microphone unavailable: {0}")]
    Microphone(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
