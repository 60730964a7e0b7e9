//! Realtime voice session plumbing for voxpoll.
//!
//! The client half drives a speech-to-speech session: [`TokenBroker`] fetches
//! an ephemeral credential from the voxpoll server, and
//! [`RealtimeSessionController`] owns the live connection (mute state,
//! turn-taking, greeting sequencing, assistant transcript channel locking and
//! the one-shot retry on session-description failures). Events surface on a
//! `tokio::sync::broadcast` channel as [`SessionEvent`]s.
//!
//! The server half is [`TokenIssuer`], which mints those ephemeral tokens
//! against the upstream realtime API.
//!
//! The wire transport sits behind [`TransportConnector`] /
//! [`RealtimeTransport`]. [`WsConnector`] is the bundled WebSocket
//! implementation; a WebRTC stack can be plugged in the same way.

pub mod config;
pub mod error;
pub mod events;
pub mod issuer;
pub mod mic;
pub mod paralinguistic;
pub mod session;
pub mod token;
pub mod transport;

pub use config::{RealtimeConfig, DEFAULT_VOICE};
pub use error::VoiceError;
pub use events::{ClientEvent, ServerEvent};
pub use issuer::{IssueError, IssuedToken, TokenIssuer};
pub use mic::{AudioStream, MicrophoneSource, SharedMicrophone};
pub use paralinguistic::estimate as estimate_paralinguistic;
pub use session::{
    AssistantChannel, ConnectOutcome, RealtimeSessionController, SessionEvent, SessionState,
    TranscriptEvent,
};
pub use token::{Token, TokenBroker, TokenFailure, TokenSource};
pub use transport::{RealtimeTransport, TransportConnector, TransportHandle, WsConnector};
