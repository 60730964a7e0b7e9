//! The realtime session controller.
//!
//! One controller owns one live conversation. It is cheap to clone; every
//! clone drives the same session. Shared state sits behind a
//! `std::sync::Mutex` that is only ever held for synchronous bookkeeping:
//! anything that awaits (transport sends, token refresh) works on values
//! cloned out of the lock first.
//!
//! Inbound server events are applied by a single pump task per connection,
//! so transcript deltas are processed in arrival order. Outbound events go
//! through the [`RealtimeTransport`] handle.

use crate::config::RealtimeConfig;
use crate::error::VoiceError;
use crate::events::{ClientEvent, ServerEvent, SessionUpdate};
use crate::mic::SharedMicrophone;
use crate::paralinguistic;
use crate::token::{Token, TokenSource};
use crate::transport::{RealtimeTransport, TransportConnector, TransportHandle};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use voxpoll_types::ParalinguisticReading;

pub const PARTIAL_CONFIDENCE: f64 = 0.7;
pub const FINAL_CONFIDENCE: f64 = 0.85;

/// Gap assumed for partial readings; the real gap is only known at completion.
const PARTIAL_GAP_MS: u64 = 800;

/// Sent with the first response after the greeting so the assistant does not
/// introduce itself twice.
pub const NO_REPEAT_INTRO_INSTRUCTION: &str =
    "자기소개는 이미 한 번 했습니다. 바로 다음 질문으로 이어가고, 자기소개를 반복하지 마세요.";

const SESSION_DESCRIPTION_MARKERS: [&str; 3] = [
    "setRemoteDescription",
    "SessionDescription",
    "session description",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Listening,
    Processing,
    Speaking,
    /// The last attempt failed or the transport dropped. `connect` may be
    /// called again with a fresh token.
    Disconnected,
    /// Disposed. Terminal.
    Closed,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Listening | Self::Processing | Self::Speaking)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Another connect was already in flight; this call did nothing.
    Coalesced,
    AlreadyConnected,
}

/// Source of assistant text for the current response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantChannel {
    Text,
    AudioTranscript,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub confidence: f64,
    pub is_final: bool,
    pub reading: ParalinguisticReading,
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transcript(TranscriptEvent),
    AssistantText {
        text: String,
        is_final: bool,
        response_id: Option<String>,
        item_id: Option<String>,
    },
    BargeIn,
    Speaking,
    Listening,
    TransportError(String),
    Disconnected,
}

enum AssistantChunk {
    Delta(String),
    Done(Option<String>),
}

struct Live {
    state: SessionState,
    muted: bool,
    transport: Option<Arc<dyn RealtimeTransport>>,
    /// Bumped on every successful connect so a stale pump cannot touch a
    /// newer connection.
    generation: u64,
    partial: String,
    last_partial_at: Instant,
    assistant: String,
    assistant_channel: Option<AssistantChannel>,
    last_response_at: Option<Instant>,
    post_greeting: bool,
    pump: Option<JoinHandle<()>>,
    greeter: Option<JoinHandle<()>>,
}

impl Live {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            muted: true,
            transport: None,
            generation: 0,
            partial: String::new(),
            last_partial_at: Instant::now(),
            assistant: String::new(),
            assistant_channel: None,
            last_response_at: None,
            post_greeting: false,
            pump: None,
            greeter: None,
        }
    }

    fn connected_transport(&self) -> Option<Arc<dyn RealtimeTransport>> {
        if self.state.is_connected() {
            self.transport.clone()
        } else {
            None
        }
    }

    fn reset_turn_state(&mut self) {
        self.partial.clear();
        self.assistant.clear();
        self.assistant_channel = None;
        self.post_greeting = false;
    }
}

struct Inner {
    config: RealtimeConfig,
    connector: Arc<dyn TransportConnector>,
    tokens: Arc<dyn TokenSource>,
    microphone: Option<Arc<SharedMicrophone>>,
    live: Mutex<Live>,
    connect_in_flight: AtomicBool,
    connect_error_logged: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

/// Clears the in-flight flag when the connect attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct RealtimeSessionController {
    inner: Arc<Inner>,
}

impl fmt::Debug for RealtimeSessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSessionController")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl RealtimeSessionController {
    pub fn new(
        config: RealtimeConfig,
        connector: Arc<dyn TransportConnector>,
        tokens: Arc<dyn TokenSource>,
        microphone: Option<Arc<SharedMicrophone>>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                tokens,
                microphone,
                live: Mutex::new(Live::new()),
                connect_in_flight: AtomicBool::new(false),
                connect_error_logged: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.live().state
    }

    pub fn is_muted(&self) -> bool {
        self.live().muted
    }

    /// Text accumulated from transcription deltas for the current turn.
    pub fn partial_transcript(&self) -> String {
        self.live().partial.clone()
    }

    pub fn post_greeting_pending(&self) -> bool {
        self.live().post_greeting
    }

    fn live(&self) -> MutexGuard<'_, Live> {
        self.inner.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    fn connected_transport(&self) -> Option<Arc<dyn RealtimeTransport>> {
        self.live().connected_transport()
    }

    /// Fetches a fresh token from the configured source, then connects with it.
    pub async fn connect_fresh(&self) -> Result<ConnectOutcome, VoiceError> {
        let token = self
            .inner
            .tokens
            .fetch_token(self.inner.config.model.as_ref())
            .await
            .map_err(|failure| self.fail_connect(VoiceError::Connect(failure.to_string())))?;
        self.connect(token).await
    }

    /// Opens the realtime session with `token`.
    ///
    /// A session-description failure on the first attempt is retried once
    /// with a token fetched from the [`TokenSource`]; every other failure
    /// surfaces as [`VoiceError::Connect`] and leaves the session
    /// [`SessionState::Disconnected`].
    pub async fn connect(&self, token: Token) -> Result<ConnectOutcome, VoiceError> {
        match self.state() {
            SessionState::Closed => return Err(VoiceError::Closed),
            state if state.is_connected() => return Ok(ConnectOutcome::AlreadyConnected),
            _ => {}
        }

        if self
            .inner
            .connect_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("connect already in flight");
            return Ok(ConnectOutcome::Coalesced);
        }
        let _in_flight = InFlight(&self.inner.connect_in_flight);

        {
            let mut live = self.live();
            match live.state {
                SessionState::Closed => return Err(VoiceError::Closed),
                state if state.is_connected() => return Ok(ConnectOutcome::AlreadyConnected),
                _ => live.state = SessionState::Connecting,
            }
        }

        let model = self.inner.config.model.as_ref();
        let opened = match self.inner.connector.connect(&token, model).await {
            Err(err) if is_session_description_error(&err) => {
                tracing::warn!(error = %err, "session description rejected, retrying with a fresh token");
                match self.inner.tokens.fetch_token(model).await {
                    Ok(fresh) => self.inner.connector.connect(&fresh, model).await,
                    Err(failure) => Err(VoiceError::Connect(format!(
                        "token refresh failed: {failure}"
                    ))),
                }
            }
            other => other,
        };

        match opened {
            Ok(handle) => {
                self.install(handle).await?;
                Ok(ConnectOutcome::Connected)
            }
            Err(err) => Err(self.fail_connect(err)),
        }
    }

    fn fail_connect(&self, err: VoiceError) -> VoiceError {
        {
            let mut live = self.live();
            if live.state != SessionState::Closed {
                live.state = SessionState::Disconnected;
            }
        }

        let err = match err {
            VoiceError::Connect(message) => VoiceError::Connect(message),
            other => VoiceError::Connect(other.to_string()),
        };
        if self.inner.connect_error_logged.swap(true, Ordering::AcqRel) {
            tracing::debug!(error = %err, "realtime connect failed again");
        } else {
            tracing::error!(error = %err, "realtime connect failed");
        }
        err
    }

    async fn install(&self, handle: TransportHandle) -> Result<(), VoiceError> {
        let TransportHandle { transport, events } = handle;
        let config = &self.inner.config;

        if let Err(e) = transport.set_muted(true).await {
            tracing::warn!(error = %e, "initial mute failed");
        }
        if config.instructions.is_some() {
            let update = SessionUpdate::new(&config.voice, &config.transcription_model, &config.language)
                .with_instructions(config.instructions.clone());
            if let Err(e) = transport.send(ClientEvent::SessionUpdate { session: update }).await {
                tracing::warn!(error = %e, "session instructions not delivered");
            }
        }

        let accepted = {
            let mut live = self.live();
            if live.state == SessionState::Closed {
                false
            } else {
                live.generation += 1;
                live.state = SessionState::Listening;
                live.muted = true;
                live.transport = Some(Arc::clone(&transport));
                live.reset_turn_state();
                live.last_partial_at = Instant::now();
                live.last_response_at = None;
                let pump = self.spawn_pump(events, live.generation);
                if let Some(stale) = live.pump.replace(pump) {
                    stale.abort();
                }
                if let Some(text) = config.greeting.clone() {
                    let greeter = self.spawn_greeting(text);
                    if let Some(stale) = live.greeter.replace(greeter) {
                        stale.abort();
                    }
                }
                true
            }
        };

        if !accepted {
            transport.close().await;
            return Err(VoiceError::Closed);
        }

        tracing::info!(model = ?config.model, "realtime session connected");
        Ok(())
    }

    fn spawn_pump(&self, mut events: mpsc::Receiver<ServerEvent>, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                RealtimeSessionController { inner }.handle_event(event).await;
            }
            if let Some(inner) = weak.upgrade() {
                RealtimeSessionController { inner }.on_transport_closed(generation);
            }
        })
    }

    fn on_transport_closed(&self, generation: u64) {
        let dropped = {
            let mut live = self.live();
            if live.generation == generation && live.state.is_connected() {
                live.state = SessionState::Disconnected;
                live.transport = None;
                live.pump = None;
                live.reset_turn_state();
                true
            } else {
                false
            }
        };
        if dropped {
            tracing::warn!("realtime transport closed");
            self.emit(SessionEvent::Disconnected);
        }
    }

    fn spawn_greeting(&self, text: String) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.greeting_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let controller = RealtimeSessionController { inner };
                if let Err(e) = controller.greet(&text).await {
                    tracing::warn!(error = %e, "greeting sequence failed");
                }
            }
        })
    }

    /// Sends the greeting sequence. Its `response.create` goes straight to
    /// the transport and does not start a debounce window, so the reply to
    /// the respondent's first turn is never suppressed by the greeting.
    async fn greet(&self, text: &str) -> Result<(), VoiceError> {
        let Some(transport) = self.connected_transport() else {
            return Ok(());
        };
        let config = &self.inner.config;

        let update = SessionUpdate::new(&config.voice, &config.transcription_model, &config.language)
            .with_instructions(config.instructions.clone());
        transport
            .send(ClientEvent::SessionUpdate { session: update })
            .await?;
        transport.send(ClientEvent::user_message(text)).await?;
        self.live().post_greeting = true;
        transport
            .send(ClientEvent::response(&config.voice, None))
            .await?;

        tracing::debug!("greeting sent");
        Ok(())
    }

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::TranscriptionDelta { delta, item_id } => self.on_partial(&delta, item_id),
            ServerEvent::TranscriptionCompleted {
                transcript,
                item_id,
            } => self.on_completed(transcript, item_id),
            ServerEvent::SpeechFinal => self.on_speech_final().await,
            ServerEvent::OutputTextDelta {
                delta,
                response_id,
                item_id,
            } => self.on_assistant_output(
                AssistantChannel::Text,
                AssistantChunk::Delta(delta),
                response_id,
                item_id,
            ),
            ServerEvent::OutputTextDone {
                text,
                response_id,
                item_id,
            } => self.on_assistant_output(
                AssistantChannel::Text,
                AssistantChunk::Done(text),
                response_id,
                item_id,
            ),
            ServerEvent::OutputAudioTranscriptDelta {
                delta,
                response_id,
                item_id,
            } => self.on_assistant_output(
                AssistantChannel::AudioTranscript,
                AssistantChunk::Delta(delta),
                response_id,
                item_id,
            ),
            ServerEvent::OutputAudioTranscriptDone {
                transcript,
                response_id,
                item_id,
            } => self.on_assistant_output(
                AssistantChannel::AudioTranscript,
                AssistantChunk::Done(transcript),
                response_id,
                item_id,
            ),
            ServerEvent::OutputAudioStarted => self.on_output_audio(SessionState::Speaking),
            ServerEvent::OutputAudioStopped => self.on_output_audio(SessionState::Listening),
            ServerEvent::Error { error } => {
                tracing::warn!(
                    code = ?error.code,
                    kind = ?error.kind,
                    message = %error.message,
                    "realtime server error"
                );
                self.emit(SessionEvent::TransportError(error.message));
            }
            ServerEvent::Unknown => {}
        }
    }

    fn on_partial(&self, delta: &str, item_id: Option<String>) {
        let mut live = self.live();
        live.partial.push_str(delta);
        live.last_partial_at = Instant::now();
        let reading = paralinguistic::estimate(&live.partial, PARTIAL_GAP_MS);
        self.emit(SessionEvent::Transcript(TranscriptEvent {
            text: live.partial.clone(),
            confidence: PARTIAL_CONFIDENCE,
            is_final: false,
            reading,
            item_id,
        }));
    }

    fn on_completed(&self, transcript: Option<String>, item_id: Option<String>) {
        {
            // Emission and buffer clear happen under the same lock.
            let mut live = self.live();
            let buffered = std::mem::take(&mut live.partial);
            let text = transcript.filter(|t| !t.is_empty()).unwrap_or(buffered);
            let gap = u64::try_from(live.last_partial_at.elapsed().as_millis()).unwrap_or(u64::MAX);
            let reading = paralinguistic::estimate(&text, gap);
            if live.state.is_connected() {
                live.state = SessionState::Listening;
            }
            self.emit(SessionEvent::Transcript(TranscriptEvent {
                text,
                confidence: FINAL_CONFIDENCE,
                is_final: true,
                reading,
                item_id,
            }));
        }
        self.emit(SessionEvent::Listening);
    }

    async fn on_speech_final(&self) {
        let instructions = {
            let mut live = self.live();
            live.partial.clear();
            if live.state.is_connected() {
                live.state = SessionState::Processing;
            }
            if live.post_greeting {
                live.post_greeting = false;
                Some(NO_REPEAT_INTRO_INSTRUCTION.to_string())
            } else {
                None
            }
        };
        self.emit(SessionEvent::Listening);
        let follows_greeting = instructions.is_some();
        if !self.request_response(instructions).await && follows_greeting {
            let mut live = self.live();
            if live.state.is_connected() {
                live.post_greeting = true;
            }
        }
    }

    fn on_assistant_output(
        &self,
        channel: AssistantChannel,
        chunk: AssistantChunk,
        response_id: Option<String>,
        item_id: Option<String>,
    ) {
        let mut live = self.live();
        let locked = *live.assistant_channel.get_or_insert(channel);
        if locked != channel {
            tracing::trace!(?channel, ?locked, "ignoring assistant output on unlocked channel");
            return;
        }

        let (text, is_final) = match chunk {
            AssistantChunk::Delta(delta) => {
                live.assistant.push_str(&delta);
                (live.assistant.clone(), false)
            }
            AssistantChunk::Done(text) => {
                let buffered = std::mem::take(&mut live.assistant);
                live.assistant_channel = None;
                (text.filter(|t| !t.is_empty()).unwrap_or(buffered), true)
            }
        };
        self.emit(SessionEvent::AssistantText {
            text,
            is_final,
            response_id,
            item_id,
        });
    }

    fn on_output_audio(&self, next: SessionState) {
        {
            let mut live = self.live();
            if live.state.is_connected() {
                live.state = next;
            }
        }
        self.emit(match next {
            SessionState::Speaking => SessionEvent::Speaking,
            _ => SessionEvent::Listening,
        });
    }

    /// Asks the assistant to respond. At most one request per debounce
    /// window; returns `false` when suppressed or not connected.
    pub async fn request_response(&self, instructions: Option<String>) -> bool {
        let transport = {
            let mut live = self.live();
            let Some(transport) = live.connected_transport() else {
                tracing::debug!("response request without a live session ignored");
                return false;
            };
            let now = Instant::now();
            let debounce = self.inner.config.response_debounce();
            if live
                .last_response_at
                .is_some_and(|last| now.duration_since(last) < debounce)
            {
                tracing::debug!("response request debounced");
                return false;
            }
            live.last_response_at = Some(now);
            transport
        };

        let event = ClientEvent::response(&self.inner.config.voice, instructions);
        if let Err(e) = transport.send(event).await {
            tracing::warn!(error = %e, "response.create failed");
        }
        true
    }

    /// Makes the assistant say `text` verbatim.
    pub async fn speak(&self, text: &str) -> bool {
        let Some(transport) = self.connected_transport() else {
            tracing::debug!("speak without a live session ignored");
            return false;
        };
        let voice = &self.inner.config.voice;
        let result = match transport.send(ClientEvent::assistant_message(text)).await {
            Ok(()) => transport.send(ClientEvent::response(voice, None)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "assistant message failed");
                false
            }
        }
    }

    /// Unmutes the microphone, acquiring the shared capture stream first
    /// when one is configured.
    ///
    /// Returns `Ok(false)` before connect or when the transport refuses to
    /// unmute. A microphone acquisition error is returned as-is; the session
    /// stays connected and muted.
    pub async fn start_mic(&self) -> Result<bool, VoiceError> {
        let Some(transport) = self.connected_transport() else {
            tracing::debug!("start_mic before connect ignored");
            return Ok(false);
        };
        if let Some(mic) = &self.inner.microphone {
            mic.acquire()?;
        }
        match transport.set_muted(false).await {
            Ok(()) => {
                self.live().muted = false;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "unmute failed");
                Ok(false)
            }
        }
    }

    pub async fn stop_mic(&self) -> bool {
        let Some(transport) = self.connected_transport() else {
            tracing::debug!("stop_mic before connect ignored");
            return false;
        };
        match transport.set_muted(true).await {
            Ok(()) => {
                self.live().muted = true;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "mute failed");
                false
            }
        }
    }

    /// Forwards captured audio. Dropped while muted or disconnected.
    pub async fn push_audio(&self, pcm16: &[u8]) -> bool {
        let transport = {
            let live = self.live();
            if live.muted {
                return false;
            }
            match live.connected_transport() {
                Some(transport) => transport,
                None => return false,
            }
        };
        match transport.append_audio(pcm16).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "audio append failed");
                false
            }
        }
    }

    /// Interrupts assistant output. Mute state is left alone.
    pub async fn trigger_barge_in(&self) {
        if let Some(transport) = self.connected_transport() {
            if let Err(e) = transport.interrupt().await {
                tracing::warn!(error = %e, "interrupt failed");
            }
        }
        self.emit(SessionEvent::BargeIn);
    }

    /// Tears the session down. Idempotent, and safe before `connect`.
    pub async fn dispose(&self) {
        let (transport, pump, greeter) = {
            let mut live = self.live();
            if live.state == SessionState::Closed {
                return;
            }
            live.state = SessionState::Closed;
            live.reset_turn_state();
            (live.transport.take(), live.pump.take(), live.greeter.take())
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(greeter) = greeter {
            greeter.abort();
        }
        if let Some(transport) = transport {
            transport.close().await;
        }
        if let Some(mic) = &self.inner.microphone {
            mic.release();
        }
        tracing::info!("realtime session disposed");
    }
}

fn is_session_description_error(err: &VoiceError) -> bool {
    let message = err.to_string();
    SESSION_DESCRIPTION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}
