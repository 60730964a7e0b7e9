//! Transport seam between the controller and the wire.

use crate::error::VoiceError;
use crate::events::{ClientEvent, ServerEvent};
use crate::token::Token;
use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use voxpoll_types::RealtimeModel;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

const DEFAULT_EVENT_BUFFER: usize = 512;

/// An open realtime connection.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<(), VoiceError>;

    /// Mutes or unmutes outbound microphone audio.
    async fn set_muted(&self, muted: bool) -> Result<(), VoiceError>;

    /// Cuts off assistant output mid-response.
    async fn interrupt(&self) -> Result<(), VoiceError>;

    /// Forwards captured PCM16 audio. Transports that capture on their own
    /// (WebRTC) ignore it.
    async fn append_audio(&self, _pcm16: &[u8]) -> Result<(), VoiceError> {
        Ok(())
    }

    async fn close(&self);
}

/// A freshly opened transport plus its inbound event stream. The stream ends
/// when the connection closes.
pub struct TransportHandle {
    pub transport: Arc<dyn RealtimeTransport>,
    pub events: mpsc::Receiver<ServerEvent>,
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        token: &Token,
        model: Option<&RealtimeModel>,
    ) -> Result<TransportHandle, VoiceError>;
}

/// Opens realtime sessions over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    event_buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_REALTIME_URL)
    }
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(
        &self,
        token: &Token,
        model: Option<&RealtimeModel>,
    ) -> Result<TransportHandle, VoiceError> {
        let model = model.copied().unwrap_or_default();
        let url = format!("{}?model={}", self.url, model.as_str());

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", token.value()))
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        tracing::info!(model = %model, "realtime websocket connected");

        let (sink, read) = stream.split();
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let reader = tokio::spawn(read_events(read, tx));

        let transport = WsTransport {
            sink: AsyncMutex::new(sink),
            muted: AtomicBool::new(true),
            reader: Mutex::new(Some(reader)),
        };

        Ok(TransportHandle {
            transport: Arc::new(transport),
            events: rx,
        })
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn read_events(
    mut read: futures_util::stream::SplitStream<WsStream>,
    tx: mpsc::Sender<ServerEvent>,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::Unknown) => {}
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "skipping unparseable realtime event"),
            },
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "realtime websocket closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "realtime websocket read failed");
                break;
            }
        }
    }
}

struct WsTransport {
    sink: AsyncMutex<SplitSink<WsStream, Message>>,
    muted: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    async fn send_text(&self, text: String) -> Result<(), VoiceError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn send(&self, event: ClientEvent) -> Result<(), VoiceError> {
        let text = serde_json::to_string(&event).map_err(|e| VoiceError::Transport(e.to_string()))?;
        self.send_text(text).await
    }

    async fn set_muted(&self, muted: bool) -> Result<(), VoiceError> {
        self.muted.store(muted, Ordering::Release);
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), VoiceError> {
        self.send(ClientEvent::ResponseCancel).await
    }

    async fn append_audio(&self, pcm16: &[u8]) -> Result<(), VoiceError> {
        if self.muted.load(Ordering::Acquire) || pcm16.is_empty() {
            return Ok(());
        }
        let audio = base64::engine::general_purpose::STANDARD.encode(pcm16);
        self.send(ClientEvent::InputAudioBufferAppend { audio }).await
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}
