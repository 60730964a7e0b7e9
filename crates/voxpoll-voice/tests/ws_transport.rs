use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use voxpoll_types::RealtimeModel;
use voxpoll_voice::{
    ClientEvent, RealtimeConfig, RealtimeSessionController, RealtimeTransport, ServerEvent,
    SessionEvent, Token, TokenBroker, TransportConnector, WsConnector,
};

#[derive(Clone)]
struct Upstream {
    seen: mpsc::UnboundedSender<Value>,
    handshake: Arc<Mutex<Option<(String, String)>>>,
}

async fn realtime(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    State(upstream): State<Upstream>,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let model = query.get("model").cloned().unwrap_or_default();
    *upstream.handshake.lock().await = Some((auth, model));
    ws.on_upgrade(move |socket| serve_socket(socket, upstream.seen))
}

async fn serve_socket(mut socket: WebSocket, seen: mpsc::UnboundedSender<Value>) {
    let greeting = json!({
        "type": "conversation.item.input_audio_transcription.delta",
        "delta": "여보세요",
        "item_id": "item_up"
    });
    let _ = socket.send(Message::Text(greeting.to_string().into())).await;
    let _ = socket
        .send(Message::Text(json!({"type": "session.created"}).to_string().into()))
        .await;

    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                let _ = seen.send(value);
            }
        }
    }
}

async fn spawn_upstream() -> (String, mpsc::UnboundedReceiver<Value>, Arc<Mutex<Option<(String, String)>>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handshake = Arc::new(Mutex::new(None));
    let router = Router::new()
        .route("/v1/realtime", get(realtime))
        .with_state(Upstream {
            seen: tx,
            handshake: handshake.clone(),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("ws://{addr}/v1/realtime"), rx, handshake)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("upstream message")
        .expect("channel open")
}

#[tokio::test]
async fn ws_connector_authenticates_and_relays_events() {
    let (url, mut seen, handshake) = spawn_upstream().await;
    let connector = WsConnector::new(url);
    let token = Token::new("ek_ws_transport_token_000001");

    let mut handle = connector
        .connect(&token, Some(&RealtimeModel::GptRealtimeMini))
        .await
        .expect("connect");

    let (auth, model) = handshake.lock().await.clone().expect("handshake seen");
    assert_eq!(auth, "Bearer ek_ws_transport_token_000001");
    assert_eq!(model, "gpt-realtime-mini");

    // session.created is not in the vocabulary and is filtered out.
    let first = tokio::time::timeout(Duration::from_secs(2), handle.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        first,
        ServerEvent::TranscriptionDelta {
            delta: "여보세요".into(),
            item_id: Some("item_up".into())
        }
    );

    // Audio is dropped while muted, forwarded as base64 once unmuted.
    handle.transport.append_audio(&[1, 2, 3]).await.unwrap();
    handle.transport.set_muted(false).await.unwrap();
    handle.transport.append_audio(&[1, 2, 3]).await.unwrap();
    let appended = recv(&mut seen).await;
    assert_eq!(appended, json!({"type": "input_audio_buffer.append", "audio": "AQID"}));

    handle.transport.interrupt().await.unwrap();
    assert_eq!(recv(&mut seen).await, json!({"type": "response.cancel"}));

    handle
        .transport
        .send(ClientEvent::user_message("테스트"))
        .await
        .unwrap();
    assert_eq!(recv(&mut seen).await["item"]["content"][0]["text"], "테스트");

    handle.transport.close().await;
}

#[tokio::test]
async fn controller_runs_over_websocket() {
    let (url, mut seen, _) = spawn_upstream().await;
    let controller = RealtimeSessionController::new(
        RealtimeConfig {
            instructions: Some("한 번에 한 질문씩".into()),
            ..Default::default()
        },
        Arc::new(WsConnector::new(url)),
        Arc::new(TokenBroker::new("http://127.0.0.1:9")),
        None,
    );
    let mut events = controller.subscribe();

    controller
        .connect(Token::new("ek_ws_transport_token_000002"))
        .await
        .unwrap();

    let update = recv(&mut seen).await;
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["instructions"], "한 번에 한 질문씩");

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        SessionEvent::Transcript(t) => {
            assert_eq!(t.text, "여보세요");
            assert!(!t.is_final);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(controller.request_response(None).await);
    assert_eq!(recv(&mut seen).await["type"], "response.create");

    controller.dispose().await;
}
