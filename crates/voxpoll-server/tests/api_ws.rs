//! Interview flow over the `/ws` socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use voxpoll_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use voxpoll_server::{app, config::RealtimeSettings, AppState};
use voxpoll_survey::{CompletionRequest, ExtractionError, ExtractionModel};
use voxpoll_types::{QuestionType, SurveyQuestion};
use voxpoll_voice::TokenIssuer;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct UnusedModel;

#[async_trait]
impl ExtractionModel for UnusedModel {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ExtractionError> {
        Ok("{}".to_string())
    }
}

/// Starts the server on an ephemeral port over a file-backed database.
async fn setup_test_server() -> (SocketAddr, DbPool) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db_path = db_file.path().to_str().unwrap().to_string();
    // Leak the tempfile so it persists for the duration of the test.
    std::mem::forget(db_file);

    let pool = create_pool(&db_path, DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    let state = AppState::new(
        pool.clone(),
        Arc::new(UnusedModel),
        TokenIssuer::new(None),
        RealtimeSettings::default(),
        PathBuf::from("prompts/system.md"),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    (addr, pool)
}

fn seed_definition(pool: &DbPool) {
    let question = |id: &str, text: &str| SurveyQuestion {
        id: id.to_string(),
        text: text.to_string(),
        question_type: QuestionType::TextSummary,
        options: vec![],
        extraction_guide: None,
    };
    let conn = pool.get().unwrap();
    voxpoll_survey::insert_definition(
        &conn,
        Some("이동 실태 조사"),
        vec![
            question("Q1", "요즘 어떻게 지내세요?"),
            question("Q2", "주로 어디에 다니세요?"),
            question("Q3", "이동할 때 누가 도와주나요?"),
        ],
    )
    .unwrap();
}

async fn connect(addr: SocketAddr) -> Socket {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("failed to connect");
    ws
}

async fn send(ws: &mut Socket, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("failed to send frame");
}

async fn recv(ws: &mut Socket) -> Value {
    let msg = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("socket closed")
        .expect("socket error");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    }
}

async fn hello(ws: &mut Socket) -> String {
    send(ws, json!({"type": "hello", "payload": {"clientVersion": "test"}})).await;
    let created = recv(ws).await;
    assert_eq!(created["type"], "session_created");
    created["payload"]["sessionId"].as_str().unwrap().to_string()
}

fn turn(session_id: &str, text: &str, is_final: bool) -> Value {
    json!({
        "type": if is_final { "asr_final" } else { "asr_partial" },
        "sessionId": session_id,
        "payload": {
            "asr": {"text": text, "confidence": 0.92, "final": is_final},
            "paralinguistic": {"silence_ms_before": 700, "utterance_ms": 1600, "hesitation": false}
        }
    })
}

#[tokio::test]
async fn protocol_errors_are_reported() {
    let (addr, _pool) = setup_test_server().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"type": "hello"})).await;
    let err = recv(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["code"], "SURVEY_DEFINITION_MISSING");

    ws.send(Message::Text("not json".into())).await.unwrap();
    let err = recv(&mut ws).await;
    assert_eq!(err["payload"]["code"], "INVALID_ENVELOPE");

    send(&mut ws, turn("no-such-session", "안녕하세요", true)).await;
    let err = recv(&mut ws).await;
    assert_eq!(err["payload"]["code"], "NO_SESSION");
}

#[tokio::test]
async fn interview_runs_to_completion() {
    let (addr, pool) = setup_test_server().await;
    seed_definition(&pool);
    let mut ws = connect(addr).await;

    let sid = hello(&mut ws).await;
    let ask = recv(&mut ws).await;
    assert_eq!(ask["type"], "ask");
    assert_eq!(ask["sessionId"], sid.as_str());
    assert_eq!(ask["payload"]["utterance"], "요즘 어떻게 지내세요?");
    assert_eq!(ask["payload"]["state"], "intro");
    assert_eq!(ask["payload"]["hint"], "Q1");

    send(&mut ws, turn(&sid, "잘 지내요", false)).await;
    let partial = recv(&mut ws).await;
    assert_eq!(partial["type"], "ask");
    assert_eq!(partial["payload"]["hint"], "Q1");

    send(&mut ws, turn(&sid, "잘 지내요", true)).await;
    let ask = recv(&mut ws).await;
    assert_eq!(ask["payload"]["hint"], "Q2");
    assert_eq!(ask["payload"]["state"], "deepening");

    send(&mut ws, turn(&sid, "병원하고 시장이요", true)).await;
    let ask = recv(&mut ws).await;
    assert_eq!(ask["payload"]["hint"], "Q3");
    assert_eq!(ask["payload"]["state"], "wrapup");

    send(&mut ws, turn(&sid, "딸이 차로 데려다줘요", true)).await;
    let end = recv(&mut ws).await;
    assert_eq!(end["type"], "end");
    assert_eq!(end["payload"]["reason"], "complete");

    let summary = recv(&mut ws).await;
    assert_eq!(summary["type"], "summary");
    let summary = &summary["payload"]["summary"];
    assert_eq!(summary["명시적_답변"]["Q2"], "병원하고 시장이요");
    assert_eq!(summary["설문_메타"]["중단_사유"], "complete");

    let closing = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for close");
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
}

#[tokio::test]
async fn barge_in_ack_and_keyword_end() {
    let (addr, pool) = setup_test_server().await;
    seed_definition(&pool);
    let mut ws = connect(addr).await;

    let sid = hello(&mut ws).await;
    recv(&mut ws).await;

    send(
        &mut ws,
        json!({"type": "user_bargein", "sessionId": sid, "payload": {"reason": "talk_over"}}),
    )
    .await;
    let clarify = recv(&mut ws).await;
    assert_eq!(clarify["type"], "clarify");
    assert_eq!(clarify["payload"]["hint"], "제가 천천히 다시 여쭤볼게요.");
    assert!(clarify["payload"]["utterance"]
        .as_str()
        .unwrap()
        .starts_with("요즘 어떻게 지내세요?"));

    send(&mut ws, json!({"type": "user_bargein", "sessionId": sid, "payload": {}})).await;
    assert_eq!(recv(&mut ws).await["payload"]["code"], "INVALID_BARGEIN");

    send(
        &mut ws,
        json!({"type": "frontend_event", "sessionId": sid, "payload": {"state": "listening"}}),
    )
    .await;
    let ack = recv(&mut ws).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["payload"]["received"], "frontend_event");

    send(&mut ws, json!({"type": "ping", "sessionId": sid})).await;
    let err = recv(&mut ws).await;
    assert_eq!(err["payload"]["code"], "UNSUPPORTED");
    assert_eq!(err["payload"]["message"], "type ping");

    send(
        &mut ws,
        json!({"type": "asr_final", "sessionId": sid, "payload": {"asr": {"text": "네"}}}),
    )
    .await;
    assert_eq!(recv(&mut ws).await["payload"]["code"], "INVALID_ASR");

    send(&mut ws, turn(&sid, "이제 그만할래요", true)).await;
    let end = recv(&mut ws).await;
    assert_eq!(end["type"], "end");
    assert_eq!(end["payload"]["reason"], "keyword");
    let summary = recv(&mut ws).await;
    assert_eq!(summary["payload"]["summary"]["설문_메타"]["중단_사유"], "keyword");
}
