//! Interview flow over WebSocket.
//!
//! Frames in both directions are `{type, payload, sessionId}` envelopes.
//! `hello` starts an interview from the latest survey definition and asks
//! the first question; `asr_partial` / `asr_final` drive the flow state
//! machine; `user_bargein` asks for a gentler repeat; `frontend_event` is
//! acknowledged. Once the flow ends, the summary is sent and the socket
//! closed.

use crate::api::with_conn;
use crate::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    Extension,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::ops::ControlFlow;
use std::sync::Arc;
use voxpoll_survey::{build_summary, question_flow, FlowAction, InterviewSession};
use voxpoll_types::ParalinguisticReading;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct Outgoing<'a, P> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: P,
    #[serde(rename = "sessionId")]
    session_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AsrPayload {
    text: String,
    confidence: f64,
    #[serde(rename = "final")]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct TurnPayload {
    asr: AsrPayload,
    paralinguistic: ParalinguisticReading,
}

#[derive(Debug, Deserialize)]
struct BargeInPayload {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct FrontendEventPayload {
    state: String,
}

/// Handler for `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut session_id: Option<String> = None;

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        state.interviews.evict_stale(Utc::now());

        if handle_frame(&mut socket, &state, &mut session_id, text.as_str())
            .await
            .is_break()
        {
            break;
        }
    }

    if let Some(id) = session_id {
        if state.interviews.remove(&id).is_some() {
            tracing::debug!(session_id = %id, "interview dropped on disconnect");
        }
    }
}

async fn handle_frame(
    socket: &mut WebSocket,
    state: &Arc<AppState>,
    current: &mut Option<String>,
    text: &str,
) -> ControlFlow<()> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => return send_error(socket, "INVALID_ENVELOPE", e.to_string(), current.as_deref()).await,
    };

    if envelope.kind == "hello" {
        return start_interview(socket, state, current).await;
    }

    let known = envelope
        .session_id
        .filter(|id| state.interviews.with_session(id, |s| s.touch(Utc::now())).is_some());
    let Some(sid) = known else {
        return send_error(socket, "NO_SESSION", "Unknown session", current.as_deref()).await;
    };
    *current = Some(sid.clone());

    match envelope.kind.as_str() {
        "asr_partial" | "asr_final" => {
            let turn: TurnPayload = match serde_json::from_value(envelope.payload) {
                Ok(turn) => turn,
                Err(e) => return send_error(socket, "INVALID_ASR", e.to_string(), Some(&sid)).await,
            };
            tracing::debug!(
                session_id = %sid,
                is_final = turn.asr.is_final,
                confidence = turn.asr.confidence,
                "user turn"
            );

            let outcome = state.interviews.with_session(&sid, |session| {
                let actions =
                    session.handle_user_turn(&turn.asr.text, &turn.paralinguistic, turn.asr.is_final);
                let summary = session.is_complete().then(|| build_summary(session));
                (actions, summary)
            });
            let Some((actions, summary)) = outcome else {
                return send_error(socket, "NO_SESSION", "Unknown session", Some(&sid)).await;
            };

            for action in &actions {
                send_action(socket, action, &sid).await?;
            }

            if let Some(summary) = summary {
                send(socket, "summary", json!({ "summary": summary }), Some(&sid)).await?;
                state.interviews.remove(&sid);
                *current = None;
                let _ = socket.send(Message::Close(None)).await;
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
        "user_bargein" => {
            let payload: BargeInPayload = match serde_json::from_value(envelope.payload) {
                Ok(payload) => payload,
                Err(e) => return send_error(socket, "INVALID_BARGEIN", e.to_string(), Some(&sid)).await,
            };
            tracing::debug!(session_id = %sid, reason = %payload.reason, "user barge-in");
            match state.interviews.with_session(&sid, |s| s.handle_barge_in()) {
                Some(action) => send_action(socket, &action, &sid).await,
                None => send_error(socket, "NO_SESSION", "Unknown session", Some(&sid)).await,
            }
        }
        "frontend_event" => {
            if let Ok(event) = serde_json::from_value::<FrontendEventPayload>(envelope.payload) {
                tracing::debug!(session_id = %sid, state = %event.state, "frontend event");
            }
            send(socket, "ack", json!({ "received": envelope.kind }), Some(&sid)).await
        }
        other => {
            let message = format!("type {other}");
            send_error(socket, "UNSUPPORTED", message, Some(&sid)).await
        }
    }
}

/// Replaces any interview on this socket with a fresh one and asks its
/// first question.
async fn start_interview(
    socket: &mut WebSocket,
    state: &Arc<AppState>,
    current: &mut Option<String>,
) -> ControlFlow<()> {
    let definition = match with_conn(state, voxpoll_survey::latest_definition).await {
        Ok(Some(definition)) => definition,
        Ok(None) => {
            return send_error(
                socket,
                "SURVEY_DEFINITION_MISSING",
                "No survey definition",
                current.as_deref(),
            )
            .await
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load survey definition for interview");
            return send_error(socket, "INTERNAL_ERROR", "Failed to start interview", current.as_deref()).await;
        }
    };

    if let Some(previous) = current.take() {
        state.interviews.remove(&previous);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let mut session = InterviewSession::new(id.clone(), question_flow(&definition));
    let first = session.next_question();
    state.interviews.insert(session);
    *current = Some(id.clone());

    tracing::info!(
        session_id = %id,
        definition_id = %definition.id,
        questions = definition.questions.len(),
        "interview started"
    );

    send(socket, "session_created", json!({ "sessionId": id }), Some(&id)).await?;
    match first {
        Some(prompt) => send(socket, "ask", prompt, Some(&id)).await,
        None => ControlFlow::Continue(()),
    }
}

async fn send_action(socket: &mut WebSocket, action: &FlowAction, session_id: &str) -> ControlFlow<()> {
    match action {
        FlowAction::Ask(prompt) => send(socket, "ask", prompt, Some(session_id)).await,
        FlowAction::Clarify(prompt) => send(socket, "clarify", prompt, Some(session_id)).await,
        FlowAction::End { reason } => {
            send(socket, "end", json!({ "reason": reason.as_str() }), Some(session_id)).await
        }
    }
}

async fn send_error(
    socket: &mut WebSocket,
    code: &str,
    message: impl Into<String>,
    session_id: Option<&str>,
) -> ControlFlow<()> {
    let payload = json!({ "code": code, "message": message.into() });
    send(socket, "error", payload, session_id).await
}

/// Breaks once the peer is gone.
async fn send<P: Serialize>(
    socket: &mut WebSocket,
    kind: &str,
    payload: P,
    session_id: Option<&str>,
) -> ControlFlow<()> {
    let frame = Outgoing {
        kind,
        payload,
        session_id,
    };
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(kind, error = %e, "failed to serialize websocket frame");
            return ControlFlow::Continue(());
        }
    };
    if socket.send(Message::Text(text.into())).await.is_err() {
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}
