//! Realtime token issuance and interviewer instructions.

use crate::api::{with_conn, ApiError};
use crate::AppState;
use axum::{
    extract::Path,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use voxpoll_survey::compose_system_prompt;
use voxpoll_types::RealtimeModel;
use voxpoll_voice::IssueError;

const NO_STORE: &str = "no-store, max-age=0";

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::MissingApiKey => {
                ApiError::InternalServerError("OPENAI_API_KEY missing".to_string())
            }
            IssueError::Upstream { status, body } => ApiError::Detailed {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                body,
            },
            IssueError::TokenMissing { detail } => ApiError::Detailed {
                status: StatusCode::BAD_GATEWAY,
                body: json!({ "error": "TOKEN_MISSING", "detail": detail }),
            },
            IssueError::Network(e) => {
                tracing::error!(error = %e, "realtime token upstream unreachable");
                ApiError::Detailed {
                    status: StatusCode::BAD_GATEWAY,
                    body: json!({ "error": "UPSTREAM_UNAVAILABLE" }),
                }
            }
        }
    }
}

/// Base instructions file plus the block for the latest survey definition.
pub(crate) async fn load_system_prompt(state: &Arc<AppState>) -> Result<String, ApiError> {
    let base = tokio::fs::read_to_string(&state.system_prompt_path)
        .await
        .map_err(|e| {
            tracing::error!(
                path = %state.system_prompt_path.display(),
                error = %e,
                "failed to read system prompt"
            );
            ApiError::InternalServerError("SYSTEM_PROMPT_UNAVAILABLE".to_string())
        })?;
    let definition = with_conn(state, voxpoll_survey::latest_definition).await?;
    Ok(compose_system_prompt(&base, definition.as_ref()))
}

fn no_store(response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    response
}

async fn issue_token(state: &Arc<AppState>, model: &str) -> Result<Json<Value>, ApiError> {
    if !state.issuer.has_api_key() {
        return Err(IssueError::MissingApiKey.into());
    }
    let instructions = load_system_prompt(state).await?;
    let issued = state.issuer.issue(model, &instructions).await?;
    tracing::info!(model, "realtime token issued");
    Ok(Json(issued.body))
}

/// Handler for `GET /api/realtime-token`.
pub async fn default_token_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let model = state.realtime.default_model.clone();
    no_store(issue_token(&state, &model).await)
}

/// Handler for `GET /api/realtime-token/{model}`.
///
/// Only allow-listed ids are accepted; each may be remapped to a concrete
/// upstream model through configuration.
pub async fn model_token_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(requested): Path<String>,
) -> Response {
    if !state.issuer.has_api_key() {
        return no_store(ApiError::from(IssueError::MissingApiKey));
    }
    let Some(model) = RealtimeModel::parse(&requested) else {
        tracing::warn!(requested = %requested, "unsupported realtime model requested");
        let allowed: Vec<&str> = RealtimeModel::ALL.iter().map(|m| m.as_str()).collect();
        return no_store(ApiError::Detailed {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": "UNSUPPORTED_MODEL", "allowed": allowed }),
        });
    };
    let upstream = state.realtime.resolve(model);
    no_store(issue_token(&state, &upstream).await)
}

/// Handler for `GET /api/system-prompt`.
pub async fn system_prompt_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let instructions = load_system_prompt(&state).await?;
    Ok(Json(json!({ "instructions": instructions })))
}
