//! Survey, submission and report handlers.

use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use voxpoll_survey::SurveyError;
use voxpoll_types::{SurveyQuestion, TranscriptItem};

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
    /// A status with a full JSON body, for errors that carry more than a code.
    #[error("{status}: {body}")]
    Detailed { status: StatusCode, body: Value },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Detailed { status, body } => return (status, Json(body)).into_response(),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<SurveyError> for ApiError {
    fn from(err: SurveyError) -> Self {
        let code = err.code();
        match err {
            SurveyError::SessionNotFound => ApiError::NotFound(code.to_string()),
            SurveyError::InvalidQuestionType(detail) | SurveyError::DuplicateQuestionId(detail) => {
                ApiError::Detailed {
                    status: StatusCode::BAD_REQUEST,
                    body: json!({ "error": code, "detail": detail }),
                }
            }
            e if e.is_validation() => ApiError::BadRequest(code.to_string()),
            e => {
                tracing::error!(error = %e, code, "survey operation failed");
                ApiError::InternalServerError(code.to_string())
            }
        }
    }
}

/// Any unreadable or mistyped request body.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "rejected request body");
        ApiError::BadRequest("INVALID_JSON".to_string())
    }
}

/// Runs `f` against a pooled connection on the blocking pool.
pub(crate) async fn with_conn<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Connection) -> Result<T, SurveyError> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<T, SurveyError> {
        let conn = pool.get()?;
        f(&*conn)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))?;
    Ok(result?)
}

#[derive(Debug, Deserialize)]
pub struct CreateDefinitionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub questions: Option<Vec<SurveyQuestion>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    #[serde(default)]
    pub transcript: Option<Vec<TranscriptItem>>,
    #[serde(default)]
    pub definition_id: Option<String>,
    #[serde(default)]
    pub respondent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReextractRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Handler for `GET /api/survey-definitions`. Newest first.
pub async fn list_definitions_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let definitions = with_conn(&state, voxpoll_survey::list_definitions).await?;
    Ok(Json(json!({ "definitions": definitions })))
}

/// Handler for `POST /api/survey-definitions`.
pub async fn create_definition_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CreateDefinitionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) = payload?;
    let questions = request.questions.unwrap_or_default();
    let name = request.name.filter(|n| !n.trim().is_empty());

    let definition = with_conn(&state, move |conn| {
        voxpoll_survey::insert_definition(conn, name.as_deref(), questions)
    })
    .await?;

    tracing::info!(
        definition_id = %definition.id,
        questions = definition.questions.len(),
        "survey definition created"
    );
    Ok((StatusCode::CREATED, Json(json!({ "definition": definition }))))
}

/// Handler for `POST /api/survey-submissions`.
pub async fn submit_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<voxpoll_survey::Submission>), ApiError> {
    let Json(request) = payload?;
    let submission = state
        .pipeline
        .submit(
            request.definition_id.as_deref(),
            request.transcript.unwrap_or_default(),
            request.respondent_id.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// Handler for `GET /api/survey-submissions`.
pub async fn list_submissions_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let data = with_conn(&state, voxpoll_survey::list_submissions).await?;
    Ok(Json(json!({ "data": data })))
}

/// Handler for `POST /api/survey-submissions/reextract`.
pub async fn reextract_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<ReextractRequest>, JsonRejection>,
) -> Result<Json<voxpoll_survey::Submission>, ApiError> {
    let Json(request) = payload?;
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("SESSION_ID_REQUIRED".to_string()))?;

    let submission = state.pipeline.reextract(&session_id).await?;
    Ok(Json(submission))
}

/// Handler for `GET /api/report/{session_id}`.
pub async fn report_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<voxpoll_survey::PolicyReport>, ApiError> {
    let report = state.reports.report(&session_id).await?;
    Ok(Json(report))
}

/// Handler for `GET /api/report/{session_id}/export`.
pub async fn export_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let document = state.reports.export(&session_id).await?;
    tracing::info!(
        session_id = %session_id,
        bytes = document.bytes.len(),
        "report exported"
    );

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&document.filename)
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, document.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document.bytes,
    )
        .into_response())
}
