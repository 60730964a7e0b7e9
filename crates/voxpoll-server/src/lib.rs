//! voxpoll server library logic.

pub mod api;
pub mod api_realtime;
pub mod api_ws;
pub mod config;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Json, Router};
use config::RealtimeSettings;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voxpoll_db::DbPool;
use voxpoll_survey::{
    ExtractionModel, InMemoryReportCache, InterviewRegistry, ReportCache, ReportService,
    SurveyExtractionPipeline,
};
use voxpoll_voice::TokenIssuer;

/// Maximum request body size (2 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    pub pipeline: SurveyExtractionPipeline,
    pub reports: ReportService,
    /// Mints ephemeral realtime tokens.
    pub issuer: TokenIssuer,
    pub realtime: RealtimeSettings,
    /// Base interviewer instructions file.
    pub system_prompt_path: PathBuf,
    /// Interviews running over `/ws`.
    pub interviews: InterviewRegistry,
}

impl AppState {
    /// Wires the pipeline and report service to one shared report cache.
    pub fn new(
        pool: DbPool,
        model: Arc<dyn ExtractionModel>,
        issuer: TokenIssuer,
        realtime: RealtimeSettings,
        system_prompt_path: PathBuf,
    ) -> Self {
        let cache: Arc<dyn ReportCache> = Arc::new(InMemoryReportCache::new());
        Self {
            pipeline: SurveyExtractionPipeline::new(pool.clone(), model.clone(), cache.clone()),
            reports: ReportService::new(pool.clone(), model, cache),
            pool,
            issuer,
            realtime,
            system_prompt_path,
            interviews: InterviewRegistry::new(),
        }
    }
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.interviews.len(),
    }))
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/survey-definitions",
            get(api::list_definitions_handler).post(api::create_definition_handler),
        )
        .route(
            "/api/survey-submissions",
            get(api::list_submissions_handler).post(api::submit_handler),
        )
        .route(
            "/api/survey-submissions/reextract",
            axum::routing::post(api::reextract_handler),
        )
        .route("/api/report/{session_id}", get(api::report_handler))
        .route("/api/report/{session_id}/export", get(api::export_handler))
        .route("/api/realtime-token", get(api_realtime::default_token_handler))
        .route("/api/realtime-token/{model}", get(api_realtime::model_token_handler))
        .route("/api/system-prompt", get(api_realtime::system_prompt_handler))
        .route("/ws", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
