use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{extract::Path, Router};
use serde_json::json;
use voxpoll_types::RealtimeModel;
use voxpoll_voice::{TokenBroker, TokenFailure, TokenSource};

async fn default_token(headers: HeaderMap) -> impl IntoResponse {
    // The broker must never accept a cached token.
    let cache = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if cache != "no-store" {
        return (StatusCode::BAD_REQUEST, "cache-control missing").into_response();
    }
    axum::Json(json!({"client_secret": {"value": "ek_default_model_token_000001", "expires_at": 99}}))
        .into_response()
}

async fn model_token(Path(model): Path<String>) -> impl IntoResponse {
    match model.as_str() {
        "gpt-realtime" => axum::Json(json!({"value": "ek_gpt_realtime_token_0000001"})).into_response(),
        "gpt-realtime-mini" => axum::Json(json!({"value": "ek_short"})).into_response(),
        "gpt-4o-realtime-preview" => (
            [(header::CONTENT_TYPE, "text/html")],
            "<html>login</html>",
        )
            .into_response(),
        "gpt-4o-mini-realtime-preview" => (
            [(header::CONTENT_TYPE, "application/json")],
            "{not json",
        )
            .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "UNSUPPORTED_MODEL"})),
        )
            .into_response(),
    }
}

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn broker() -> TokenBroker {
    let router = Router::new()
        .route("/api/realtime-token", get(default_token))
        .route("/api/realtime-token/{model}", get(model_token));
    TokenBroker::new(spawn_server(router).await)
}

#[tokio::test]
async fn default_route_reads_nested_client_secret() {
    let token = broker().await.fetch_token(None).await.unwrap();
    assert_eq!(token.value(), "ek_default_model_token_000001");
    assert_eq!(token.expires_at(), Some(99));
}

#[tokio::test]
async fn model_route_is_used_when_model_given() {
    let token = broker()
        .await
        .fetch_token(Some(&RealtimeModel::GptRealtime))
        .await
        .unwrap();
    assert_eq!(token.value(), "ek_gpt_realtime_token_0000001");
}

#[tokio::test]
async fn content_type_match_ignores_case() {
    let router = Router::new().route(
        "/api/realtime-token",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "Application/JSON; charset=utf-8")],
                r#"{"value": "ek_mixed_case_header_token_01"}"#,
            )
        }),
    );
    let broker = TokenBroker::new(spawn_server(router).await);

    let token = broker.fetch_token(None).await.unwrap();
    assert_eq!(token.value(), "ek_mixed_case_header_token_01");
}

#[tokio::test]
async fn validation_failures_are_values() {
    let broker = broker().await;

    assert_eq!(
        broker.fetch_token(Some(&RealtimeModel::GptRealtimeMini)).await,
        Err(TokenFailure::TooShort { len: 8 })
    );

    match broker.fetch_token(Some(&RealtimeModel::Gpt4oRealtimePreview)).await {
        Err(TokenFailure::InvalidContentType { content_type, detail }) => {
            assert!(content_type.starts_with("text/html"));
            assert_eq!(detail, "<html>login</html>");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(matches!(
        broker.fetch_token(Some(&RealtimeModel::Gpt4oMiniRealtimePreview)).await,
        Err(TokenFailure::MalformedBody(_))
    ));
}

#[tokio::test]
async fn non_success_status_carries_body() {
    let router = Router::new().route(
        "/api/realtime-token",
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({"error": "OPENAI_API_KEY missing"})),
            )
        }),
    );
    let broker = TokenBroker::new(spawn_server(router).await);

    match broker.fetch_token(None).await {
        Err(TokenFailure::Status { status, detail }) => {
            assert_eq!(status, 500);
            assert!(detail.contains("OPENAI_API_KEY missing"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_network_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let broker = TokenBroker::new(format!("http://{addr}"));
    let source: &dyn TokenSource = &broker;
    assert!(matches!(
        source.fetch_token(None).await,
        Err(TokenFailure::Network(_))
    ));
}
