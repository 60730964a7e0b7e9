//! Client-side ephemeral token fetching.

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use voxpoll_types::RealtimeModel;

/// Tokens shorter than this are treated as garbage even on HTTP 200.
pub const MIN_TOKEN_LEN: usize = 20;

/// Why a token could not be obtained. Carried as a value; the caller decides
/// whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenFailure {
    #[error("token fetch failed: {status} {detail}")]
    Status { status: u16, detail: String },

    #[error("token fetch invalid response: content-type {content_type:?}: {detail}")]
    InvalidContentType {
        content_type: String,
        detail: String,
    },

    #[error("token response is not JSON: {0}")]
    MalformedBody(String),

    #[error("token missing in response")]
    Missing,

    #[error("token too short ({len} chars)")]
    TooShort { len: usize },

    #[error("token request failed: {0}")]
    Network(String),
}

/// An ephemeral realtime credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: Option<i64>,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<i64>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Unix seconds, when the issuer reported one.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Anything that can hand out a fresh token on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self, model: Option<&RealtimeModel>) -> Result<Token, TokenFailure>;
}

/// Fetches tokens from the voxpoll server's `/api/realtime-token` routes.
///
/// Every call is a fresh request; tokens are never cached.
#[derive(Debug, Clone)]
pub struct TokenBroker {
    client: reqwest::Client,
    base_url: String,
}

impl TokenBroker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, model: Option<&RealtimeModel>) -> String {
        match model {
            Some(model) => format!("{}/api/realtime-token/{}", self.base_url, model.as_str()),
            None => format!("{}/api/realtime-token", self.base_url),
        }
    }

    pub async fn fetch_token(&self, model: Option<&RealtimeModel>) -> Result<Token, TokenFailure> {
        let url = self.url_for(model);
        let result = self.request(&url).await;
        match &result {
            Ok(token) => tracing::debug!(url = %url, expires_at = ?token.expires_at(), "fetched realtime token"),
            Err(failure) => tracing::warn!(url = %url, error = %failure, "realtime token fetch failed"),
        }
        result
    }

    async fn request(&self, url: &str) -> Result<Token, TokenFailure> {
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| TokenFailure::Network(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| TokenFailure::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(TokenFailure::Status {
                status: status.as_u16(),
                detail: body,
            });
        }
        if !content_type.to_ascii_lowercase().contains("application/json") {
            return Err(TokenFailure::InvalidContentType {
                content_type,
                detail: body,
            });
        }

        let data: Value =
            serde_json::from_str(&body).map_err(|e| TokenFailure::MalformedBody(e.to_string()))?;
        parse_token(&data)
    }
}

#[async_trait]
impl TokenSource for TokenBroker {
    async fn fetch_token(&self, model: Option<&RealtimeModel>) -> Result<Token, TokenFailure> {
        TokenBroker::fetch_token(self, model).await
    }
}

/// Reads the token from `value`, falling back to `client_secret.value`.
pub(crate) fn parse_token(data: &Value) -> Result<Token, TokenFailure> {
    let top = data.get("value").and_then(Value::as_str).filter(|v| !v.is_empty());
    let nested = data
        .get("client_secret")
        .and_then(|s| s.get("value"))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty());

    let value = top.or(nested).ok_or(TokenFailure::Missing)?;
    let len = value.chars().count();
    if len < MIN_TOKEN_LEN {
        return Err(TokenFailure::TooShort { len });
    }

    let expires_at = data
        .get("expires_at")
        .or_else(|| data.get("client_secret").and_then(|s| s.get("expires_at")))
        .and_then(Value::as_i64);

    Ok(Token::new(value).with_expiry(expires_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_value_wins() {
        let token = parse_token(&json!({
            "value": "ek_top_level_token_value_123",
            "client_secret": {"value": "ek_nested_token_value_45678"},
            "expires_at": 1_700_000_000
        }))
        .unwrap();
        assert_eq!(token.value(), "ek_top_level_token_value_123");
        assert_eq!(token.expires_at(), Some(1_700_000_000));
    }

    #[test]
    fn nested_client_secret_is_accepted() {
        let token = parse_token(&json!({
            "client_secret": {"value": "ek_nested_token_value_45678", "expires_at": 42}
        }))
        .unwrap();
        assert_eq!(token.value(), "ek_nested_token_value_45678");
        assert_eq!(token.expires_at(), Some(42));
    }

    #[test]
    fn missing_and_short_tokens_are_rejected() {
        assert_eq!(parse_token(&json!({})), Err(TokenFailure::Missing));
        assert_eq!(parse_token(&json!({"value": ""})), Err(TokenFailure::Missing));
        assert_eq!(parse_token(&json!({"value": 12345})), Err(TokenFailure::Missing));
        assert_eq!(
            parse_token(&json!({"value": "short"})),
            Err(TokenFailure::TooShort { len: 5 })
        );
    }

    #[test]
    fn debug_redacts_value() {
        let rendered = format!("{:?}", Token::new("ek_super_secret_value_0001"));
        assert!(!rendered.contains("super_secret"));
    }

    #[test]
    fn model_path_is_appended() {
        let broker = TokenBroker::new("http://localhost:3000/");
        assert_eq!(broker.url_for(None), "http://localhost:3000/api/realtime-token");
        assert_eq!(
            broker.url_for(Some(&RealtimeModel::GptRealtime)),
            "http://localhost:3000/api/realtime-token/gpt-realtime"
        );
    }
}
