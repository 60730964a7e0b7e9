//! Server-side ephemeral token minting against the upstream realtime API.

use crate::config::DEFAULT_VOICE;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("OPENAI_API_KEY missing")]
    MissingApiKey,

    /// Upstream rejected the request. The body is forwarded to the caller
    /// unchanged.
    #[error("upstream returned {status}")]
    Upstream { status: u16, body: Value },

    #[error("upstream response carried no token")]
    TokenMissing { detail: Value },

    #[error("upstream request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// A minted token. `body` is the upstream payload with `value` guaranteed at
/// the top level.
#[derive(Clone)]
pub struct IssuedToken {
    pub body: Value,
}

impl IssuedToken {
    pub fn value(&self) -> &str {
        self.body.get("value").and_then(Value::as_str).unwrap_or_default()
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct ClientSecretRequest<'a> {
    session: SessionRequest<'a>,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    model: &'a str,
    instructions: &'a str,
    output_modalities: [&'static str; 1],
    audio: Value,
}

#[derive(Clone)]
pub struct TokenIssuer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    voice: String,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("voice", &self.voice)
            .finish()
    }
}

impl TokenIssuer {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            voice: DEFAULT_VOICE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Mints a token for the concrete upstream `model`.
    pub async fn issue(&self, model: &str, instructions: &str) -> Result<IssuedToken, IssueError> {
        let api_key = self.api_key.as_deref().ok_or(IssueError::MissingApiKey)?;

        let request = ClientSecretRequest {
            session: SessionRequest {
                kind: "realtime",
                model,
                instructions,
                output_modalities: ["audio"],
                audio: json!({ "output": { "voice": self.voice } }),
            },
        };

        let url = format!("{}/realtime/client_secrets", self.base_url);
        tracing::debug!(model, url = %url, "requesting realtime client secret");

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| json!({ "error": "INVALID_JSON" }));

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), model, "upstream rejected client secret request");
            return Err(IssueError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        normalize_issued(body)
    }
}

/// Lifts `client_secret.value` to `value` when only the nested form is present.
fn normalize_issued(mut body: Value) -> Result<IssuedToken, IssueError> {
    let has_top = body
        .get("value")
        .and_then(Value::as_str)
        .is_some_and(|v| !v.is_empty());

    if !has_top {
        let nested = body
            .get("client_secret")
            .and_then(|s| s.get("value"))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        match (nested, body.as_object_mut()) {
            (Some(value), Some(map)) => {
                map.insert("value".to_string(), Value::String(value));
            }
            _ => return Err(IssueError::TokenMissing { detail: body }),
        }
    }

    Ok(IssuedToken { body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_secret_is_lifted() {
        let issued = normalize_issued(json!({
            "client_secret": {"value": "ek_nested", "expires_at": 1}
        }))
        .unwrap();
        assert_eq!(issued.value(), "ek_nested");
        assert_eq!(issued.body["client_secret"]["expires_at"], 1);
    }

    #[test]
    fn top_level_value_left_alone() {
        let issued = normalize_issued(json!({"value": "ek_top", "client_secret": {"value": "other"}})).unwrap();
        assert_eq!(issued.value(), "ek_top");
    }

    #[test]
    fn no_token_is_token_missing() {
        let err = normalize_issued(json!({"id": "sess_1"})).unwrap_err();
        match err {
            IssueError::TokenMissing { detail } => assert_eq!(detail["id"], "sess_1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_api_key_short_circuits() {
        let issuer = TokenIssuer::new(Some(String::new()));
        assert!(!issuer.has_api_key());
        let err = issuer.issue("gpt-realtime", "").await.unwrap_err();
        assert!(matches!(err, IssueError::MissingApiKey));
        assert_eq!(err.to_string(), "OPENAI_API_KEY missing");
    }
}
