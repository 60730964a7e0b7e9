//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;
use voxpoll_types::RealtimeModel;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream language-model API settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Realtime token issuance.
    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub prompts: PromptConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxpoll_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Chat-completions settings used by extraction and reports, plus the key
/// shared with realtime token issuance.
#[derive(Clone, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    /// API root, without a trailing `/chat/completions`.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model used for extraction and report generation.
    #[serde(default = "default_chat_model")]
    pub model: String,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Which upstream model a realtime token is minted for.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSettings {
    /// Upstream model for `GET /api/realtime-token`.
    #[serde(default = "default_realtime_model")]
    pub default_model: String,

    /// Output voice requested for every session.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Per-model remaps for `GET /api/realtime-token/{model}`, keyed by the
    /// allow-listed id.
    #[serde(default)]
    pub overrides: HashMap<RealtimeModel, String>,
}

impl RealtimeSettings {
    /// Upstream model name for an allow-listed id.
    pub fn resolve(&self, requested: RealtimeModel) -> String {
        self.overrides
            .get(&requested)
            .filter(|m| !m.is_empty())
            .cloned()
            .unwrap_or_else(|| requested.as_str().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptConfig {
    /// Base interviewer instructions; the active survey block is appended.
    #[serde(default = "default_system_prompt_path")]
    pub system_prompt_path: PathBuf,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "voxpoll.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_openai_base_url() -> String {
    voxpoll_survey::DEFAULT_CHAT_BASE_URL.to_string()
}

fn default_chat_model() -> String {
    voxpoll_survey::DEFAULT_CHAT_MODEL.to_string()
}

fn default_realtime_model() -> String {
    RealtimeModel::default().as_str().to_string()
}

fn default_voice() -> String {
    voxpoll_voice::DEFAULT_VOICE.to_string()
}

fn default_system_prompt_path() -> PathBuf {
    PathBuf::from("prompts/system.md")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_chat_model(),
        }
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            default_model: default_realtime_model(),
            voice: default_voice(),
            overrides: HashMap::new(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt_path: default_system_prompt_path(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOXPOLL_HOST` overrides `server.host`
/// - `VOXPOLL_PORT` overrides `server.port`
/// - `VOXPOLL_DB_PATH` overrides `database.path`
/// - `VOXPOLL_LOG_LEVEL` overrides `logging.level`
/// - `VOXPOLL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `OPENAI_API_KEY` overrides `openai.api_key`
/// - `OPENAI_MODEL` overrides `openai.model`
/// - `OPENAI_REALTIME_MODEL` overrides `realtime.default_model`
/// - `OPENAI_REALTIME_MODEL_<ID>` overrides `realtime.overrides.<id>`
///   (e.g. `OPENAI_REALTIME_MODEL_GPT_REALTIME_MINI`)
/// - `VOXPOLL_SYSTEM_PROMPT_PATH` overrides `prompts.system_prompt_path`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("VOXPOLL_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("VOXPOLL_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("VOXPOLL_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("VOXPOLL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("VOXPOLL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
        config.openai.api_key = Some(key);
    }
    if let Some(model) = var("OPENAI_MODEL").filter(|m| !m.is_empty()) {
        config.openai.model = model;
    }
    if let Some(model) = var("OPENAI_REALTIME_MODEL").filter(|m| !m.is_empty()) {
        config.realtime.default_model = model;
    }
    for model in RealtimeModel::ALL {
        if let Some(remap) = var(model.env_key()).filter(|m| !m.is_empty()) {
            config.realtime.overrides.insert(model, remap);
        }
    }
    if let Some(path) = var("VOXPOLL_SYSTEM_PROMPT_PATH") {
        config.prompts.system_prompt_path = PathBuf::from(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.path, "voxpoll.db");
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert_eq!(config.realtime.default_model, "gpt-4o-realtime-preview");
    }

    #[test]
    fn file_sections_are_parsed() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [database]
            pool_max_size = 2

            [openai]
            api_key = "sk-test"

            [realtime.overrides]
            "gpt-realtime" = "gpt-realtime-2025-08-28"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.pool_max_size, 2);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(
            config.realtime.resolve(RealtimeModel::GptRealtime),
            "gpt-realtime-2025-08-28"
        );
        assert_eq!(
            config.realtime.resolve(RealtimeModel::GptRealtimeMini),
            "gpt-realtime-mini"
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("VOXPOLL_PORT", "4100"),
            ("VOXPOLL_PORT_IGNORED", "1"),
            ("VOXPOLL_LOG_JSON", "1"),
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_REALTIME_MODEL", "gpt-realtime"),
            ("OPENAI_REALTIME_MODEL_GPT_REALTIME_MINI", "mini-pinned"),
            ("VOXPOLL_SYSTEM_PROMPT_PATH", "/etc/voxpoll/system.md"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 4100);
        assert!(config.logging.json);
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.realtime.default_model, "gpt-realtime");
        assert_eq!(config.realtime.resolve(RealtimeModel::GptRealtimeMini), "mini-pinned");
        assert_eq!(
            config.prompts.system_prompt_path,
            PathBuf::from("/etc/voxpoll/system.md")
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = OpenAiConfig {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
