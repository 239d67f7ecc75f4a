use std::collections::BTreeMap;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::LlmTraceError;

/// Base URL used when a provider entry leaves `base_url` empty.
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmTraceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Provider entries keyed by their configuration key (`openai`, `anthropic`, ...).
    /// Held in a `BTreeMap` so every iteration over providers is in ascending key order.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10081,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/llmtrace.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    /// Upper bound for a single outbound provider call.
    pub timeout_seconds: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { timeout_seconds: 60 }
    }
}

impl ReplayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderConfig {
    /// Display name, matched case-insensitively as an alias of the key.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub models: Vec<String>,
}

impl LlmTraceConfig {
    /// Load from a TOML file (optional) layered under `LLMTRACE_*` environment overrides,
    /// e.g. `LLMTRACE_SERVER__PORT=8080`.
    pub fn load(path: &str) -> Result<Self, LlmTraceError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("LLMTRACE").separator("__"))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, LlmTraceError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(s.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LlmTraceConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 10081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.url, "sqlite://data/llmtrace.db");
        assert_eq!(config.replay.timeout(), Duration::from_secs(60));
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_providers_parse_as_keyed_mapping() {
        let config = LlmTraceConfig::from_toml_str(
            r#"
            [replay]
            timeout_seconds = 30

            [providers.openai]
            name = "OpenAI"
            api_key = "sk-test"
            base_url = "https://api.openai.com/v1"
            enabled = true
            models = ["gpt-4o", "gpt-4o-mini"]

            [providers.deepseek]
            name = "DeepSeek"
            api_key = "ds-test"
            "#,
        )
        .unwrap();

        assert_eq!(config.replay.timeout_seconds, 30);
        let keys: Vec<&str> = config.providers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["deepseek", "openai"]);

        let openai = &config.providers["openai"];
        assert_eq!(openai.name, "OpenAI");
        assert!(openai.enabled);
        assert_eq!(openai.models.len(), 2);

        let deepseek = &config.providers["deepseek"];
        assert!(!deepseek.enabled);
        assert!(deepseek.base_url.is_empty());
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let result = LlmTraceConfig::from_toml_str("[server\nport = ");
        assert!(matches!(result, Err(LlmTraceError::Config(_))), "got {:?}", result);

        let result = LlmTraceConfig::from_toml_str("[server]\nport = \"not a port\"");
        assert!(matches!(result, Err(LlmTraceError::Config(_))), "got {:?}", result);
    }

    #[test]
    fn test_load_reads_toml_file() {
        let dir = std::env::temp_dir().join(format!("llmtrace-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("llmtrace.toml");
        std::fs::write(&path, "[replay]\ntimeout_seconds = 12\n").unwrap();

        let config = LlmTraceConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.replay.timeout_seconds, 12);

        std::fs::write(&path, "[replay\n").unwrap();
        let result = LlmTraceConfig::load(path.to_str().unwrap());
        assert!(matches!(result, Err(LlmTraceError::Config(_))), "got {:?}", result);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bind_addr() {
        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
        };
        assert_eq!(server.bind_addr(), "127.0.0.1:9000");
    }
}
