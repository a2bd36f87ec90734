// Bridge configuration
//
// Resolution order:
// 1. `.env` in the working directory (best effort)
// 2. TOML file named by DASHBRIDGE_CONFIG, if set
// 3. DASHBRIDGE_* environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const ENV_CONFIG_PATH: &str = "DASHBRIDGE_CONFIG";
pub const ENV_HOST: &str = "DASHBRIDGE_HOST";
pub const ENV_PORT: &str = "DASHBRIDGE_PORT";
pub const ENV_AUTH_TOKEN: &str = "DASHBRIDGE_AUTH_TOKEN";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "DASHBRIDGE_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_TOOL_ROUNDS: &str = "DASHBRIDGE_MAX_TOOL_ROUNDS";

pub const DEFAULT_PORT: u16 = 8089;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CHAT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("No auth token configured; set DASHBRIDGE_AUTH_TOKEN or auth_token in the config file")]
    MissingAuthToken,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Process-wide settings
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret every UI client must present in its `register` frame
    pub auth_token: String,
    /// Deadline for backend-initiated calls to a connection
    pub request_timeout_ms: u64,
    /// HTTP timeout for a single model invocation
    pub chat_timeout_ms: u64,
    /// Upper bound on model -> tool -> model rounds per chat request
    pub max_tool_rounds: usize,
    pub max_message_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            auth_token: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            chat_timeout_ms: DEFAULT_CHAT_TIMEOUT_MS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_token", &"[REDACTED]")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("chat_timeout_ms", &self.chat_timeout_ms)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("max_message_bytes", &self.max_message_bytes)
            .finish()
    }
}

impl BridgeConfig {
    /// Load from `.env`, the optional config file and the environment
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("[config] Ignoring unreadable .env file: {}", e);
            }
        }

        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = parse_env(ENV_PORT, &port)?;
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN) {
            self.auth_token = token.trim().to_string();
        }
        if let Some(timeout) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = parse_env(ENV_REQUEST_TIMEOUT_MS, &timeout)?;
        }
        if let Some(rounds) = lookup(ENV_MAX_TOOL_ROUNDS) {
            self.max_tool_rounds = parse_env(ENV_MAX_TOOL_ROUNDS, &rounds)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_token.is_empty() {
            return Err(ConfigError::MissingAuthToken);
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid("max_tool_rounds must be at least 1".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_millis(self.chat_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}
