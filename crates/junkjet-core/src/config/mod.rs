use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use crate::error::ConfigError;

/// Root configuration for junkjet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub session: SessionConfig,
    pub monitor: MonitorConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    /// Retention cap on stored turns; 0 keeps everything.
    pub max_messages: usize,
    pub max_message_chars: usize,
    /// Fall back to a fresh session when the store cannot be read.
    pub graceful_degradation: bool,
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    /// Checks every command needs, whether or not it serves HTTP.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid("session.ttlSecs must be positive".into()));
        }
        if self.max_message_chars == 0 {
            return Err(ConfigError::Invalid(
                "session.maxMessageChars must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            max_messages: 50,
            max_message_chars: 1000,
            graceful_degradation: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub expiring_soon_window_secs: u64,
}

impl MonitorConfig {
    pub fn check_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn expiring_soon_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiring_soon_window_secs as i64)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            expiring_soon_window_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            _ => Err(format!("Unknown store backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub key_prefix: String,
    pub operation_timeout_ms: u64,
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.operation_timeout_ms.max(1))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "chatbot:session:".to_string(),
            operation_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiry_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_expiry_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Config {
    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "auth.jwtSecret is empty (set ACCESS_TOKEN_SECRET)".into(),
            ));
        }
        Ok(())
    }
}

// ====== Config loading/saving ======

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `JUNKJET_CONFIG` env var: full JSON config
/// 2. Individual env vars (merged on top of the file config)
/// 3. File fallback (`~/.junkjet/config.json`)
pub fn load_config_from_env(config_path: Option<&Path>) -> Config {
    if let Ok(json) = std::env::var("JUNKJET_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse JUNKJET_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(config_path);

    if let Ok(v) = std::env::var("REDIS_URL") {
        cfg.store.redis_url = v;
        cfg.store.backend = StoreBackend::Redis;
    }
    if let Ok(v) = std::env::var("SESSION_STORE") {
        match v.parse() {
            Ok(backend) => cfg.store.backend = backend,
            Err(e) => tracing::warn!("Ignoring SESSION_STORE: {}", e),
        }
    }
    if let Ok(v) = std::env::var("ACCESS_TOKEN_SECRET") {
        cfg.auth.jwt_secret = v;
    }
    if let Ok(v) = std::env::var("SESSION_TTL_SECS") {
        match v.parse() {
            Ok(secs) => cfg.session.ttl_secs = secs,
            Err(e) => tracing::warn!("Ignoring SESSION_TTL_SECS={}: {}", v, e),
        }
    }
    if let Ok(v) = std::env::var("PORT") {
        match v.parse() {
            Ok(port) => cfg.server.port = port,
            Err(e) => tracing::warn!("Ignoring PORT={}: {}", v, e),
        }
    }

    cfg
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    get_home_dir().join("config.json")
}

/// Get the junkjet data directory, creating it if needed.
pub fn get_data_dir() -> PathBuf {
    let path = get_home_dir();
    std::fs::create_dir_all(&path).ok();
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".junkjet")
}

/// Load configuration from file or fall back to defaults.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
