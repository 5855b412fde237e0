//! Server configuration loading from file and environment variables.

use codex_ai::AiConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

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

    /// AI provider settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// Outbound email settings.
    #[serde(default)]
    pub email: EmailConfig,

    /// Account and session settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Share link settings.
    #[serde(default)]
    pub share: ShareConfig,
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

    /// Public base URL, used to build share links in emails.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Directory holding the built web client. Served as a fallback when it
    /// contains an `index.html`.
    #[serde(default = "default_client_dir")]
    pub client_dir: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "codex_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Resend email settings. Email is disabled while `resend_api_key` is empty.
#[derive(Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub resend_api_key: String,

    /// Sender, e.g. `CodeXAlpha <hello@example.com>`.
    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default = "default_resend_base_url")]
    pub api_base_url: String,
}

/// Account settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in hours.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u32,

    /// PBKDF2 rounds for account passwords.
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,
}

/// Share link settings.
#[derive(Clone, Default, Deserialize)]
pub struct ShareConfig {
    /// HMAC key for share access grants. A random key is generated at
    /// startup when empty, which invalidates grants on restart.
    #[serde(default)]
    pub access_secret: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_client_dir() -> String {
    "client/dist".to_string()
}

fn default_db_path() -> String {
    "codex.db".to_string()
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

fn default_from_address() -> String {
    "CodeXAlpha <no-reply@codexalpha.app>".to_string()
}

fn default_resend_base_url() -> String {
    "https://api.resend.com".to_string()
}

fn default_session_ttl_hours() -> u32 {
    24 * 14
}

fn default_password_iterations() -> u32 {
    100_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            client_dir: default_client_dir(),
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

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            resend_api_key: String::new(),
            from_address: default_from_address(),
            api_base_url: default_resend_base_url(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            password_iterations: default_password_iterations(),
        }
    }
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("resend_api_key", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl fmt::Debug for ShareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareConfig")
            .field("access_secret", &"[REDACTED]")
            .finish()
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

fn env_override(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CODEX_HOST`, `CODEX_PORT` override `server.host` / `server.port`
/// - `CODEX_PUBLIC_URL`, `CODEX_CLIENT_DIR` override `server.public_url` / `server.client_dir`
/// - `CODEX_DB_PATH` overrides `database.path`
/// - `CODEX_LOG_LEVEL` overrides `logging.level`
/// - `CODEX_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CODEX_AI_PROVIDER`, `CODEX_AI_API_KEY`, `CODEX_AI_BASE_URL`, `CODEX_AI_MODEL` override `ai.*`
/// - `CODEX_RESEND_API_KEY` overrides `email.resend_api_key`
/// - `CODEX_SHARE_SECRET` overrides `share.access_secret`
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

    if let Ok(host) = std::env::var("CODEX_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("CODEX_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    env_override("CODEX_PUBLIC_URL", &mut config.server.public_url);
    env_override("CODEX_CLIENT_DIR", &mut config.server.client_dir);
    env_override("CODEX_DB_PATH", &mut config.database.path);
    env_override("CODEX_LOG_LEVEL", &mut config.logging.level);
    if let Ok(json) = std::env::var("CODEX_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    env_override("CODEX_AI_PROVIDER", &mut config.ai.provider);
    env_override("CODEX_AI_API_KEY", &mut config.ai.api_key);
    env_override("CODEX_AI_BASE_URL", &mut config.ai.base_url);
    env_override("CODEX_AI_MODEL", &mut config.ai.model);
    env_override("CODEX_RESEND_API_KEY", &mut config.email.resend_api_key);
    env_override("CODEX_SHARE_SECRET", &mut config.share.access_secret);

    Ok(config)
}
