use crate::auth::{DEFAULT_AUTH_MESSAGE, DEFAULT_MAX_CLIENTS, DEFAULT_SESSION_MAX_AGE};
use crate::storage::DEFAULT_STORAGE_PREFIX;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where profile rows live.
#[derive(Clone, PartialEq, Eq)]
pub enum ProfileBackend {
    /// Hosted relational store reached over its PostgREST API.
    Supabase { url: String, anon_key: String },
    Redis,
    Memory,
}

impl std::fmt::Debug for ProfileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileBackend::Supabase { url, .. } => f
                .debug_struct("Supabase")
                .field("url", url)
                .field("anon_key", &"[REDACTED]")
                .finish(),
            ProfileBackend::Redis => f.write_str("Redis"),
            ProfileBackend::Memory => f.write_str("Memory"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,

    // Storage
    pub profile_backend: ProfileBackend,
    pub redis_url: Option<String>,
    pub storage_prefix: String,

    // Auth
    pub auth_message: String,
    pub session_max_age: Duration,
    /// Auth contexts kept in memory at once.
    pub max_clients: usize,

    // Host app handshake
    pub ready_url: Option<String>,
    pub ready_retry_delay: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("static_dir", &self.static_dir)
            .field("profile_backend", &self.profile_backend)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("storage_prefix", &self.storage_prefix)
            .field("auth_message", &self.auth_message)
            .field("session_max_age", &self.session_max_age)
            .field("max_clients", &self.max_clients)
            .field("ready_url", &self.ready_url)
            .field("ready_retry_delay", &self.ready_retry_delay)
            .finish()
    }
}

/// Local defaults: memory profiles, memory sessions, no handshake.
impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            static_dir: PathBuf::from("static"),
            profile_backend: ProfileBackend::Memory,
            redis_url: None,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            auth_message: DEFAULT_AUTH_MESSAGE.to_string(),
            session_max_age: DEFAULT_SESSION_MAX_AGE,
            max_clients: DEFAULT_MAX_CLIENTS,
            ready_url: None,
            ready_retry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is fine; variables may come from the environment.
        let _ = dotenvy::dotenv();

        let bind_addr_str = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;

        let static_dir = PathBuf::from(env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()));

        let redis_url = optional_var("REDIS_URL");

        let backend = env::var("PROFILE_BACKEND").unwrap_or_else(|_| "supabase".to_string());
        let profile_backend = match backend.trim().to_lowercase().as_str() {
            "supabase" => ProfileBackend::Supabase {
                url: required_var("SUPABASE_URL")?,
                anon_key: required_var("SUPABASE_ANON_KEY")?,
            },
            "redis" => {
                if redis_url.is_none() {
                    return Err(ConfigError::MissingVar("REDIS_URL".to_string()));
                }
                ProfileBackend::Redis
            }
            "memory" => ProfileBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PROFILE_BACKEND".to_string(),
                    format!("expected supabase, redis or memory, got {}", other),
                ))
            }
        };

        let storage_prefix =
            env::var("STORAGE_PREFIX").unwrap_or_else(|_| DEFAULT_STORAGE_PREFIX.to_string());
        if storage_prefix.is_empty() {
            return Err(ConfigError::InvalidValue(
                "STORAGE_PREFIX".to_string(),
                "cannot be empty".to_string(),
            ));
        }

        let auth_message =
            env::var("AUTH_MESSAGE").unwrap_or_else(|_| DEFAULT_AUTH_MESSAGE.to_string());
        if auth_message.is_empty() {
            return Err(ConfigError::InvalidValue(
                "AUTH_MESSAGE".to_string(),
                "cannot be empty".to_string(),
            ));
        }

        let session_max_age_secs =
            parse_env_or_default("SESSION_MAX_AGE_SECS", DEFAULT_SESSION_MAX_AGE.as_secs())?;
        if session_max_age_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_MAX_AGE_SECS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        let max_clients = parse_env_or_default("MAX_CLIENTS", DEFAULT_MAX_CLIENTS)?;
        if max_clients == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CLIENTS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        let ready_url = optional_var("READY_URL");
        let ready_retry_delay_ms = parse_env_or_default("READY_RETRY_DELAY_MS", 100)?;

        Ok(Config {
            bind_addr,
            static_dir,
            profile_backend,
            redis_url,
            storage_prefix,
            auth_message,
            session_max_age: Duration::from_secs(session_max_age_secs),
            max_clients,
            ready_url,
            ready_retry_delay: Duration::from_millis(ready_retry_delay_ms),
        })
    }
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    let value = env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "cannot be empty".to_string(),
        ));
    }
    Ok(value)
}

/// Unset and empty both mean absent.
fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}
