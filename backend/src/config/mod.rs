//! Central module for application-wide configuration settings.
//!
//! Settings are read from an optional TOML file and then from environment
//! variables prefixed with `MENTORLINK__` (nested keys separated by `__`,
//! e.g. `MENTORLINK__TOKENS__ACCESS_TTL_SECS=600`).

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "mentorlink";

/// Environment variable prefix.
const ENV_PREFIX: &str = "MENTORLINK";

/// Recommended minimum signing key length in bytes.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Key used to sign access and refresh tokens.
    pub secret_key: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long to wait for a pooled connection before reporting `Unavailable`.
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// How long SQLite waits on a locked database before giving up.
    #[serde(default = "default_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_timeout_ms(),
            busy_timeout_ms: default_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory database, used by tests.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: u64,
    /// Extra time a revocation record is kept after the token itself expires.
    #[serde(default = "default_revocation_retention_secs")]
    pub revocation_retention_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: default_access_ttl_secs(),
            refresh_ttl_secs: default_refresh_ttl_secs(),
            revocation_retention_secs: default_revocation_retention_secs(),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

impl PasswordConfig {
    /// Lowest cost argon2 accepts. Only suitable for tests.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_database_url() -> String {
    "sqlite://mentorlink.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_access_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_refresh_ttl_secs() -> u64 {
    86_400 // 1 day
}

fn default_revocation_retention_secs() -> u64 {
    86_400
}

fn default_memory_kib() -> u32 {
    19_456
}

fn default_iterations() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a file (if any) and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder();

        let builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::Invalid("secret_key must not be empty".into()));
        }
        if self.secret_key.len() < MIN_SECRET_LEN {
            tracing::warn!(
                length = self.secret_key.len(),
                "secret_key is shorter than {} bytes",
                MIN_SECRET_LEN
            );
        }
        if self.tokens.refresh_ttl_secs == 0 {
            return Err(ConfigError::Invalid("tokens.refresh_ttl_secs must be positive".into()));
        }
        if self.pagination.default_page_size == 0 || self.pagination.max_page_size == 0 {
            return Err(ConfigError::Invalid("page sizes must be positive".into()));
        }
        if self.pagination.default_page_size > self.pagination.max_page_size {
            return Err(ConfigError::Invalid(
                "pagination.default_page_size exceeds pagination.max_page_size".into(),
            ));
        }
        Ok(())
    }

    /// Configuration for tests: in-memory store, cheap hashing.
    pub fn for_test() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            secret_key: "test-secret-key-that-is-long-enough-0123".to_string(),
            database: DatabaseConfig::in_memory(),
            tokens: TokenConfig::default(),
            password: PasswordConfig::minimal(),
            pagination: PaginationConfig::default(),
            log: LogConfig::default(),
        }
    }
}
