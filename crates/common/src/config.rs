//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Environment variable prefix shared by every setting.
const ENV_PREFIX: &str = "MEDLEARN";

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Response cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Rate limit configuration.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Background job configuration.
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// Per-command timeout. A stalled Redis fails the command instead of hanging it.
    #[serde(default = "default_redis_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Upper bound of the exponential reconnect backoff.
    #[serde(default = "default_redis_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_redis_prefix(),
            command_timeout_ms: default_redis_command_timeout_ms(),
            reconnect_max_delay_ms: default_redis_reconnect_max_delay_ms(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign access and verification tokens.
    pub jwt_secret: String,
    /// Lifetime of access tokens in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Lifetime of email verification tokens in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub verification_ttl_hours: i64,
    /// Whether new accounts must verify their email before logging in.
    #[serde(default = "default_true")]
    pub require_email_verification: bool,
}

/// Backend used for the HTTP response cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Shared Redis instance.
    #[default]
    Redis,
    /// Process-local map, useful for single-node development.
    Memory,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Whether GET responses are cached at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Storage backend.
    #[serde(default)]
    pub backend: CacheBackend,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Redis,
        }
    }
}

/// Per-IP request budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per 15 minutes for the whole API.
    #[serde(default = "default_api_max")]
    pub api_max: u32,
    /// Requests per 15 minutes for authentication endpoints.
    #[serde(default = "default_auth_max")]
    pub auth_max: u32,
    /// Quiz attempts per 5 minutes.
    #[serde(default = "default_quiz_max")]
    pub quiz_max: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            api_max: default_api_max(),
            auth_max: default_auth_max(),
            quiz_max: default_quiz_max(),
        }
    }
}

/// Background job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Interval between expired-ban sweeps.
    #[serde(default = "default_ban_sweep_interval_secs")]
    pub ban_sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ban_sweep_interval_secs: default_ban_sweep_interval_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_redis_prefix() -> String {
    "medlearn".to_string()
}

const fn default_redis_command_timeout_ms() -> u64 {
    500
}

const fn default_redis_reconnect_max_delay_ms() -> u32 {
    10_000
}

const fn default_token_ttl_hours() -> i64 {
    24
}

const fn default_true() -> bool {
    true
}

const fn default_api_max() -> u32 {
    500
}

const fn default_auth_max() -> u32 {
    50
}

const fn default_quiz_max() -> u32 {
    50
}

const fn default_ban_sweep_interval_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `MEDLEARN_ENV`)
    /// 4. Environment variables with `MEDLEARN__` prefix, e.g. `MEDLEARN__AUTH__JWT_SECRET`
    pub fn load() -> Result<Self, config::ConfigError> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();

        let env = std::env::var("MEDLEARN_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Minimal configuration for tests and tooling.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/medlearn_test".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            redis: RedisConfig::default(),
            auth: AuthConfig {
                jwt_secret: "test-secret-key-for-testing".to_string(),
                token_ttl_hours: 24,
                verification_ttl_hours: 24,
                require_email_verification: true,
            },
            cache: CacheConfig {
                enabled: true,
                backend: CacheBackend::Memory,
            },
            rate_limit: RateLimitSettings::default(),
            jobs: JobsConfig::default(),
        }
    }
}
