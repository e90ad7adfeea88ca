//! Configuration management for auth-gateway
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::auth::ratelimit::MAX_BLOCK_DURATION;
use crate::auth::secret::{ServerSecret, MIN_SECRET_BYTES};

/// Environment variable prefix used by [`Config::from_env`]
pub const ENV_PREFIX: &str = "AUTH_GATEWAY_";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token and brute-force configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Request gate configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Users seeding the in-memory credential store
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix AUTH_GATEWAY_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(host) = env_var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_var("SERVER_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid port number".to_string()))?;
        }

        if let Some(secret) = env_var("AUTH_SECRET_KEY") {
            config.auth.secret_key = Some(secret);
        }
        if let Some(ttl) = env_var("AUTH_TOKEN_TTL_MINUTES") {
            config.auth.token_ttl_minutes = ttl
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid token TTL".to_string()))?;
        }
        if let Some(max) = env_var("AUTH_MAX_FAILURES") {
            config.auth.rate_limit.max_failures = max
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid max failures".to_string()))?;
        }
        if let Some(secs) = env_var("AUTH_BLOCK_DURATION_SECS") {
            config.auth.rate_limit.block_duration_secs = secs
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid block duration".to_string()))?;
        }

        if let Some(enabled) = env_var("OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Some(endpoint) = env_var("OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        if let Some(level) = env_var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Check values that serde cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.secret()?;

        if self.auth.token_ttl_minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.token_ttl_minutes must be greater than zero".to_string(),
            ));
        }
        if self.auth.rate_limit.max_failures == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.rate_limit.max_failures must be greater than zero".to_string(),
            ));
        }
        if self.auth.rate_limit.block_duration_secs > MAX_BLOCK_DURATION.as_secs() {
            return Err(ConfigError::InvalidValue(format!(
                "auth.rate_limit.block_duration_secs must not exceed {}",
                MAX_BLOCK_DURATION.as_secs()
            )));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }

        for user in &self.users {
            if user.username.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "users[].username must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest request body the gate buffers for the username cross-check
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Token and brute-force configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Base64-encoded symmetric key for token signing and password hashing
    pub secret_key: Option<String>,

    /// Lifetime of issued tokens in minutes
    #[serde(default = "default_token_ttl")]
    pub token_ttl_minutes: u64,

    /// Failed-login blocking configuration
    #[serde(default)]
    pub rate_limit: AuthRateLimitConfig,
}

impl AuthConfig {
    /// Decode the configured secret key
    pub fn secret(&self) -> Result<ServerSecret, ConfigError> {
        let encoded = self
            .secret_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired("auth.secret_key".to_string()))?;

        ServerSecret::from_base64(encoded).map_err(|e| {
            ConfigError::InvalidValue(format!(
                "auth.secret_key must be base64 of at least {} bytes: {}",
                MIN_SECRET_BYTES, e
            ))
        })
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            token_ttl_minutes: default_token_ttl(),
            rate_limit: AuthRateLimitConfig::default(),
        }
    }
}

fn default_token_ttl() -> u64 {
    60
}

/// Rate limiting configuration for failed logins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthRateLimitConfig {
    /// Number of consecutive failed logins that blocks an IP
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Duration of a block (in seconds)
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// Interval of the background sweep of expired blocks (0 disables it)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for AuthRateLimitConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            block_duration_secs: default_block_duration(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_max_failures() -> u32 {
    3
}

fn default_block_duration() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Request gate configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Path prefixes admitted without a token
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            public_paths: default_public_paths(),
        }
    }
}

fn default_public_paths() -> Vec<String> {
    [
        "/api/authentication",
        "/api/trainees/register",
        "/api/trainers/register",
        "/api/error",
        "/error",
        "/health",
        "/api/swagger-ui",
        "/swagger-ui",
        "/v3/api-docs",
        "/swagger-resources",
        "/webjars",
        "/favicon.ico",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// A user record seeding the in-memory credential store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    /// Login name
    pub username: String,

    /// Hex HMAC-SHA256 of the password keyed with the server secret
    pub password_hash: String,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry export is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "auth-gateway".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format ("json" or "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
