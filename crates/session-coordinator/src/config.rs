//! Session coordinator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default media-room service endpoint returned to joining clients.
pub const DEFAULT_MEDIA_SERVER_URL: &str = "ws://localhost:7880";

/// Default credential lifetime for authenticated members (6 hours).
pub const DEFAULT_MEMBER_TOKEN_TTL_SECONDS: u64 = 21_600;

/// Default credential lifetime for anonymous guests (15 minutes).
pub const DEFAULT_GUEST_TOKEN_TTL_SECONDS: u64 = 900;

/// Hard upper bound for any room credential lifetime (24 hours).
pub const MAX_TOKEN_TTL_SECONDS: u64 = 86_400;

/// Default model requested from the generative-text service.
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

/// Default bound on a single summarization call.
pub const DEFAULT_AI_TIMEOUT_SECONDS: u64 = 30;

/// Final segments required before the AI step runs at all.
pub const DEFAULT_SUMMARY_MIN_FINAL_SEGMENTS: u64 = 5;

/// Additional final segments between incremental enrichment passes.
pub const DEFAULT_SUMMARY_REFRESH_INTERVAL_SEGMENTS: u64 = 20;

/// Default expiry sweep interval.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// A finalization claim older than this may be taken over by another attempt.
pub const DEFAULT_FINALIZATION_STALE_SECONDS: u64 = 600;

/// Default per-request timeout for HTTP handlers.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default drain period between readiness going false and shutdown.
pub const DEFAULT_SHUTDOWN_DRAIN_SECONDS: u64 = 5;

/// Where meetings, participants, segments and artifacts are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// PostgreSQL via sqlx.
    Postgres,
    /// Process-local store. Loses all state on restart.
    Memory,
}

/// Generative-text service settings. Absent when no AI endpoint is configured.
#[derive(Clone)]
pub struct AiConfig {
    /// Chat completions endpoint URL.
    pub api_url: String,

    /// Bearer API key.
    pub api_key: SecretString,

    /// Model name sent with each request.
    pub model: String,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

/// Session coordinator configuration.
#[derive(Clone)]
pub struct Config {
    /// Storage backend (default: postgres).
    pub storage_backend: StorageBackend,

    /// PostgreSQL connection URL. Required for the postgres backend.
    pub database_url: Option<String>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// HMAC secret used to validate user tokens from the identity provider.
    pub identity_jwt_secret: SecretString,

    /// JWT clock skew tolerance for iat validation.
    pub jwt_clock_skew: Duration,

    /// Media-room service endpoint handed to clients with their credential.
    pub media_server_url: String,

    /// Media-room API key (credential issuer). Missing means joins fail with a
    /// configuration error.
    pub media_api_key: Option<String>,

    /// Media-room API secret (credential signing key).
    pub media_api_secret: Option<SecretString>,

    /// Credential lifetime for authenticated members.
    pub member_token_ttl_seconds: u64,

    /// Credential lifetime for guests joining via a share link.
    pub guest_token_ttl_seconds: u64,

    /// Generative-text service. `None` runs with the fallback summarizer only.
    pub ai: Option<AiConfig>,

    /// Bound on a single summarization call.
    pub ai_timeout: Duration,

    /// Final segments required before any AI pass.
    pub summary_min_final_segments: usize,

    /// Final segments between incremental enrichment passes.
    pub summary_refresh_interval_segments: usize,

    /// Expiry sweep interval.
    pub sweep_interval: Duration,

    /// Age after which a stuck finalization claim may be retaken.
    pub finalization_stale_after: Duration,

    /// Per-request timeout for HTTP handlers.
    pub request_timeout: Duration,

    /// Drain period before shutdown.
    pub shutdown_drain: Duration,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("storage_backend", &self.storage_backend)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("identity_jwt_secret", &"[REDACTED]")
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("media_server_url", &self.media_server_url)
            .field("media_api_key", &self.media_api_key)
            .field(
                "media_api_secret",
                &self.media_api_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("member_token_ttl_seconds", &self.member_token_ttl_seconds)
            .field("guest_token_ttl_seconds", &self.guest_token_ttl_seconds)
            .field("ai", &self.ai)
            .field("ai_timeout", &self.ai_timeout)
            .field(
                "summary_min_final_segments",
                &self.summary_min_final_segments,
            )
            .field(
                "summary_refresh_interval_segments",
                &self.summary_refresh_interval_segments,
            )
            .field("sweep_interval", &self.sweep_interval)
            .field("finalization_stale_after", &self.finalization_stale_after)
            .field("request_timeout", &self.request_timeout)
            .field("shutdown_drain", &self.shutdown_drain)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid storage backend: {0}")]
    InvalidStorageBackend(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid token TTL configuration: {0}")]
    InvalidTokenTtl(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Parse an optional numeric variable, enforcing an inclusive range.
fn parse_bounded(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{} must be a valid non-negative integer, got '{}': {}",
            key, value_str, e
        ))
    })?;

    if value < min || value > max {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, value
        )));
    }

    Ok(value)
}

/// Treat unset and blank variables the same way.
fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let storage_backend = match non_empty(vars, "STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidStorageBackend(format!(
                    "STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let database_url = non_empty(vars, "DATABASE_URL");
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let identity_jwt_secret = non_empty(vars, "IDENTITY_JWT_SECRET")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("IDENTITY_JWT_SECRET".to_string()))?;

        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            let value = value.unsigned_abs();
            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let media_server_url = vars
            .get("MEDIA_SERVER_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_MEDIA_SERVER_URL.to_string());

        let media_api_key = non_empty(vars, "MEDIA_API_KEY");
        let media_api_secret = non_empty(vars, "MEDIA_API_SECRET").map(SecretString::from);

        let member_token_ttl_seconds = parse_bounded(
            vars,
            "MEMBER_TOKEN_TTL_SECONDS",
            DEFAULT_MEMBER_TOKEN_TTL_SECONDS,
            1,
            MAX_TOKEN_TTL_SECONDS,
        )
        .map_err(|e| ConfigError::InvalidTokenTtl(e.to_string()))?;

        let guest_token_ttl_seconds = parse_bounded(
            vars,
            "GUEST_TOKEN_TTL_SECONDS",
            DEFAULT_GUEST_TOKEN_TTL_SECONDS,
            1,
            MAX_TOKEN_TTL_SECONDS,
        )
        .map_err(|e| ConfigError::InvalidTokenTtl(e.to_string()))?;

        if guest_token_ttl_seconds > member_token_ttl_seconds {
            return Err(ConfigError::InvalidTokenTtl(format!(
                "GUEST_TOKEN_TTL_SECONDS ({}) must not exceed MEMBER_TOKEN_TTL_SECONDS ({})",
                guest_token_ttl_seconds, member_token_ttl_seconds
            )));
        }

        let ai = match non_empty(vars, "AI_API_URL") {
            Some(api_url) => {
                let api_key = non_empty(vars, "AI_API_KEY")
                    .map(SecretString::from)
                    .ok_or_else(|| ConfigError::MissingEnvVar("AI_API_KEY".to_string()))?;
                let model =
                    non_empty(vars, "AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.to_string());
                Some(AiConfig {
                    api_url,
                    api_key,
                    model,
                })
            }
            None => None,
        };

        let ai_timeout = Duration::from_secs(parse_bounded(
            vars,
            "AI_TIMEOUT_SECONDS",
            DEFAULT_AI_TIMEOUT_SECONDS,
            1,
            300,
        )?);

        let summary_min_final_segments = parse_bounded(
            vars,
            "SUMMARY_MIN_FINAL_SEGMENTS",
            DEFAULT_SUMMARY_MIN_FINAL_SEGMENTS,
            1,
            10_000,
        )? as usize;

        let summary_refresh_interval_segments = parse_bounded(
            vars,
            "SUMMARY_REFRESH_INTERVAL_SEGMENTS",
            DEFAULT_SUMMARY_REFRESH_INTERVAL_SEGMENTS,
            1,
            10_000,
        )? as usize;

        let sweep_interval = Duration::from_secs(parse_bounded(
            vars,
            "SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
            1,
            86_400,
        )?);

        let finalization_stale_after = Duration::from_secs(parse_bounded(
            vars,
            "FINALIZATION_STALE_SECONDS",
            DEFAULT_FINALIZATION_STALE_SECONDS,
            60,
            86_400,
        )?);

        let request_timeout = Duration::from_secs(parse_bounded(
            vars,
            "REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
            1,
            600,
        )?);

        let shutdown_drain = Duration::from_secs(parse_bounded(
            vars,
            "SHUTDOWN_DRAIN_SECONDS",
            DEFAULT_SHUTDOWN_DRAIN_SECONDS,
            0,
            300,
        )?);

        Ok(Config {
            storage_backend,
            database_url,
            bind_address,
            identity_jwt_secret,
            jwt_clock_skew,
            media_server_url,
            media_api_key,
            media_api_secret,
            member_token_ttl_seconds,
            guest_token_ttl_seconds,
            ai,
            ai_timeout,
            summary_min_final_segments,
            summary_refresh_interval_segments,
            sweep_interval,
            finalization_stale_after,
            request_timeout,
            shutdown_drain,
        })
    }
}
