/// Configuration for the identity core
///
/// Values come from an optional `tenantry.toml` file and from environment
/// variables prefixed `TENANTRY__`, with `__` separating nested sections. A
/// `.env` file is loaded first when present.
///
/// # Environment Variables
///
/// - `TENANTRY__DATABASE__URL`: PostgreSQL connection string
/// - `TENANTRY__SESSION__SECRET`: session signing secret (at least 32 bytes, required)
/// - `TENANTRY__SESSION__TTL_HOURS`: session validity (default: 24)
/// - `TENANTRY__TOKENS__INVITATION_HOURS`: invite window (default: 48)
///
/// Session and token windows must be positive and at most a year.
/// - `TENANTRY__MAIL__FRONTEND_BASE_URL`: base of every mailed link (required)
/// - `TENANTRY__MAIL__RELAY_URL`: mail relay endpoint; mails are only logged when unset
/// - `TENANTRY__OPERATION_TIMEOUT_SECS`: per-operation deadline (default: 30)
/// - `TENANTRY__LOG__FORMAT`: `pretty` or `json` (default: pretty)
///
/// # Example
///
/// ```no_run
/// use tenantry_core::config::IdentityConfig;
///
/// # fn example() -> Result<(), tenantry_core::config::ConfigError> {
/// let config = IdentityConfig::load()?;
/// let keys = config.session_keys()?;
/// println!("sessions issued by {}", keys.issuer());
/// # Ok(())
/// # }
/// ```

use crate::auth::jwt::{DEFAULT_SESSION_TTL_HOURS, MIN_SECRET_BYTES};
use crate::auth::{CredentialManager, HashParams, PasswordPolicy, SessionKeys};
use crate::db::pool::DatabaseConfig;
use crate::deadline::clamp_timeout;
use crate::notify::dispatcher::DEFAULT_QUEUE_CAPACITY;
use crate::notify::{DispatcherConfig, HttpRelayNotifier, LinkBuilder, LogNotifier, Notifier};
use crate::services::TokenLifetimes;
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment prefix, nested with `__`
pub const ENV_PREFIX: &str = "TENANTRY";

/// Longest accepted session or token window
pub const MAX_WINDOW_HOURS: i64 = 365 * 24;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be read
    #[error("failed to load config: {0}")]
    Load(String),

    /// Values do not fit the expected shape
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Values parsed but are unusable
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

fn check_window(field: &'static str, value: i64, per_hour: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::invalid(field, "must be positive"));
    }
    if value > MAX_WINDOW_HOURS * per_hour {
        return Err(ConfigError::invalid(
            field,
            format!("must not exceed {} hours", MAX_WINDOW_HOURS),
        ));
    }
    Ok(())
}

/// Complete configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    pub session: SessionConfig,

    #[serde(default)]
    pub tokens: TokenConfig,

    #[serde(default)]
    pub password: PasswordConfig,

    pub mail: MailConfig,

    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_operation_timeout_secs() -> u64 {
    30
}

/// Session signing
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    /// HS256 secret; generate with `openssl rand -hex 32`
    pub secret: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_issuer() -> String {
    "tenantry".to_string()
}

fn default_session_ttl_hours() -> i64 {
    DEFAULT_SESSION_TTL_HOURS
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("ttl_hours", &self.ttl_hours)
            .finish()
    }
}

/// Validity windows of mailed tokens
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub verification_minutes: i64,
    pub invitation_hours: i64,
    pub password_reset_minutes: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            verification_minutes: 60,
            invitation_hours: 48,
            password_reset_minutes: 60,
        }
    }
}

/// Password policy and Argon2 costs
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    pub policy: PasswordPolicy,
    pub hashing: HashParams,
}

/// Outbound mail
#[derive(Clone, Deserialize)]
pub struct MailConfig {
    /// Frontend the mailed links point at
    pub frontend_base_url: String,

    #[serde(default)]
    pub relay_url: Option<String>,

    #[serde(default)]
    pub relay_api_key: Option<String>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_in_flight() -> usize {
    8
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("frontend_base_url", &self.frontend_base_url)
            .field("relay_url", &self.relay_url)
            .field("relay_api_key", &self.relay_api_key.as_ref().map(|_| "<redacted>"))
            .field("queue_capacity", &self.queue_capacity)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

impl IdentityConfig {
    /// Loads `.env`, `tenantry.toml` and `TENANTRY__*` variables, then validates
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let source = config::Config::builder()
            .add_source(config::File::with_name("tenantry").required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        Self::from_source(source)
    }

    /// Deserializes and validates an already assembled source
    pub fn from_source(source: config::Config) -> Result<Self, ConfigError> {
        let config: Self = source
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the services cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::invalid(
                "session.secret",
                format!("must be at least {} bytes", MIN_SECRET_BYTES),
            ));
        }
        check_window("session.ttl_hours", self.session.ttl_hours, 1)?;
        check_window("tokens.verification_minutes", self.tokens.verification_minutes, 60)?;
        check_window("tokens.invitation_hours", self.tokens.invitation_hours, 1)?;
        check_window("tokens.password_reset_minutes", self.tokens.password_reset_minutes, 60)?;
        if self.password.policy.min_length == 0 || self.password.policy.legacy_min_length == 0 {
            return Err(ConfigError::invalid("password.policy", "minimum lengths must be positive"));
        }
        LinkBuilder::new(&self.mail.frontend_base_url)
            .map_err(|e| ConfigError::invalid("mail.frontend_base_url", e.to_string()))?;
        if self.mail.max_attempts == 0 {
            return Err(ConfigError::invalid("mail.max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Signing keys; the secret is read once here and never changes afterwards
    pub fn session_keys(&self) -> Result<SessionKeys, ConfigError> {
        SessionKeys::from_secret(
            self.session.secret.as_bytes(),
            &self.session.issuer,
            chrono::Duration::hours(self.session.ttl_hours),
        )
        .map_err(|e| ConfigError::invalid("session.secret", e.to_string()))
    }

    pub fn credential_manager(&self) -> CredentialManager {
        CredentialManager::new(self.password.policy, self.password.hashing)
    }

    pub fn token_lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            verification: chrono::Duration::minutes(self.tokens.verification_minutes),
            invitation: chrono::Duration::hours(self.tokens.invitation_hours),
            password_reset: chrono::Duration::minutes(self.tokens.password_reset_minutes),
        }
    }

    pub fn link_builder(&self) -> Result<LinkBuilder, ConfigError> {
        LinkBuilder::new(&self.mail.frontend_base_url)
            .map_err(|e| ConfigError::invalid("mail.frontend_base_url", e.to_string()))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_attempts: self.mail.max_attempts,
            initial_backoff: Duration::from_millis(self.mail.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.mail.max_backoff_ms),
            max_in_flight: self.mail.max_in_flight.max(1),
        }
    }

    /// The relay notifier when a relay URL is set, otherwise the log notifier
    pub fn notifier(&self) -> Result<Arc<dyn Notifier>, ConfigError> {
        match &self.mail.relay_url {
            Some(url) if !url.trim().is_empty() => {
                let notifier = HttpRelayNotifier::new(url, self.mail.relay_api_key.clone())
                    .map_err(|e| ConfigError::invalid("mail.relay_url", e.to_string()))?;
                Ok(Arc::new(notifier))
            }
            _ => {
                tracing::warn!("No mail relay configured, mails will only be logged");
                Ok(Arc::new(LogNotifier))
            }
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        clamp_timeout(Duration::from_secs(self.operation_timeout_secs))
    }
}
