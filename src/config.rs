//! Configuration for the sessionguard store and CLI

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lifetime given to new sessions under the fixed policy. Sliding
    /// sessions start with `idle_timeout` instead.
    #[serde(default = "default_session_ttl", with = "duration_str")]
    pub session_ttl: Duration,

    /// Hard cap on a session's lifetime, measured from creation.
    /// Sliding renewals and per-session TTLs never extend past it.
    #[serde(default = "default_max_lifetime", with = "duration_str")]
    pub max_lifetime: Duration,

    /// Destroy a user's sessions when the user is removed
    #[serde(default = "default_true")]
    pub cascade_on_remove: bool,

    /// Destroy a user's sessions when their password changes
    #[serde(default = "default_true")]
    pub revoke_on_password_change: bool,

    /// Initial capacity of the user and session maps
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// How often the background sweeper runs
    #[serde(default = "default_sweep_interval", with = "duration_str")]
    pub sweep_interval: Duration,

    /// Maximum sessions removed per write-lock hold during a sweep
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,

    /// JSON state file mirrored by `flush()`. In-memory only when unset.
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// HMAC key the CLI uses to turn passwords into opaque digests.
    /// Set via SG_DIGEST_KEY; never written back out by `to_toml_string`.
    #[serde(default)]
    pub digest_key: Option<String>,

    /// Log level filter string. Overridden by RUST_LOG.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Expiration policy. Must stay the last field: TOML tables follow plain keys.
    #[serde(default)]
    pub expiration: ExpirationPolicy,
}

/// How a session's `expires_at` evolves after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExpirationPolicy {
    /// `expires_at` is set once at creation
    #[default]
    Fixed,

    /// Each successful validation pushes `expires_at` to
    /// `now + idle_timeout`, capped by `max_lifetime`
    Sliding {
        #[serde(with = "duration_str")]
        idle_timeout: Duration,
    },
}

// Default value functions for serde
fn default_session_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_true() -> bool {
    true
}

fn default_initial_capacity() -> usize {
    16
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_batch_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "sessionguard=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_ttl: default_session_ttl(),
            max_lifetime: default_max_lifetime(),
            expiration: ExpirationPolicy::default(),
            cascade_on_remove: true,
            revoke_on_password_change: true,
            initial_capacity: default_initial_capacity(),
            sweep_interval: default_sweep_interval(),
            sweep_batch_size: default_sweep_batch_size(),
            state_file: None,
            digest_key: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ttl) = env_duration("SG_SESSION_TTL") {
            config.session_ttl = ttl;
        }
        if let Some(max) = env_duration("SG_MAX_LIFETIME") {
            config.max_lifetime = max;
        }

        if let Ok(mode) = std::env::var("SG_EXPIRATION") {
            if mode.eq_ignore_ascii_case("sliding") {
                config.expiration = ExpirationPolicy::Sliding {
                    idle_timeout: env_duration("SG_IDLE_TIMEOUT")
                        .unwrap_or(Duration::from_secs(30 * 60)),
                };
            }
        }

        if let Ok(v) = std::env::var("SG_CASCADE_ON_REMOVE") {
            config.cascade_on_remove = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SG_REVOKE_ON_PASSWORD_CHANGE") {
            config.revoke_on_password_change = v == "true" || v == "1";
        }

        if let Ok(cap) = std::env::var("SG_INITIAL_CAPACITY") {
            if let Ok(parsed) = cap.parse() {
                config.initial_capacity = parsed;
            }
        }
        if let Some(interval) = env_duration("SG_SWEEP_INTERVAL") {
            config.sweep_interval = interval;
        }
        if let Ok(batch) = std::env::var("SG_SWEEP_BATCH_SIZE") {
            if let Ok(parsed) = batch.parse() {
                config.sweep_batch_size = parsed;
            }
        }

        config.state_file = std::env::var("SG_STATE_FILE").ok().map(PathBuf::from);
        config.digest_key = std::env::var("SG_DIGEST_KEY").ok();

        if let Ok(level) = std::env::var("SG_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment.
    ///
    /// Search order: `SG_CONFIG`, `./sessionguard.toml`,
    /// `/etc/sessionguard/config.toml`. A file that exists but cannot be
    /// read or parsed is reported on stderr and skipped. Runs before logging
    /// is set up, so `tracing` would drop the message.
    pub fn load() -> Self {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var("SG_CONFIG") {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from("sessionguard.toml"));
        candidates.push(PathBuf::from("/etc/sessionguard/config.toml"));

        Self::first_loadable(&candidates).unwrap_or_else(Self::from_env)
    }

    fn first_loadable(candidates: &[PathBuf]) -> Option<Self> {
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::from_file(path) {
                Ok(config) => return Some(config),
                Err(e) => eprintln!(
                    "sessionguard: ignoring config file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        None
    }

    /// Reject settings the store cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl.is_zero() {
            return Err(ConfigError::Invalid("session_ttl must be non-zero".into()));
        }
        if self.session_ttl > self.max_lifetime {
            return Err(ConfigError::Invalid(
                "session_ttl must not exceed max_lifetime".into(),
            ));
        }
        if let ExpirationPolicy::Sliding { idle_timeout } = self.expiration {
            if idle_timeout.is_zero() {
                return Err(ConfigError::Invalid("idle_timeout must be non-zero".into()));
            }
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep_interval must be non-zero".into()));
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "sweep_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Serialize config to TOML string (excludes digest_key for security).
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let mut export = self.clone();
        export.digest_key = None;
        toml::to_string_pretty(&export).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

fn env_duration(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| humantime::parse_duration(&v).ok())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde adapter for humantime strings ("15m", "24h").
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
