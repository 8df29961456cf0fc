//! Configuration loading, validation, and merging for the WhatsApp campaign
//! core.
//!
//! This crate provides [`CoreConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files and producing advisory
//! [`ConfigWarning`]s. Nothing here panics on a bad file; every failure is a
//! typed [`ConfigError`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve
/// attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A pacing interval is unusually small, risking provider throttling.
    AggressivePacing {
        /// The configured minimum interval, in milliseconds.
        min_interval_ms: u64,
    },
    /// The parse cache capacity is unusually small.
    SmallParseCache {
        /// The configured capacity.
        capacity: usize,
    },
    /// The lease TTL is shorter than twice the heartbeat interval, risking
    /// spurious lease expiry under load.
    TightLeaseMargin {
        /// Configured lease TTL, in seconds.
        lease_ttl_secs: u64,
        /// Configured heartbeat interval, in seconds.
        heartbeat_secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AggressivePacing { min_interval_ms } => write!(
                f,
                "min_interval_ms of {min_interval_ms} is aggressive and may trip provider rate limits"
            ),
            Self::SmallParseCache { capacity } => {
                write!(f, "parse cache capacity of {capacity} is small for production traffic")
            }
            Self::TightLeaseMargin {
                lease_ttl_secs,
                heartbeat_secs,
            } => write!(
                f,
                "lease_ttl_secs ({lease_ttl_secs}) is less than 2x heartbeat_secs ({heartbeat_secs})"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// CoreConfig
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the campaign core.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct CoreConfig {
    /// Directory holding the local JSON-lines persistence store.
    pub data_dir: String,
    /// HTTP bind address for `wa-daemon`.
    pub bind: String,
    /// Default parse-cache capacity for the template processor.
    pub parse_cache_capacity: usize,
    /// Lease TTL, in seconds, for campaign ownership (`spec.md` §4.H).
    pub lease_ttl_secs: u64,
    /// Heartbeat interval, in seconds, for lease renewal.
    pub heartbeat_secs: u64,
    /// Reconciliation interval, in seconds (`spec.md` §4.H).
    pub reconcile_interval_secs: u64,
    /// Scheduled-message scan tick interval, in seconds (`spec.md` §4.I).
    pub single_message_tick_secs: u64,
    /// Size of the shared `Semaphore`-gated pool used to dispatch due
    /// scheduled messages concurrently within one tick (`spec.md` §5).
    pub single_message_max_parallel: usize,
    /// Default per-send timeout, in seconds (`spec.md` §5).
    pub send_timeout_secs: u64,
    /// Base delay for exponential backoff, in milliseconds.
    pub retry_base_ms: u64,
    /// Cap for exponential backoff, in milliseconds.
    pub retry_cap_ms: u64,
    /// Maximum retry attempts for a transient send failure.
    pub retry_max_attempts: u32,
    /// Process shutdown grace period, in seconds (`spec.md` §5).
    pub shutdown_grace_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: ".wa-backplane/data".to_string(),
            bind: "127.0.0.1:8099".to_string(),
            parse_cache_capacity: 100,
            lease_ttl_secs: 30,
            heartbeat_secs: 10,
            reconcile_interval_secs: 60,
            single_message_tick_secs: 15,
            single_message_max_parallel: 8,
            send_timeout_secs: 30,
            retry_base_ms: 500,
            retry_cap_ms: 15_000,
            retry_max_attempts: 5,
            shutdown_grace_secs: 10,
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] if the file does not exist, or
    /// [`ConfigError::ParseError`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from an in-memory TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if `text` is not valid TOML or
    /// does not match [`CoreConfig`]'s schema.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    /// Validate invariants that cannot be expressed in the type system,
    /// returning every problem found rather than short-circuiting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.parse_cache_capacity == 0 {
            reasons.push("parse_cache_capacity must be greater than 0".to_string());
        }
        if self.single_message_max_parallel == 0 {
            reasons.push("single_message_max_parallel must be greater than 0".to_string());
        }
        if self.retry_base_ms == 0 {
            reasons.push("retry_base_ms must be greater than 0".to_string());
        }
        if self.retry_cap_ms < self.retry_base_ms {
            reasons.push("retry_cap_ms must be >= retry_base_ms".to_string());
        }
        if self.lease_ttl_secs == 0 {
            reasons.push("lease_ttl_secs must be greater than 0".to_string());
        }
        if self.heartbeat_secs == 0 {
            reasons.push("heartbeat_secs must be greater than 0".to_string());
        }
        if self.heartbeat_secs >= self.lease_ttl_secs {
            reasons.push("heartbeat_secs must be less than lease_ttl_secs".to_string());
        }
        if self.bind.trim().is_empty() {
            reasons.push("bind must not be empty".to_string());
        }
        if self.data_dir.trim().is_empty() {
            reasons.push("data_dir must not be empty".to_string());
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Collect advisory warnings that do not block startup.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.parse_cache_capacity < 16 {
            warnings.push(ConfigWarning::SmallParseCache {
                capacity: self.parse_cache_capacity,
            });
        }
        if self.lease_ttl_secs < self.heartbeat_secs.saturating_mul(2) {
            warnings.push(ConfigWarning::TightLeaseMargin {
                lease_ttl_secs: self.lease_ttl_secs,
                heartbeat_secs: self.heartbeat_secs,
            });
        }
        warnings
    }
}
