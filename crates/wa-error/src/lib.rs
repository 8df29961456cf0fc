//! Unified error taxonomy with stable error codes for the WhatsApp campaign
//! core.
//!
//! Every [`CoreError`] carries an [`ErrorCode`] (a machine-readable, stable
//! tag), a human-readable message, an optional cause chain, and arbitrary
//! key-value context. Use the builder returned by [`CoreError::new`] to
//! construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Template or input invariant violations.
    Validation,
    /// Per-account quota exhaustion.
    Quota,
    /// Gateway (provider) send failures.
    Gateway,
    /// Persistence failures.
    Storage,
    /// Campaign ownership / leasing failures.
    Lease,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Quota => "quota",
            Self::Gateway => "gateway",
            Self::Storage => "storage",
            Self::Lease => "lease",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that does not
/// change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// A template or control-plane input failed validation.
    ValidationFailed,

    // -- Quota --
    /// The account's per-minute or per-day send quota is exhausted.
    QuotaExceeded,

    // -- Gateway --
    /// A transient gateway failure (network, timeout, 5xx); safe to retry.
    GatewayTransient,
    /// A permanent gateway failure (bad address, auth); not retried.
    GatewayPermanent,

    // -- Storage --
    /// A persistence operation failed.
    StorageError,

    // -- Lease --
    /// The caller no longer owns the lease for a campaign it tried to mutate.
    LeaseLost,
    /// The caller attempted to claim a lease already held by another owner.
    LeaseConflict,

    // -- Control plane --
    /// The referenced campaign, message, or template was not found.
    NotFound,
    /// The requested transition conflicts with the resource's current state.
    Conflict,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationFailed => ErrorCategory::Validation,
            Self::QuotaExceeded => ErrorCategory::Quota,
            Self::GatewayTransient | Self::GatewayPermanent => ErrorCategory::Gateway,
            Self::StorageError => ErrorCategory::Storage,
            Self::LeaseLost | Self::LeaseConflict => ErrorCategory::Lease,
            Self::NotFound | Self::Conflict => ErrorCategory::Internal,
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns `true` if callers should retry the operation that produced
    /// this code (per `spec.md` §7's retryable classification).
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::GatewayTransient)
    }

    /// Stable `&'static str` representation of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::GatewayTransient => "GATEWAY_TRANSIENT",
            Self::GatewayPermanent => "GATEWAY_PERMANENT",
            Self::StorageError => "STORAGE_ERROR",
            Self::LeaseLost => "LEASE_LOST",
            Self::LeaseConflict => "LEASE_CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

/// Unified core error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Examples
///
/// ```
/// use wa_error::{CoreError, ErrorCode};
///
/// let err = CoreError::new(ErrorCode::QuotaExceeded, "minute bucket exhausted")
///     .with_context("account_id", "acct_1")
///     .with_context("retry_after_ms", 4000);
/// assert!(err.code.retryable());
/// ```
pub struct CoreError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl CoreError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.retryable()`.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.code.retryable()
    }

    /// Convenience constructor for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Convenience constructor for a quota-exceeded failure, carrying the
    /// number of milliseconds the caller should wait before retrying.
    pub fn quota_exceeded(message: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::new(ErrorCode::QuotaExceeded, message).with_context("retry_after_ms", retry_after_ms)
    }

    /// Convenience constructor for a transient gateway failure.
    pub fn gateway_transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GatewayTransient, message)
    }

    /// Convenience constructor for a permanent gateway failure.
    pub fn gateway_permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GatewayPermanent, message)
    }

    /// Convenience constructor for a storage failure.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
    }

    /// Convenience constructor for a lost-lease failure.
    pub fn lease_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LeaseLost, message)
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("CoreError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`CoreError`] (without the opaque source),
/// used as `lastError` on [`Campaign`](https://docs.rs/wa-core)-like
/// records and in API error bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&CoreError> for CoreErrorDto {
    fn from(err: &CoreError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<CoreErrorDto> for CoreError {
    fn from(dto: CoreErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::ValidationFailed,
        ErrorCode::QuotaExceeded,
        ErrorCode::GatewayTransient,
        ErrorCode::GatewayPermanent,
        ErrorCode::StorageError,
        ErrorCode::LeaseLost,
        ErrorCode::LeaseConflict,
        ErrorCode::NotFound,
        ErrorCode::Conflict,
        ErrorCode::ConfigInvalid,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = CoreError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = CoreError::new(ErrorCode::NotFound, "no such campaign");
        assert_eq!(err.to_string(), "[NOT_FOUND] no such campaign");
    }

    #[test]
    fn display_with_context() {
        let err = CoreError::new(ErrorCode::GatewayTransient, "timed out")
            .with_context("timeout_ms", 30_000);
        let s = err.to_string();
        assert!(s.starts_with("[GATEWAY_TRANSIENT] timed out"));
        assert!(s.contains("timeout_ms"));
    }

    #[test]
    fn retryable_codes() {
        assert!(ErrorCode::QuotaExceeded.retryable());
        assert!(ErrorCode::GatewayTransient.retryable());
        assert!(!ErrorCode::GatewayPermanent.retryable());
        assert!(!ErrorCode::ValidationFailed.retryable());
    }

    #[test]
    fn quota_exceeded_carries_retry_after() {
        let err = CoreError::quota_exceeded("minute bucket full", 1500);
        assert_eq!(err.code, ErrorCode::QuotaExceeded);
        assert_eq!(err.context["retry_after_ms"], serde_json::json!(1500));
        assert!(err.retryable());
    }

    #[test]
    fn category_mapping() {
        assert_eq!(
            ErrorCode::ValidationFailed.category(),
            ErrorCategory::Validation
        );
        assert_eq!(ErrorCode::QuotaExceeded.category(), ErrorCategory::Quota);
        assert_eq!(ErrorCode::GatewayTransient.category(), ErrorCategory::Gateway);
        assert_eq!(ErrorCode::GatewayPermanent.category(), ErrorCategory::Gateway);
        assert_eq!(ErrorCode::StorageError.category(), ErrorCategory::Storage);
        assert_eq!(ErrorCode::LeaseLost.category(), ErrorCategory::Lease);
        assert_eq!(ErrorCode::ConfigInvalid.category(), ErrorCategory::Config);
    }

    #[test]
    fn builder_with_source() {
        let src = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = CoreError::new(ErrorCode::StorageError, "write failed").with_source(src);
        assert!(err.source.is_some());
        assert_eq!(
            std::error::Error::source(&err).unwrap().to_string(),
            "access denied"
        );
    }

    #[test]
    fn all_codes_unique_and_roundtrip() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()));
            let json = serde_json::to_string(code).unwrap();
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *code);
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn dto_roundtrip_without_source() {
        let err = CoreError::new(ErrorCode::Conflict, "already cancelled")
            .with_context("campaign_id", "c1");
        let dto: CoreErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: CoreErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        assert!(back.source_message.is_none());
    }

    #[test]
    fn dto_roundtrip_with_source() {
        let src = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let err = CoreError::new(ErrorCode::StorageError, "crash").with_source(src);
        let dto: CoreErrorDto = (&err).into();
        assert_eq!(dto.source_message.as_deref(), Some("pipe broke"));
    }

    #[test]
    fn convenience_constructors() {
        assert_eq!(CoreError::validation("x").code, ErrorCode::ValidationFailed);
        assert_eq!(
            CoreError::gateway_transient("x").code,
            ErrorCode::GatewayTransient
        );
        assert_eq!(
            CoreError::gateway_permanent("x").code,
            ErrorCode::GatewayPermanent
        );
        assert_eq!(CoreError::storage("x").code, ErrorCode::StorageError);
        assert_eq!(CoreError::lease_lost("x").code, ErrorCode::LeaseLost);
    }
}
