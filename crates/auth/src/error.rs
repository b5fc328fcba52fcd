//! Error types for the token lifecycle layer
//!
//! Errors are split per layer the same way the components are:
//!
//! - [`AuthError`]: what host applications see from the token manager, the
//!   codec and the PKCE helpers.
//! - [`StorageError`]: backend failures reported by a
//!   [`StorageAdapter`](crate::storage::StorageAdapter).
//! - [`TransportError`]: failures reported by the injected
//!   [`TokenTransport`](crate::auth::TokenTransport).
//!
//! Storage and transport errors convert into [`AuthError`] at the manager
//! boundary. All of them implement [`ErrorClassification`] so callers can make
//! retry and alerting decisions without matching on variants.
//!
//! | Variant | Propagation |
//! |---------|-------------|
//! | `EntropySourceUnavailable` | fatal, surfaced immediately |
//! | `MalformedToken` | surfaced, cached token treated as absent |
//! | `StorageUnavailable` | degraded on read, surfaced on write |
//! | `NoCredentials` | surfaced |
//! | `RefreshFailed` | surfaced to every caller attached to the refresh |

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors surfaced by the token lifecycle engine
///
/// `Clone` because one refresh outcome is handed to every caller attached to
/// the in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The platform cannot supply a cryptographically secure random source
    #[error("Secure entropy source unavailable: {0}")]
    EntropySourceUnavailable(String),

    /// Token is not a well-formed three-segment token or lacks a usable expiry
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Storage backend could not be reached or refused the operation
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// No refresh token (or no transport) available to satisfy the request
    #[error("No credentials available")]
    NoCredentials,

    /// The refresh transport failed
    #[error("Token refresh failed: {reason}")]
    RefreshFailed {
        /// Transport-provided reason
        reason: String,
        /// `true` when the authorization server revoked the refresh token
        revoked: bool,
    },

    /// Authorization callback state was missing or did not match
    #[error("Authorization state error: {0}")]
    AuthorizationState(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    pub(crate) fn refresh_failed(reason: impl Into<String>) -> Self {
        Self::RefreshFailed { reason: reason.into(), revoked: false }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedToken(reason.into())
    }

    /// Whether the error means the refresh token was revoked upstream
    #[must_use]
    pub fn is_revocation(&self) -> bool {
        matches!(self, Self::RefreshFailed { revoked: true, .. })
    }
}

/// Errors reported by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend unreachable, locked, or permission denied
    #[error("{backend} storage unavailable: {reason}")]
    Unavailable { backend: &'static str, reason: String },

    /// Value does not fit in the backend's size budget (bytes or entries,
    /// depending on the backend)
    #[error("{backend} storage quota exceeded: requested {requested}, limit {limit}")]
    QuotaExceeded { backend: &'static str, limit: usize, requested: usize },

    /// Key cannot be represented by the backend
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    /// Persisted data could not be (de)serialized
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub(crate) fn unavailable(backend: &'static str, reason: impl fmt::Display) -> Self {
        Self::Unavailable { backend, reason: reason.to_string() }
    }
}

/// Errors reported by a [`TokenTransport`](crate::auth::TokenTransport)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The authorization server explicitly revoked the refresh token
    /// (e.g. `invalid_grant`)
    #[error("Refresh token revoked: {0}")]
    Revoked(String),

    /// Any other transport or server failure
    #[error("Transport failure: {0}")]
    Failed(String),

    /// The transport does not implement the requested grant
    #[error("Operation not supported by transport: {0}")]
    Unsupported(&'static str),
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Revoked(reason) => Self::RefreshFailed { reason, revoked: true },
            other => Self::refresh_failed(other.to_string()),
        }
    }
}

/// Severity levels for monitoring and log level decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, expected conditions
    Info,
    /// Degraded but operational
    Warning,
    /// Failure requiring attention
    Error,
    /// Integrity or security at risk
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Classify errors by retryability and severity
pub trait ErrorClassification {
    /// Whether repeating the operation may succeed
    fn is_retryable(&self) -> bool;

    /// Severity for monitoring and alerting
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error requires immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }
}

impl ErrorClassification for AuthError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::StorageUnavailable(_) => true,
            Self::RefreshFailed { revoked, .. } => !revoked,
            Self::EntropySourceUnavailable(_)
            | Self::MalformedToken(_)
            | Self::NoCredentials
            | Self::AuthorizationState(_)
            | Self::Config(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NoCredentials => ErrorSeverity::Info,
            Self::StorageUnavailable(_) | Self::RefreshFailed { .. } => ErrorSeverity::Warning,
            Self::MalformedToken(_) | Self::AuthorizationState(_) | Self::Config(_) => {
                ErrorSeverity::Error
            }
            Self::EntropySourceUnavailable(_) => ErrorSeverity::Critical,
        }
    }
}

impl ErrorClassification for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Io(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Unavailable { .. } | Self::Io(_) => ErrorSeverity::Warning,
            Self::QuotaExceeded { .. } | Self::InvalidKey(_) | Self::Serialization(_) => {
                ErrorSeverity::Error
            }
        }
    }
}

impl ErrorClassification for TransportError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Failed(_) => ErrorSeverity::Warning,
            Self::Revoked(_) | Self::Unsupported(_) => ErrorSeverity::Error,
        }
    }
}
