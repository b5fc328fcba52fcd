//! Client-side OAuth 2.0 token lifecycle.
//!
//! Keeps a valid access token available to application code: PKCE login,
//! token decoding and claims extraction, pluggable persistence, and refresh
//! with at most one request in flight per manager.
//!
//! # Modules
//!
//! - [`auth`]: PKCE, codec, claims and the [`TokenManager`]
//! - [`storage`]: the [`StorageAdapter`] seam and its memory, file, cookie
//!   and keychain backends
//! - [`diagnostics`]: structured anomaly reporting
//! - [`time`]: injectable clocks
//! - [`error`]: error types and classification
//!
//! # Features
//!
//! - `keychain` (default): platform keychain backend via `keyring`
//! - `test-utils`: exports the [`testing`] module for downstream tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod diagnostics;
pub mod error;
pub mod storage;
pub mod time;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use auth::{
    ClaimsSnapshot, DecodedToken, PkcePair, TokenManager, TokenManagerConfig, TokenResponse,
    TokenState, TokenTransport,
};
pub use diagnostics::{Anomaly, AnomalyKind, DiagnosticsSink, MemorySink, TracingSink};
pub use error::{AuthError, AuthResult, ErrorClassification, ErrorSeverity, StorageError, TransportError};
pub use storage::StorageAdapter;
pub use time::{Clock, ManualClock, SystemClock};
