//! Client-side OAuth 2.0 + PKCE token lifecycle
//!
//! # Features
//!
//! - **PKCE**: RFC 7636 verifier/challenge generation and CSRF `state`
//! - **Token Codec**: JWT-shaped decoding without signature verification
//! - **Claims**: typed permissions, roles, feature flags and profile facts
//! - **Token Management**: cached access tokens with single-flight refresh
//!   through a pluggable [`TokenTransport`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   TokenManager   │  Lifecycle + single-flight refresh
//! └────────┬─────────┘
//!          │
//!          ├──► TokenTransport   (refresh / code exchange, caller-provided)
//!          ├──► StorageAdapter   (memory, file, cookie, keychain)
//!          ├──► codec            (decode, expiry checks)
//!          └──► ClaimsExtractor  (typed claims, diagnostics)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokenward_auth::auth::{AuthorizeParams, TokenManager, TokenManagerConfig};
//! use tokenward_auth::storage::MemoryStorage;
//!
//! # async fn run() -> tokenward_auth::error::AuthResult<()> {
//! let config = TokenManagerConfig::new("acme", Arc::new(MemoryStorage::new()));
//! let manager = TokenManager::new(config)?;
//!
//! let params = AuthorizeParams::new(
//!     "https://issuer.example.com/oauth2/auth",
//!     "client123",
//!     "http://localhost:3000/callback",
//! );
//! let request = manager.begin_authorization(&params).await?;
//! println!("Open {}", request.url);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - **[`pkce`]**: verifier, challenge and state generation
//! - **[`codec`]**: token decoding and expiry checks
//! - **[`claims`]**: claims extraction
//! - **[`types`]**: token responses, stored records, storage keys
//! - **[`traits`]**: the [`TokenTransport`] seam
//! - **[`config`]**: manager settings and wiring
//! - **[`authorize`]**: authorization URL construction
//! - **[`token_manager`]**: the lifecycle engine

pub mod authorize;
pub mod claims;
pub mod codec;
pub mod config;
pub mod pkce;
pub mod token_manager;
pub mod traits;
pub mod types;

// Re-export commonly used types and functions
pub use authorize::{build_authorization_url, AuthorizationRequest, AuthorizeParams};
pub use claims::{ClaimsExtractor, ClaimsSnapshot, FlagValue, UserProfile};
pub use codec::{DecodeOptions, DecodedToken};
pub use config::{TokenManagerConfig, TokenManagerSettings};
pub use pkce::PkcePair;
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state, validate_state};
pub use token_manager::TokenManager;
pub use traits::TokenTransport;
pub use types::{
    CodeExchange, OAuthErrorResponse, StorageKeys, StoredTokenRecord, TokenResponse, TokenState,
};
