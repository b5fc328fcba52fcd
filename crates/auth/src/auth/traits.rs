//! Traits for token transport operations
//!
//! The HTTP exchange with the authorization server lives outside this crate.
//! Hosts implement [`TokenTransport`] over whatever client they already use
//! and inject it into the token manager.

use async_trait::async_trait;

use super::types::{CodeExchange, TokenResponse};
use crate::error::TransportError;

/// Trait for OAuth token endpoint operations
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// Exchange a refresh token for a new token set
    ///
    /// # Errors
    /// - [`TransportError::Revoked`] when the server rejected the refresh
    ///   token for good (the manager then clears the stored record)
    /// - [`TransportError::Failed`] for anything that may succeed on retry
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, TransportError>;

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    /// Returns [`TransportError::Unsupported`] unless overridden
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenResponse, TransportError> {
        let _ = request;
        Err(TransportError::Unsupported("authorization_code grant"))
    }
}
