//! OAuth 2.0 token types
//!
//! Wire shapes exchanged with the authorization server and the record the
//! token manager persists through a storage adapter.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Lifecycle state of a token manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenState {
    /// No cached token
    Empty,
    /// Cached token present and unexpired
    Valid,
    /// Cached token present but expired or about to expire within the skew
    Expired,
    /// A refresh is in flight
    Refreshing,
    /// Last refresh attempt errored and no valid token is available
    Failed,
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Valid => "valid",
            Self::Expired => "expired",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// OAuth token response from authorization server
///
/// Standard OAuth 2.0 token response format (RFC 6749 §5.1), as returned by
/// both the refresh grant and the authorization-code grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// OpenID Connect ID token; some refresh responses omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Rotated refresh token, when the server issues one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Advisory lifetime in seconds; expiry is always taken from the access
    /// token's own `exp` claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Response carrying only an access token
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: None,
            refresh_token: None,
            expires_in: None,
            token_type: Some("Bearer".to_string()),
            scope: None,
        }
    }

    #[must_use]
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = Some(seconds);
        self
    }
}

/// OAuth error response from authorization server
///
/// Standard OAuth 2.0 error response format (RFC 6749 §5.2). Transports can
/// deserialize failed token responses into this and convert it with
/// [`OAuthErrorResponse::into_transport_error`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorResponse {
    /// Map to a [`TransportError`]
    ///
    /// `invalid_grant` means the refresh token is expired, revoked or was
    /// issued to another client, so it becomes [`TransportError::Revoked`].
    /// Every other code is a plain failure.
    #[must_use]
    pub fn into_transport_error(self) -> TransportError {
        let message = self.to_string();
        if self.error == "invalid_grant" {
            TransportError::Revoked(message)
        } else {
            TransportError::Failed(message)
        }
    }
}

impl fmt::Display for OAuthErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for OAuthErrorResponse {}

/// Authorization-code exchange request handed to the transport
#[derive(Clone, PartialEq, Eq)]
pub struct CodeExchange {
    pub code: String,
    pub code_verifier: String,
}

impl fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExchange")
            .field("code", &"[redacted]")
            .field("code_verifier", &"[redacted]")
            .finish()
    }
}

/// Tokens persisted for one namespace
///
/// `expires_at` is always the access token's decoded `exp`.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredTokenRecord {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for StoredTokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokenRecord")
            .field("access_token", &"[redacted]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Storage keys for one namespace, `{namespace}.{suffix}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: String,
    pub code_verifier: String,
    pub auth_state: String,
}

impl StorageKeys {
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        let key = |suffix: &str| format!("{namespace}.{suffix}");
        Self {
            access_token: key("access_token"),
            id_token: key("id_token"),
            refresh_token: key("refresh_token"),
            expires_at: key("expires_at"),
            code_verifier: key("code_verifier"),
            auth_state: key("auth_state"),
        }
    }

    /// Keys that make up the stored token record
    #[must_use]
    pub fn token_keys(&self) -> [&str; 4] {
        [&self.access_token, &self.id_token, &self.refresh_token, &self.expires_at]
    }

    /// Keys of an in-progress authorization attempt
    #[must_use]
    pub fn authorization_keys(&self) -> [&str; 2] {
        [&self.code_verifier, &self.auth_state]
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::types.
    use super::*;

    /// Validates deserialization of a standard token endpoint body.
    ///
    /// Assertions:
    /// - Confirms `access_token`, `refresh_token` and `expires_in` are read.
    /// - Ensures a missing `id_token` deserializes as `None`.
    #[test]
    fn test_token_response_deserialization() {
        let body = r#"{
            "access_token": "access123",
            "refresh_token": "refresh456",
            "token_type": "Bearer",
            "expires_in": 3600
        }"#;

        let response: TokenResponse = serde_json::from_str(body).unwrap();

        assert_eq!(response.access_token, "access123");
        assert_eq!(response.refresh_token.as_deref(), Some("refresh456"));
        assert_eq!(response.expires_in, Some(3600));
        assert!(response.id_token.is_none());
    }

    /// Validates the oauth error conversion scenario.
    ///
    /// Assertions:
    /// - Ensures `invalid_grant` maps to `TransportError::Revoked`.
    /// - Ensures other codes map to `TransportError::Failed`.
    /// - Ensures the description is part of the message.
    #[test]
    fn test_oauth_error_into_transport_error() {
        let revoked: OAuthErrorResponse = serde_json::from_str(
            r#"{"error": "invalid_grant", "error_description": "The refresh token is invalid"}"#,
        )
        .unwrap();
        match revoked.into_transport_error() {
            TransportError::Revoked(msg) => assert!(msg.contains("refresh token is invalid")),
            other => panic!("unexpected: {other:?}"),
        }

        let busy = OAuthErrorResponse {
            error: "temporarily_unavailable".to_string(),
            error_description: None,
        };
        assert_eq!(
            busy.into_transport_error(),
            TransportError::Failed("temporarily_unavailable".to_string())
        );
    }

    #[test]
    fn test_storage_keys_are_namespaced() {
        let keys = StorageKeys::new("acme");

        assert_eq!(keys.access_token, "acme.access_token");
        assert_eq!(keys.auth_state, "acme.auth_state");
        assert_eq!(keys.token_keys().len(), 4);
        assert!(keys.token_keys().iter().all(|k| k.starts_with("acme.")));
    }

    #[test]
    fn test_record_debug_redacts_secrets() {
        let record = StoredTokenRecord {
            access_token: "secret-access".to_string(),
            id_token: None,
            refresh_token: Some("secret-refresh".to_string()),
            expires_at: Utc::now(),
        };

        let rendered = format!("{record:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }
}
