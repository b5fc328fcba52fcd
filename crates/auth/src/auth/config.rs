//! Token manager configuration
//!
//! [`TokenManagerSettings`] holds the plain values a host can load from a
//! config file. [`TokenManagerConfig`] combines those values with the
//! injected collaborators (storage, transport, diagnostics sink, clock) and
//! is what [`TokenManager::new`](super::TokenManager::new) consumes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::codec::{DecodeOptions, DEFAULT_SKEW_SECONDS};
use super::pkce::{DEFAULT_VERIFIER_LEN, MAX_VERIFIER_LEN, MIN_VERIFIER_LEN};
use super::traits::TokenTransport;
use crate::diagnostics::DiagnosticsSink;
use crate::error::{AuthError, AuthResult};
use crate::storage::StorageAdapter;
use crate::time::{Clock, SystemClock};

/// Serializable token manager settings
///
/// ```toml
/// namespace = "acme"
/// skew_seconds = 30
/// strict_decoding = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenManagerSettings {
    /// Prefix of every storage key (`{namespace}.access_token`, ...)
    pub namespace: String,
    /// Clock-skew tolerance applied to expiry checks
    pub skew_seconds: u64,
    /// Require signed (three-segment, non-empty signature) tokens
    pub strict_decoding: bool,
    /// PKCE verifier length used by the manager
    pub verifier_length: usize,
}

impl Default for TokenManagerSettings {
    fn default() -> Self {
        Self {
            namespace: "tokenward".to_string(),
            skew_seconds: DEFAULT_SKEW_SECONDS,
            strict_decoding: false,
            verifier_length: DEFAULT_VERIFIER_LEN,
        }
    }
}

impl TokenManagerSettings {
    /// Parse settings from TOML; missing fields take their defaults
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] if the TOML is invalid or the settings
    /// fail validation
    pub fn from_toml_str(contents: &str) -> AuthResult<Self> {
        let settings: Self = toml::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Invalid TOML format: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from JSON; missing fields take their defaults
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] if the JSON is invalid or the settings
    /// fail validation
    pub fn from_json_str(contents: &str) -> AuthResult<Self> {
        let settings: Self = serde_json::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Invalid JSON format: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] when the namespace is empty or contains
    /// whitespace, or the verifier length is outside RFC 7636 bounds
    pub fn validate(&self) -> AuthResult<()> {
        if self.namespace.is_empty() {
            return Err(AuthError::Config("namespace cannot be empty".to_string()));
        }
        if self.namespace.chars().any(char::is_whitespace) {
            return Err(AuthError::Config(format!(
                "namespace '{}' must not contain whitespace",
                self.namespace
            )));
        }
        if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&self.verifier_length) {
            return Err(AuthError::Config(format!(
                "verifier_length must be within {MIN_VERIFIER_LEN}..={MAX_VERIFIER_LEN}, got {}",
                self.verifier_length
            )));
        }
        Ok(())
    }
}

/// Runtime configuration for a [`TokenManager`](super::TokenManager)
#[derive(Clone)]
pub struct TokenManagerConfig {
    pub(crate) settings: TokenManagerSettings,
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) transport: Option<Arc<dyn TokenTransport>>,
    pub(crate) diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl TokenManagerConfig {
    /// Configuration with default settings for `namespace`
    #[must_use]
    pub fn new(namespace: impl Into<String>, storage: Arc<dyn StorageAdapter>) -> Self {
        let settings =
            TokenManagerSettings { namespace: namespace.into(), ..TokenManagerSettings::default() };
        Self::from_settings(settings, storage)
    }

    /// Configuration from loaded settings
    #[must_use]
    pub fn from_settings(settings: TokenManagerSettings, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            settings,
            storage,
            transport: None,
            diagnostics: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the refresh/code-exchange transport
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn TokenTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the anomaly sink
    #[must_use]
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    #[must_use]
    pub fn with_skew_seconds(mut self, skew_seconds: u64) -> Self {
        self.settings.skew_seconds = skew_seconds;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_strict_decoding(mut self, strict: bool) -> Self {
        self.settings.strict_decoding = strict;
        self
    }

    #[must_use]
    pub fn with_verifier_length(mut self, length: usize) -> Self {
        self.settings.verifier_length = length;
        self
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    #[must_use]
    pub fn settings(&self) -> &TokenManagerSettings {
        &self.settings
    }

    pub(crate) fn decode_options(&self) -> DecodeOptions {
        DecodeOptions { strict: self.settings.strict_decoding }
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] if the settings are invalid
    pub fn validate(&self) -> AuthResult<()> {
        self.settings.validate()
    }
}

impl fmt::Debug for TokenManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManagerConfig")
            .field("settings", &self.settings)
            .field("storage", &self.storage.backend_name())
            .field("transport", &self.transport.is_some())
            .field("diagnostics", &self.diagnostics.is_some())
            .finish_non_exhaustive()
    }
}
