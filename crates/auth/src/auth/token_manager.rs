//! Token manager with single-flight refresh
//!
//! Manages the token lifecycle for one namespace:
//! - Hydrates its cache from storage on first use
//! - Serves cached access tokens while they are unexpired
//! - Refreshes through the injected transport, with at most one refresh in
//!   flight no matter how many callers ask at once
//! - Persists every accepted token set, and clears everything on sign-out or
//!   revocation
//!
//! # Concurrency
//!
//! The in-memory state sits behind a short-lived `parking_lot` lock that is
//! never held across an await. A refresh is a spawned task wrapped in a
//! [`Shared`] future stored in the state: the first caller creates it and
//! later callers clone it, inside the same critical section, so there is no
//! window in which two callers both decide to start one. The task installs
//! its outcome and clears the slot under that lock as well.
//!
//! Storage mutations are serialized by an async write gate. Sign-out and
//! explicit token storage bump an epoch, and a refresh that finishes under an
//! older epoch is discarded instead of resurrecting tokens.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::authorize::{build_authorization_url, AuthorizationRequest, AuthorizeParams};
use super::claims::{ClaimsExtractor, ClaimsSnapshot, UserProfile};
use super::codec::{self, DecodeOptions, DecodedToken};
use super::config::TokenManagerConfig;
use super::pkce::{self, PkcePair};
use super::traits::TokenTransport;
use super::types::{CodeExchange, StorageKeys, StoredTokenRecord, TokenResponse, TokenState};
use crate::diagnostics::{AnomalyKind, Diagnostics};
use crate::error::{AuthError, AuthResult, StorageResult, TransportError};
use crate::storage::StorageAdapter;
use crate::time::Clock;

type RefreshFuture = Shared<BoxFuture<'static, AuthResult<TokenSnapshot>>>;

/// A persisted record together with its decoded access token
#[derive(Clone)]
struct TokenSnapshot {
    record: Arc<StoredTokenRecord>,
    access: Arc<DecodedToken>,
}

struct RefreshSlot {
    id: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct Core {
    loaded: bool,
    current: Option<TokenSnapshot>,
    refresh_token: Option<String>,
    last_error: Option<AuthError>,
    slot: Option<RefreshSlot>,
    next_slot_id: u64,
    epoch: u64,
}

/// Result of reading the persisted record
struct Hydrated {
    snapshot: Option<TokenSnapshot>,
    refresh_token: Option<String>,
    /// Every key was read without a storage error
    complete: bool,
}

/// How a finished refresh changes the cached state
enum Settlement {
    /// New tokens accepted and persisted
    Installed(TokenSnapshot),
    /// New tokens accepted but the write failed; kept in memory only
    Unpersisted(TokenSnapshot, AuthError),
    /// Refresh failed; refresh token kept for a later attempt
    Failed(AuthError),
    /// Refresh token revoked; everything cleared
    Revoked(AuthError),
}

struct Inner {
    namespace: String,
    keys: StorageKeys,
    storage: Arc<dyn StorageAdapter>,
    transport: Option<Arc<dyn TokenTransport>>,
    diagnostics: Diagnostics,
    claims: ClaimsExtractor,
    clock: Arc<dyn Clock>,
    skew_seconds: u64,
    decode_options: DecodeOptions,
    verifier_length: usize,
    core: Mutex<Core>,
    write_gate: tokio::sync::Mutex<()>,
}

/// Token lifecycle manager for one namespace
///
/// Cheap to clone; clones share state. Create one per token family and share
/// it across the application.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    /// Create a manager from a validated configuration
    ///
    /// No storage access happens here; the cache is hydrated by the first
    /// operation that needs it.
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] if the configuration is invalid
    pub fn new(config: TokenManagerConfig) -> AuthResult<Self> {
        config.validate()?;
        let decode_options = config.decode_options();
        let diagnostics = Diagnostics::new(config.diagnostics);
        let settings = config.settings;

        Ok(Self {
            inner: Arc::new(Inner {
                keys: StorageKeys::new(&settings.namespace),
                namespace: settings.namespace,
                storage: config.storage,
                transport: config.transport,
                claims: ClaimsExtractor::with_diagnostics(diagnostics.clone()),
                diagnostics,
                clock: config.clock,
                skew_seconds: settings.skew_seconds,
                decode_options,
                verifier_length: settings.verifier_length,
                core: Mutex::new(Core::default()),
                write_gate: tokio::sync::Mutex::new(()),
            }),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Storage keys used by this manager
    #[must_use]
    pub fn storage_keys(&self) -> &StorageKeys {
        &self.inner.keys
    }

    /// Get a valid access token, refreshing if needed
    ///
    /// # Errors
    /// - [`AuthError::NoCredentials`] if there is no token and no way to
    ///   refresh
    /// - [`AuthError::RefreshFailed`] if the refresh transport failed
    /// - [`AuthError::MalformedToken`] if the issuer returned an unusable
    ///   token
    /// - [`AuthError::StorageUnavailable`] if the refreshed tokens could not
    ///   be persisted
    pub async fn get_access_token(&self) -> AuthResult<String> {
        Ok(self.get_decoded_access_token().await?.raw().to_string())
    }

    /// Like [`get_access_token`](Self::get_access_token), returning the
    /// decoded token
    ///
    /// Callers attached to the same refresh receive the same `Arc`.
    ///
    /// # Errors
    /// See [`get_access_token`](Self::get_access_token)
    pub async fn get_decoded_access_token(&self) -> AuthResult<Arc<DecodedToken>> {
        self.ensure_loaded().await;

        let refresh = {
            let mut core = self.inner.core.lock();
            if let Some(snapshot) = core.current.as_ref() {
                if self.inner.is_usable(&snapshot.access) {
                    return Ok(Arc::clone(&snapshot.access));
                }
            }
            self.attach_or_start(&mut core)?
        };

        Ok(refresh.await?.access)
    }

    /// Force a refresh, sharing any refresh already in flight
    ///
    /// # Errors
    /// See [`get_access_token`](Self::get_access_token)
    pub async fn refresh_now(&self) -> AuthResult<Arc<DecodedToken>> {
        self.ensure_loaded().await;
        let refresh = {
            let mut core = self.inner.core.lock();
            self.attach_or_start(&mut core)?
        };
        Ok(refresh.await?.access)
    }

    /// Currently stored ID token, if any
    pub async fn get_id_token(&self) -> Option<String> {
        self.ensure_loaded().await;
        let core = self.inner.core.lock();
        core.current.as_ref().and_then(|s| s.record.id_token.clone())
    }

    /// Claims of the cached access token
    ///
    /// Extracted on every call from whatever token is cached; no refresh is
    /// attempted.
    ///
    /// # Errors
    /// Returns [`AuthError::NoCredentials`] if no access token is cached
    pub async fn get_claims(&self) -> AuthResult<ClaimsSnapshot> {
        self.ensure_loaded().await;
        let access = {
            let core = self.inner.core.lock();
            core.current.as_ref().map(|s| Arc::clone(&s.access))
        };
        let access = access.ok_or(AuthError::NoCredentials)?;
        Ok(self.inner.claims.extract(&access))
    }

    /// Identity facts from the stored ID token
    ///
    /// # Errors
    /// - [`AuthError::NoCredentials`] if no ID token is stored
    /// - [`AuthError::MalformedToken`] if the ID token cannot be decoded
    pub async fn get_user_profile(&self) -> AuthResult<UserProfile> {
        let id_token = self.get_id_token().await.ok_or(AuthError::NoCredentials)?;
        let decoded = codec::decode_with(&id_token, self.inner.decode_options)?;
        Ok(self.inner.claims.user_profile(&decoded))
    }

    /// Whether a valid access token is available (refreshing if possible)
    pub async fn is_authenticated(&self) -> bool {
        match self.get_decoded_access_token().await {
            Ok(_) => true,
            Err(e) => {
                debug!(namespace = %self.inner.namespace, error = %e, "Not authenticated");
                false
            }
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> TokenState {
        self.ensure_loaded().await;
        let core = self.inner.core.lock();
        self.inner.derive_state(&core)
    }

    /// Generate a PKCE pair with the configured verifier length
    ///
    /// # Errors
    /// Returns [`AuthError::EntropySourceUnavailable`] if the OS random
    /// source fails
    pub fn create_pkce_pair(&self) -> AuthResult<PkcePair> {
        PkcePair::from_verifier(pkce::generate_code_verifier_with_length(
            self.inner.verifier_length,
        )?)
    }

    /// Store a token set obtained outside the manager
    ///
    /// Supersedes any refresh in flight. The expiry is taken from the access
    /// token's `exp` claim.
    ///
    /// # Errors
    /// - [`AuthError::MalformedToken`] if the access token is unusable
    /// - [`AuthError::StorageUnavailable`] if persisting fails (the tokens
    ///   are still used for this process)
    pub async fn store_tokens(&self, response: TokenResponse) -> AuthResult<Arc<DecodedToken>> {
        let _gate = self.inner.write_gate.lock().await;
        let snapshot = self.inner.build_snapshot(response, None, None)?;

        {
            let mut core = self.inner.core.lock();
            core.epoch += 1;
            core.slot = None;
        }

        let persisted = self.inner.persist(&snapshot.record).await;
        {
            let mut core = self.inner.core.lock();
            self.inner.apply(&mut core, snapshot.clone());
        }
        info!(namespace = %self.inner.namespace, "Tokens stored");

        persisted?;
        Ok(snapshot.access)
    }

    /// Remove every token of this namespace from memory and storage
    ///
    /// A refresh in flight is superseded: its callers receive
    /// [`AuthError::NoCredentials`] and its result is discarded.
    ///
    /// # Errors
    /// Returns [`AuthError::StorageUnavailable`] if a key could not be
    /// removed; memory is cleared regardless
    pub async fn sign_out(&self) -> AuthResult<()> {
        let _gate = self.inner.write_gate.lock().await;
        {
            let mut core = self.inner.core.lock();
            core.epoch += 1;
            core.slot = None;
            core.current = None;
            core.refresh_token = None;
            core.last_error = None;
            core.loaded = true;
        }

        let keys = &self.inner.keys;
        let mut first_error = None;
        for key in keys.token_keys().into_iter().chain(keys.authorization_keys()) {
            if let Err(e) = self.inner.storage.remove(key).await {
                warn!(namespace = %self.inner.namespace, key = %key, error = %e, "Failed to remove key");
                first_error.get_or_insert(e);
            }
        }

        info!(namespace = %self.inner.namespace, "Signed out");
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Start an authorization-code + PKCE flow
    ///
    /// Persists the verifier and `state` for [`complete_authorization`]
    /// and returns the URL to send the user agent to. Starting again
    /// replaces the previous attempt.
    ///
    /// [`complete_authorization`]: Self::complete_authorization
    ///
    /// # Errors
    /// - [`AuthError::Config`] if the endpoint is not an absolute URL
    /// - [`AuthError::EntropySourceUnavailable`] if randomness fails
    /// - [`AuthError::StorageUnavailable`] if the attempt cannot be persisted
    pub async fn begin_authorization(
        &self,
        params: &AuthorizeParams,
    ) -> AuthResult<AuthorizationRequest> {
        let pair = self.create_pkce_pair()?;
        let state = pkce::generate_state()?;
        let url = build_authorization_url(params, pair.challenge(), &state)?;

        let _gate = self.inner.write_gate.lock().await;
        self.inner.storage.set(&self.inner.keys.code_verifier, pair.verifier()).await?;
        self.inner.storage.set(&self.inner.keys.auth_state, &state).await?;
        info!(namespace = %self.inner.namespace, "Authorization started");

        Ok(AuthorizationRequest { url, state })
    }

    /// Redeem an authorization code
    ///
    /// The stored verifier and `state` are consumed whether or not the state
    /// matches.
    ///
    /// # Errors
    /// - [`AuthError::AuthorizationState`] if no attempt is pending or the
    ///   state does not match
    /// - [`AuthError::Config`] if no transport is configured
    /// - [`AuthError::RefreshFailed`] if the code exchange fails
    /// - errors of [`store_tokens`](Self::store_tokens)
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> AuthResult<Arc<DecodedToken>> {
        let transport = self
            .inner
            .transport
            .clone()
            .ok_or_else(|| AuthError::Config("no token transport configured".to_string()))?;

        let (verifier, expected_state) = {
            let _gate = self.inner.write_gate.lock().await;
            let verifier = self.inner.storage.get(&self.inner.keys.code_verifier).await?;
            let expected_state = self.inner.storage.get(&self.inner.keys.auth_state).await?;
            self.inner.discard_authorization().await;
            (verifier, expected_state)
        };

        let expected_state = expected_state
            .ok_or_else(|| AuthError::AuthorizationState("no authorization in progress".to_string()))?;
        if !pkce::validate_state(&expected_state, state) {
            warn!(namespace = %self.inner.namespace, "Authorization state mismatch");
            return Err(AuthError::AuthorizationState("state mismatch".to_string()));
        }
        let code_verifier = verifier
            .ok_or_else(|| AuthError::AuthorizationState("code verifier missing".to_string()))?;

        let request = CodeExchange { code: code.to_string(), code_verifier };
        let response = transport.exchange_code(&request).await?;
        self.store_tokens(response).await
    }

    /// Discard a pending authorization attempt
    ///
    /// # Errors
    /// Returns [`AuthError::StorageUnavailable`] if the keys cannot be removed
    pub async fn abort_authorization(&self) -> AuthResult<()> {
        let _gate = self.inner.write_gate.lock().await;
        for key in self.inner.keys.authorization_keys() {
            self.inner.storage.remove(key).await?;
        }
        debug!(namespace = %self.inner.namespace, "Authorization aborted");
        Ok(())
    }

    async fn ensure_loaded(&self) {
        let loaded = self.inner.core.lock().loaded;
        if loaded {
            return;
        }

        let _gate = self.inner.write_gate.lock().await;
        let loaded = self.inner.core.lock().loaded;
        if loaded {
            return;
        }

        let hydrated = self.inner.read_stored().await;
        if !hydrated.complete {
            debug!(namespace = %self.inner.namespace, "Hydration incomplete, will retry on next use");
        }
        let mut core = self.inner.core.lock();
        core.current = hydrated.snapshot;
        core.refresh_token = hydrated.refresh_token;
        core.loaded = hydrated.complete;
    }

    /// Join the in-flight refresh or start one
    ///
    /// Must be called with the core lock held.
    fn attach_or_start(&self, core: &mut Core) -> AuthResult<RefreshFuture> {
        if let Some(slot) = &core.slot {
            debug!(namespace = %self.inner.namespace, "Attaching to in-flight refresh");
            return Ok(slot.future.clone());
        }

        let (Some(transport), Some(refresh_token)) =
            (self.inner.transport.clone(), core.refresh_token.clone())
        else {
            core.last_error = Some(AuthError::NoCredentials);
            return Err(AuthError::NoCredentials);
        };

        let id = core.next_slot_id;
        core.next_slot_id += 1;
        let epoch = core.epoch;

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.run_refresh(id, epoch, transport, refresh_token).await
        });

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let future = task
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    let err = AuthError::refresh_failed(format!("refresh task aborted: {e}"));
                    if let Some(inner) = weak.upgrade() {
                        let _ = inner.settle(id, Settlement::Failed(err.clone()));
                    }
                    Err(err)
                })
            })
            .boxed()
            .shared();

        core.slot = Some(RefreshSlot { id, future: future.clone() });
        info!(namespace = %self.inner.namespace, refresh_id = id, "Refresh started");
        Ok(future)
    }
}

impl Inner {
    fn is_usable(&self, token: &DecodedToken) -> bool {
        !codec::is_expired(token, self.clock.unix_seconds(), self.skew_seconds)
    }

    fn derive_state(&self, core: &Core) -> TokenState {
        if core.slot.is_some() {
            return TokenState::Refreshing;
        }
        match &core.current {
            Some(snapshot) if self.is_usable(&snapshot.access) => TokenState::Valid,
            _ if core.last_error.is_some() => TokenState::Failed,
            Some(_) => TokenState::Expired,
            None => TokenState::Empty,
        }
    }

    async fn run_refresh(
        &self,
        id: u64,
        epoch: u64,
        transport: Arc<dyn TokenTransport>,
        refresh_token: String,
    ) -> AuthResult<TokenSnapshot> {
        let response = transport.refresh(&refresh_token).await;

        let _gate = self.write_gate.lock().await;
        let superseded = {
            let core = self.core.lock();
            (core.epoch != epoch).then(|| core.current.clone())
        };
        if let Some(current) = superseded {
            debug!(namespace = %self.namespace, refresh_id = id, "Refresh superseded, discarding result");
            return current
                .filter(|s| self.is_usable(&s.access))
                .ok_or(AuthError::NoCredentials);
        }

        let settlement = match response {
            Ok(response) => self.accept(response, refresh_token).await,
            Err(TransportError::Revoked(reason)) => {
                error!(namespace = %self.namespace, reason = %reason, "Refresh token revoked");
                self.clear_stored_tokens().await;
                Settlement::Revoked(AuthError::RefreshFailed { reason, revoked: true })
            }
            Err(e) => {
                error!(namespace = %self.namespace, error = %e, "Token refresh failed");
                Settlement::Failed(e.into())
            }
        };

        self.settle(id, settlement)
    }

    async fn accept(&self, response: TokenResponse, previous_refresh: String) -> Settlement {
        let previous_id_token = {
            let core = self.core.lock();
            core.current.as_ref().and_then(|s| s.record.id_token.clone())
        };
        let snapshot = match self.build_snapshot(response, Some(previous_refresh), previous_id_token)
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(namespace = %self.namespace, error = %e, "Refresh returned an unusable token");
                return Settlement::Failed(e);
            }
        };

        match self.persist(&snapshot.record).await {
            Ok(()) => {
                info!(namespace = %self.namespace, expires_at = %snapshot.record.expires_at, "Access token refreshed");
                Settlement::Installed(snapshot)
            }
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Refreshed tokens could not be persisted");
                Settlement::Unpersisted(snapshot, e)
            }
        }
    }

    /// Install a refresh outcome and clear its slot in one critical section
    fn settle(&self, id: u64, settlement: Settlement) -> AuthResult<TokenSnapshot> {
        let mut core = self.core.lock();
        if core.slot.as_ref().is_some_and(|slot| slot.id == id) {
            core.slot = None;
        }

        match settlement {
            Settlement::Installed(snapshot) => {
                self.apply(&mut core, snapshot.clone());
                Ok(snapshot)
            }
            Settlement::Unpersisted(snapshot, err) => {
                self.apply(&mut core, snapshot);
                Err(err)
            }
            Settlement::Failed(err) => {
                core.last_error = Some(err.clone());
                Err(err)
            }
            Settlement::Revoked(err) => {
                core.current = None;
                core.refresh_token = None;
                core.last_error = None;
                core.loaded = true;
                Err(err)
            }
        }
    }

    /// Install tokens; memory is authoritative from here on
    fn apply(&self, core: &mut Core, snapshot: TokenSnapshot) {
        core.refresh_token = snapshot.record.refresh_token.clone();
        core.current = Some(snapshot);
        core.last_error = None;
        core.loaded = true;
    }

    /// Decode and validate a response into a snapshot
    fn build_snapshot(
        &self,
        response: TokenResponse,
        previous_refresh: Option<String>,
        previous_id_token: Option<String>,
    ) -> AuthResult<TokenSnapshot> {
        let access = codec::decode_with(&response.access_token, self.decode_options)?;
        let expires_at = access.validate()?;

        let record = StoredTokenRecord {
            access_token: response.access_token,
            id_token: response.id_token.or(previous_id_token),
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at,
        };
        Ok(TokenSnapshot { record: Arc::new(record), access: Arc::new(access) })
    }

    async fn persist(&self, record: &StoredTokenRecord) -> AuthResult<()> {
        let keys = &self.keys;
        debug!(namespace = %self.namespace, backend = self.storage.backend_name(), "Persisting token record");

        // `expires_at` marks a complete record: cleared first, written last.
        // Refresh token before access token, so a cut-short write still holds
        // the newest refresh token.
        self.storage.remove(&keys.expires_at).await?;
        match &record.refresh_token {
            Some(refresh_token) => self.storage.set(&keys.refresh_token, refresh_token).await?,
            None => self.storage.remove(&keys.refresh_token).await?,
        }
        match &record.id_token {
            Some(id_token) => self.storage.set(&keys.id_token, id_token).await?,
            None => self.storage.remove(&keys.id_token).await?,
        }
        self.storage.set(&keys.access_token, &record.access_token).await?;
        self.storage.set(&keys.expires_at, &record.expires_at.timestamp().to_string()).await?;
        Ok(())
    }

    /// Read one key; failures are diagnosed and returned
    async fn read_key(&self, key: &str) -> StorageResult<Option<String>> {
        let result = self.storage.get(key).await;
        if let Err(e) = &result {
            warn!(namespace = %self.namespace, key = %key, error = %e, "Storage read failed");
            self.diagnostics.report(AnomalyKind::StorageReadFailed, format!("{key}: {e}"));
        }
        result
    }

    /// Load the persisted record
    ///
    /// Failed reads degrade to "absent" and leave the result incomplete.
    async fn read_stored(&self) -> Hydrated {
        let reads = [
            self.read_key(&self.keys.access_token).await,
            self.read_key(&self.keys.id_token).await,
            self.read_key(&self.keys.refresh_token).await,
            self.read_key(&self.keys.expires_at).await,
        ];
        let complete = reads.iter().all(Result::is_ok);
        let [access_token, id_token, refresh_token, stored_expiry] =
            reads.map(|read| read.ok().flatten());

        let snapshot = self.stored_snapshot(access_token, id_token, refresh_token.clone(), stored_expiry);
        Hydrated { snapshot, refresh_token, complete }
    }

    fn stored_snapshot(
        &self,
        access_token: Option<String>,
        id_token: Option<String>,
        refresh_token: Option<String>,
        stored_expiry: Option<String>,
    ) -> Option<TokenSnapshot> {
        let Some(access_token) = access_token else {
            debug!(namespace = %self.namespace, has_refresh = refresh_token.is_some(), "No stored access token");
            return None;
        };
        let Some(stored_expiry) = stored_expiry else {
            warn!(namespace = %self.namespace, "Stored record has no expiry marker, ignoring access token");
            self.diagnostics.report(
                AnomalyKind::IncompleteStoredRecord,
                format!("{} present without {}", self.keys.access_token, self.keys.expires_at),
            );
            return None;
        };

        let decoded = codec::decode_with(&access_token, self.decode_options)
            .and_then(|decoded| decoded.validate().map(|exp| (decoded, exp)));
        let (access, expires_at) = match decoded {
            Ok(pair) => pair,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Stored access token unusable");
                self.diagnostics.report(AnomalyKind::MalformedStoredToken, e.to_string());
                return None;
            }
        };

        if stored_expiry.trim().parse::<i64>().ok() != Some(expires_at.timestamp()) {
            self.diagnostics.report(
                AnomalyKind::ExpiryMismatch,
                format!("stored expiry '{stored_expiry}' differs from exp {}", expires_at.timestamp()),
            );
        }

        info!(namespace = %self.namespace, expires_at = %expires_at, "Hydrated tokens from storage");
        let record = StoredTokenRecord { access_token, id_token, refresh_token, expires_at };
        Some(TokenSnapshot { record: Arc::new(record), access: Arc::new(access) })
    }

    /// Remove the token record after revocation; failures are diagnosed
    async fn clear_stored_tokens(&self) {
        for key in self.keys.token_keys() {
            if let Err(e) = self.storage.remove(key).await {
                self.diagnostics
                    .report(AnomalyKind::StorageCleanupFailed, format!("{key}: {e}"));
            }
        }
    }

    /// Remove verifier and state; failures are diagnosed
    async fn discard_authorization(&self) {
        for key in self.keys.authorization_keys() {
            if let Err(e) = self.storage.remove(key).await {
                self.diagnostics
                    .report(AnomalyKind::StorageCleanupFailed, format!("{key}: {e}"));
            }
        }
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("namespace", &self.inner.namespace)
            .field("storage", &self.inner.storage.backend_name())
            .field("transport", &self.inner.transport.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::token_manager.
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::storage::MemoryStorage;
    use crate::testing::fixtures::{self, FIXTURE_NOW};
    use crate::testing::{FailingStorage, MockTransport};
    use crate::time::ManualClock;

    struct Harness {
        manager: TokenManager,
        storage: Arc<MemoryStorage>,
        transport: MockTransport,
        clock: ManualClock,
        sink: Arc<MemorySink>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let clock = ManualClock::at_unix(FIXTURE_NOW);
        let transport = MockTransport::minting(Arc::new(clock.clone()), 3600);
        let sink = Arc::new(MemorySink::new());
        let manager = TokenManager::new(
            TokenManagerConfig::new("acme", storage.clone())
                .with_transport(Arc::new(transport.clone()))
                .with_diagnostics(sink.clone())
                .with_clock(Arc::new(clock.clone())),
        )
        .unwrap();
        Harness { manager, storage, transport, clock, sink }
    }

    async fn seed_expired(h: &Harness) {
        h.manager
            .store_tokens(fixtures::token_response("user-1", FIXTURE_NOW - 60, Some("refresh-0")))
            .await
            .unwrap();
    }

    /// Validates the cached-token scenario.
    ///
    /// Assertions:
    /// - Confirms two immediate calls in `Valid` return identical tokens.
    /// - Ensures the transport is never called.
    #[tokio::test]
    async fn test_valid_token_served_from_cache() {
        let h = harness();
        h.manager
            .store_tokens(fixtures::token_response("user-1", FIXTURE_NOW + 3600, Some("r")))
            .await
            .unwrap();

        let first = h.manager.get_access_token().await.unwrap();
        let second = h.manager.get_access_token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.transport.refresh_calls(), 0);
        assert_eq!(h.manager.state().await, TokenState::Valid);
    }

    /// Validates the single-flight refresh scenario.
    ///
    /// Assertions:
    /// - Confirms 50 concurrent callers in `Expired` trigger one transport
    ///   call.
    /// - Confirms every caller receives the same token.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_refresh() {
        let h = harness();
        seed_expired(&h).await;
        h.transport.set_delay(Duration::from_millis(50));
        assert_eq!(h.manager.state().await, TokenState::Expired);

        let calls = (0..50).map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.get_decoded_access_token().await })
        });
        let results: Vec<_> = join_all(calls).await.into_iter().map(|r| r.unwrap().unwrap()).collect();

        assert_eq!(h.transport.refresh_calls(), 1);
        assert!(results.iter().all(|t| Arc::ptr_eq(t, &results[0])));
        assert_eq!(h.manager.state().await, TokenState::Valid);
        assert_eq!(
            h.storage.get("acme.refresh_token").await.unwrap().as_deref(),
            Some("refresh-1")
        );
    }

    #[tokio::test]
    async fn test_state_reports_refreshing_while_in_flight() {
        let h = harness();
        seed_expired(&h).await;
        h.transport.set_delay(Duration::from_millis(100));

        let manager = h.manager.clone();
        let pending = tokio::spawn(async move { manager.get_access_token().await });
        while h.transport.refresh_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.manager.state().await, TokenState::Refreshing);
        pending.await.unwrap().unwrap();
        assert_eq!(h.manager.state().await, TokenState::Valid);
    }

    /// Validates the revocation scenario.
    ///
    /// Assertions:
    /// - Ensures the caller gets a revoked `RefreshFailed`.
    /// - Ensures the access, id, refresh and expiry keys are removed.
    /// - Confirms the state is `Empty` and the next call is `NoCredentials`.
    #[tokio::test]
    async fn test_revocation_clears_everything() {
        let h = harness();
        seed_expired(&h).await;
        h.transport.push_failure(TransportError::Revoked("invalid_grant".to_string()));

        let err = h.manager.get_access_token().await.unwrap_err();

        assert!(err.is_revocation());
        for key in h.manager.storage_keys().token_keys() {
            assert!(!h.storage.contains(key), "{key} should be removed");
        }
        assert_eq!(h.manager.state().await, TokenState::Empty);
        assert_eq!(h.manager.get_access_token().await, Err(AuthError::NoCredentials));
        assert_eq!(h.manager.state().await, TokenState::Failed);
    }

    /// Validates retry after a transient failure.
    ///
    /// Assertions:
    /// - Ensures the failure is reported and the state becomes `Failed`.
    /// - Ensures the refresh token is retained and reused by the retry.
    #[tokio::test]
    async fn test_failed_refresh_keeps_refresh_token_and_retries() {
        let h = harness();
        seed_expired(&h).await;
        h.transport.push_failure(TransportError::Failed("503".to_string()));

        let err = h.manager.get_access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed { revoked: false, .. }));
        assert_eq!(h.manager.state().await, TokenState::Failed);
        assert!(h.storage.contains("acme.refresh_token"));

        h.manager.get_access_token().await.unwrap();

        assert_eq!(h.transport.refresh_tokens_seen(), vec!["refresh-0", "refresh-0"]);
        assert_eq!(h.manager.state().await, TokenState::Valid);
    }

    #[tokio::test]
    async fn test_empty_without_refresh_token_is_no_credentials() {
        let h = harness();

        assert_eq!(h.manager.state().await, TokenState::Empty);
        assert_eq!(h.manager.get_access_token().await, Err(AuthError::NoCredentials));
        assert_eq!(h.manager.state().await, TokenState::Failed);
        assert_eq!(h.transport.refresh_calls(), 0);
        assert!(!h.manager.is_authenticated().await);
    }

    /// Validates sign-out while a refresh is in flight.
    ///
    /// Assertions:
    /// - Ensures the attached caller receives `NoCredentials`.
    /// - Ensures the late refresh result is not persisted or cached.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sign_out_supersedes_in_flight_refresh() {
        let h = harness();
        seed_expired(&h).await;
        h.transport.set_delay(Duration::from_millis(100));

        let manager = h.manager.clone();
        let pending = tokio::spawn(async move { manager.get_access_token().await });
        while h.transport.refresh_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        h.manager.sign_out().await.unwrap();
        assert_eq!(h.manager.state().await, TokenState::Empty);

        assert_eq!(pending.await.unwrap(), Err(AuthError::NoCredentials));
        assert!(h.storage.is_empty());
        assert_eq!(h.manager.state().await, TokenState::Empty);
    }

    /// Validates hydration from storage written by an earlier manager.
    ///
    /// Assertions:
    /// - Confirms a new manager serves the stored token without refreshing.
    /// - Confirms claims and user profile are extracted from stored tokens.
    #[tokio::test]
    async fn test_hydrates_from_storage() {
        let h = harness();
        h.manager
            .store_tokens(fixtures::token_response("user-7", FIXTURE_NOW + 600, Some("r7")))
            .await
            .unwrap();

        let reopened = TokenManager::new(
            TokenManagerConfig::new("acme", h.storage.clone())
                .with_transport(Arc::new(h.transport.clone()))
                .with_clock(Arc::new(h.clock.clone())),
        )
        .unwrap();

        assert_eq!(reopened.state().await, TokenState::Valid);
        let claims = reopened.get_claims().await.unwrap();
        assert_eq!(claims.subject.as_deref(), Some("user-7"));
        assert!(claims.has_permission("read"));
        let profile = reopened.get_user_profile().await.unwrap();
        assert_eq!(profile.email.as_deref(), Some("user-7@example.com"));
        assert_eq!(h.transport.refresh_calls(), 0);
    }

    /// Validates degraded hydration of a malformed stored token.
    ///
    /// Assertions:
    /// - Ensures a diagnostic record is produced.
    /// - Ensures the stored refresh token is still used to refresh.
    #[tokio::test]
    async fn test_malformed_stored_token_falls_back_to_refresh() {
        let h = harness();
        h.storage.set("acme.access_token", "not-a-token").await.unwrap();
        h.storage.set("acme.refresh_token", "refresh-stored").await.unwrap();
        h.storage.set("acme.expires_at", &FIXTURE_NOW.to_string()).await.unwrap();

        h.manager.get_access_token().await.unwrap();

        assert_eq!(h.sink.count(AnomalyKind::MalformedStoredToken), 1);
        assert_eq!(h.transport.refresh_tokens_seen(), vec!["refresh-stored"]);
    }

    #[tokio::test]
    async fn test_expiry_mismatch_is_diagnosed() {
        let h = harness();
        let exp = FIXTURE_NOW + 600;
        h.storage.set("acme.access_token", &fixtures::access_token("u", exp)).await.unwrap();
        h.storage.set("acme.expires_at", "12345").await.unwrap();

        assert_eq!(h.manager.state().await, TokenState::Valid);
        assert_eq!(h.sink.count(AnomalyKind::ExpiryMismatch), 1);
    }

    /// Validates degraded hydration when storage reads fail.
    ///
    /// Assertions:
    /// - Ensures the manager reports `Empty` instead of failing.
    /// - Ensures each failed read produces a diagnostic record.
    #[tokio::test]
    async fn test_storage_read_failure_degrades_to_empty() {
        let sink = Arc::new(MemorySink::new());
        let manager = TokenManager::new(
            TokenManagerConfig::new("acme", Arc::new(FailingStorage::new()))
                .with_diagnostics(sink.clone()),
        )
        .unwrap();

        assert_eq!(manager.state().await, TokenState::Empty);
        assert_eq!(sink.count(AnomalyKind::StorageReadFailed), 4);
    }

    /// Validates recovery from storage that was unreadable at first use.
    ///
    /// Assertions:
    /// - Ensures a failed hydration yields `NoCredentials` without a refresh.
    /// - Confirms the next call re-reads storage once it recovers.
    /// - Confirms the recovered refresh token is the one presented.
    #[tokio::test]
    async fn test_hydration_retried_after_read_failure() {
        let storage = Arc::new(FailingStorage::healthy());
        storage.inner().set("acme.refresh_token", "refresh-stored").await.unwrap();
        let clock = ManualClock::at_unix(FIXTURE_NOW);
        let transport = MockTransport::minting(Arc::new(clock.clone()), 3600);
        let sink = Arc::new(MemorySink::new());
        let manager = TokenManager::new(
            TokenManagerConfig::new("acme", storage.clone())
                .with_transport(Arc::new(transport.clone()))
                .with_diagnostics(sink.clone())
                .with_clock(Arc::new(clock)),
        )
        .unwrap();

        storage.set_fail_reads(true);
        assert_eq!(manager.get_access_token().await, Err(AuthError::NoCredentials));
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(sink.count(AnomalyKind::StorageReadFailed), 4);

        storage.set_fail_reads(false);
        manager.get_access_token().await.unwrap();

        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(transport.refresh_tokens_seen(), vec!["refresh-stored"]);
        assert_eq!(manager.state().await, TokenState::Valid);
    }

    /// Validates a refresh whose result cannot be persisted.
    ///
    /// Assertions:
    /// - Ensures every concurrent caller receives `StorageUnavailable`.
    /// - Ensures the transport is called once.
    /// - Confirms the next call is served from memory without refreshing.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unpersisted_refresh_is_served_from_memory() {
        let storage = Arc::new(FailingStorage::healthy());
        let clock = ManualClock::at_unix(FIXTURE_NOW);
        let transport = MockTransport::minting(Arc::new(clock.clone()), 3600);
        transport.set_delay(Duration::from_millis(50));
        let manager = TokenManager::new(
            TokenManagerConfig::new("acme", storage.clone())
                .with_transport(Arc::new(transport.clone()))
                .with_clock(Arc::new(clock)),
        )
        .unwrap();
        manager
            .store_tokens(fixtures::token_response("user-1", FIXTURE_NOW - 60, Some("refresh-0")))
            .await
            .unwrap();
        storage.set_fail_writes(true);

        let calls = (0..10).map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_access_token().await })
        });
        let results: Vec<_> = join_all(calls).await.into_iter().map(|r| r.unwrap()).collect();

        assert!(results.iter().all(|r| matches!(r, Err(AuthError::StorageUnavailable(_)))));
        assert_eq!(transport.refresh_calls(), 1);

        let token = manager.get_access_token().await.unwrap();
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(manager.state().await, TokenState::Valid);
        assert_ne!(
            storage.inner().get("acme.access_token").await.unwrap().as_deref(),
            Some(token.as_str())
        );
    }

    /// Validates recovery from an interrupted write.
    ///
    /// Assertions:
    /// - Ensures a record cut short after the refresh token is written is
    ///   not served as a valid access token.
    /// - Ensures an `IncompleteStoredRecord` diagnostic is produced.
    /// - Confirms the newest refresh token is the one presented next.
    #[tokio::test]
    async fn test_interrupted_write_is_not_hydrated_as_valid() {
        let storage = Arc::new(FailingStorage::healthy());
        let clock = ManualClock::at_unix(FIXTURE_NOW);
        let transport = MockTransport::minting(Arc::new(clock.clone()), 3600);
        let open = || {
            let sink = Arc::new(MemorySink::new());
            let manager = TokenManager::new(
                TokenManagerConfig::new("acme", storage.clone())
                    .with_transport(Arc::new(transport.clone()))
                    .with_diagnostics(sink.clone())
                    .with_clock(Arc::new(clock.clone())),
            )
            .unwrap();
            (manager, sink)
        };
        let (first, _) = open();
        first
            .store_tokens(fixtures::token_response("user-1", FIXTURE_NOW + 600, Some("r")))
            .await
            .unwrap();

        // Expiry removal and the rotated refresh token land, nothing after
        storage.set_write_budget(Some(2));
        let err = first.refresh_now().await.unwrap_err();
        assert!(matches!(err, AuthError::StorageUnavailable(_)));
        storage.set_write_budget(None);
        assert!(storage.inner().get("acme.expires_at").await.unwrap().is_none());
        assert_eq!(
            storage.inner().get("acme.refresh_token").await.unwrap().as_deref(),
            Some("refresh-1")
        );

        let (second, sink) = open();
        assert_eq!(second.state().await, TokenState::Empty);
        assert_eq!(sink.count(AnomalyKind::IncompleteStoredRecord), 1);
        second.get_access_token().await.unwrap();

        assert_eq!(transport.refresh_tokens_seen(), vec!["r", "refresh-1"]);
    }

    /// Validates the write-failure policy.
    ///
    /// Assertions:
    /// - Ensures `store_tokens` surfaces `StorageUnavailable`.
    /// - Confirms the tokens are still served from memory.
    #[tokio::test]
    async fn test_write_failure_is_surfaced_but_token_kept_in_memory() {
        let storage = Arc::new(FailingStorage::healthy());
        let clock = ManualClock::at_unix(FIXTURE_NOW);
        let manager = TokenManager::new(
            TokenManagerConfig::new("acme", storage.clone()).with_clock(Arc::new(clock)),
        )
        .unwrap();
        storage.set_fail_writes(true);

        let result = manager
            .store_tokens(fixtures::token_response("u", FIXTURE_NOW + 600, None))
            .await;

        assert!(matches!(result, Err(AuthError::StorageUnavailable(_))));
        assert!(manager.get_access_token().await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_previous_tokens() {
        let h = harness();
        seed_expired(&h).await;
        let id_before = h.manager.get_id_token().await;
        h.transport.push_response(TokenResponse::new(fixtures::access_token("user-1", FIXTURE_NOW + 900)));

        h.manager.get_access_token().await.unwrap();

        assert_eq!(
            h.storage.get("acme.refresh_token").await.unwrap().as_deref(),
            Some("refresh-0")
        );
        assert_eq!(h.manager.get_id_token().await, id_before);
        assert_eq!(
            h.storage.get("acme.expires_at").await.unwrap().as_deref(),
            Some((FIXTURE_NOW + 900).to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_unusable_refreshed_token_is_malformed() {
        let h = harness();
        seed_expired(&h).await;
        h.transport.push_response(TokenResponse::new(fixtures::unsigned_token(
            serde_json::json!({ "sub": "no-exp" }),
        )));

        let err = h.manager.get_access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::MalformedToken(_)));
        assert_eq!(h.manager.state().await, TokenState::Failed);
        assert!(h.storage.contains("acme.refresh_token"));
    }

    /// Validates skew handling at the manager level.
    ///
    /// Assertions:
    /// - Ensures a token inside the skew window is treated as expired.
    #[tokio::test]
    async fn test_token_within_skew_is_refreshed() {
        let h = harness();
        h.manager
            .store_tokens(fixtures::token_response("user-1", FIXTURE_NOW + 5, Some("r")))
            .await
            .unwrap();

        assert_eq!(h.manager.state().await, TokenState::Expired);
        h.manager.get_access_token().await.unwrap();
        assert_eq!(h.transport.refresh_calls(), 1);

        h.clock.advance_seconds(3000);
        assert_eq!(h.manager.state().await, TokenState::Valid);
    }

    #[tokio::test]
    async fn test_refresh_now_forces_refresh() {
        let h = harness();
        h.manager
            .store_tokens(fixtures::token_response("user-1", FIXTURE_NOW + 3600, Some("r")))
            .await
            .unwrap();
        let before = h.manager.get_access_token().await.unwrap();

        let after = h.manager.refresh_now().await.unwrap();

        assert_ne!(after.raw(), before);
        assert_eq!(h.transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_strict_decoding_rejects_unsigned_tokens() {
        let manager = TokenManager::new(
            TokenManagerConfig::new("acme", Arc::new(MemoryStorage::new()))
                .with_strict_decoding(true),
        )
        .unwrap();

        let result = manager
            .store_tokens(fixtures::token_response("u", FIXTURE_NOW + 600, None))
            .await;
        assert!(matches!(result, Err(AuthError::MalformedToken(_))));
    }

    #[tokio::test]
    async fn test_create_pkce_pair_uses_configured_length() {
        let manager = TokenManager::new(
            TokenManagerConfig::new("acme", Arc::new(MemoryStorage::new()))
                .with_verifier_length(128),
        )
        .unwrap();

        let pair = manager.create_pkce_pair().unwrap();
        assert_eq!(pair.verifier().len(), 128);
    }
}
