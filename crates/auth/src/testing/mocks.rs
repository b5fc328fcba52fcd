//! Mock implementations of the crate's seams
//!
//! Provides mock objects for testing purposes.

// Allow missing error/panic docs for test mocks - they are designed to be simple
// and errors are clearly indicated by their return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::fixtures;
use crate::auth::traits::TokenTransport;
use crate::auth::types::{CodeExchange, TokenResponse};
use crate::error::{StorageError, StorageResult, TransportError};
use crate::storage::{MemoryStorage, SecretStore, StorageAdapter};
use crate::time::Clock;

type Scripted = Result<TokenResponse, TransportError>;

/// Token minting used when no response is queued
#[derive(Clone)]
struct Minting {
    clock: Arc<dyn Clock>,
    lifetime_seconds: i64,
}

#[derive(Default)]
struct MockTransportState {
    refresh_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    queued: Mutex<VecDeque<Scripted>>,
    minting: Mutex<Option<Minting>>,
    delay: Mutex<Option<Duration>>,
    refresh_tokens_seen: Mutex<Vec<String>>,
    last_exchange: Mutex<Option<CodeExchange>>,
}

/// Mock token transport
///
/// Queued results are returned first, in order. With an empty queue the
/// transport mints a fresh token set when configured with
/// [`MockTransport::minting`], otherwise it fails. Clones share state, so a
/// test can keep one handle for assertions.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockTransportState>,
}

impl MockTransport {
    /// Transport with nothing queued
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that mints `lifetime_seconds` tokens against `clock`
    /// and rotates the refresh token on every call
    #[must_use]
    pub fn minting(clock: Arc<dyn Clock>, lifetime_seconds: i64) -> Self {
        let transport = Self::new();
        *transport.state.minting.lock() = Some(Minting { clock, lifetime_seconds });
        transport
    }

    /// Queue a successful response
    pub fn push_response(&self, response: TokenResponse) {
        self.state.queued.lock().push_back(Ok(response));
    }

    /// Queue a failure
    pub fn push_failure(&self, error: TransportError) {
        self.state.queued.lock().push_back(Err(error));
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = Some(delay);
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.state.exchange_calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented so far, in call order
    #[must_use]
    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens_seen.lock().clone()
    }

    #[must_use]
    pub fn last_exchange(&self) -> Option<CodeExchange> {
        self.state.last_exchange.lock().clone()
    }

    async fn respond(&self, call: usize) -> Scripted {
        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.state.queued.lock().pop_front();
        if let Some(result) = queued {
            return result;
        }

        let minting = self.state.minting.lock().clone();
        match minting {
            Some(Minting { clock, lifetime_seconds }) => {
                let exp = clock.unix_seconds() + lifetime_seconds;
                let refresh = format!("refresh-{call}");
                Ok(fixtures::token_response("user-1", exp, Some(&refresh)))
            }
            None => Err(TransportError::Failed("no response queued".to_string())),
        }
    }
}

#[async_trait]
impl TokenTransport for MockTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, TransportError> {
        let call = self.state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.refresh_tokens_seen.lock().push(refresh_token.to_string());
        self.respond(call).await
    }

    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenResponse, TransportError> {
        let call = self.state.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.last_exchange.lock() = Some(request.clone());
        self.respond(call).await
    }
}

/// In-memory [`SecretStore`] with switchable availability
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: DashMap<String, String>,
    unavailable: AtomicBool,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (simulates a locked keychain)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// All stored items
    #[must_use]
    pub fn values(&self) -> Vec<String> {
        self.secrets.iter().map(|entry| entry.value().clone()).collect()
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("keychain", "store is locked"));
        }
        Ok(())
    }
}

impl SecretStore for MemorySecretStore {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        self.check()?;
        Ok(self.secrets.get(key).map(|v| v.value().clone()))
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check()?;
        self.secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.secrets.remove(key);
        Ok(())
    }
}

/// Storage wrapper whose reads and writes can be made to fail
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_budget: Mutex<Option<usize>>,
}

impl FailingStorage {
    /// Storage where every call fails
    #[must_use]
    pub fn new() -> Self {
        let storage = Self::default();
        storage.set_fail_reads(true);
        storage.set_fail_writes(true);
        storage
    }

    /// Working storage that can be broken later
    #[must_use]
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Allow `budget` more writes or removals, then fail the rest
    ///
    /// `None` lifts the limit.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        *self.write_budget.lock() = budget;
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("failing", "write refused"));
        }
        let mut budget = self.write_budget.lock();
        match budget.as_mut() {
            Some(0) => Err(StorageError::unavailable("failing", "write budget exhausted")),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// The wrapped storage, bypassing failure injection
    #[must_use]
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl StorageAdapter for FailingStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("failing", "read refused"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_write()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.check_write()?;
        self.inner.remove(key).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
