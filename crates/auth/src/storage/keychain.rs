//! Platform secure-store storage
//!
//! # Module Layering
//!
//! - [`SecretStore`]: synchronous primitive over a secure store (macOS
//!   Keychain, Windows Credential Manager, Linux Secret Service through
//!   [`KeyringStore`], or anything the host provides).
//! - [`KeychainStorage`] (this module's adapter): the async
//!   [`StorageAdapter`] on top. Store calls block, so they run on tokio's
//!   blocking pool. Values larger than the store accepts are chunked.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::chunked::{self, ChunkStore};
use super::StorageAdapter;
use crate::error::{StorageError, StorageResult};

const BACKEND: &str = "keychain";

/// Conservative per-item size most platform stores accept
pub const DEFAULT_MAX_VALUE_BYTES: usize = 2048;

/// Synchronous secret store primitive
pub trait SecretStore: Send + Sync {
    /// Read a secret; `Ok(None)` when it does not exist
    ///
    /// # Errors
    /// Returns [`StorageError::Unavailable`] when the store cannot be read
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Create or replace a secret
    ///
    /// # Errors
    /// Returns [`StorageError::Unavailable`] when the store rejects the write
    fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a secret (idempotent)
    ///
    /// # Errors
    /// Returns [`StorageError::Unavailable`] when the store cannot be written
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Options for [`KeychainStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeychainOptions {
    /// Largest single item written to the store
    pub max_value_bytes: usize,
    /// Maximum number of items one value may span
    pub max_chunks: usize,
}

impl Default for KeychainOptions {
    fn default() -> Self {
        Self { max_value_bytes: DEFAULT_MAX_VALUE_BYTES, max_chunks: 16 }
    }
}

struct StoreParts<'a>(&'a dyn SecretStore);

impl ChunkStore for StoreParts<'_> {
    fn read_part(&self, key: &str) -> StorageResult<Option<String>> {
        self.0.read(key)
    }

    fn write_part(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.0.write(key, value)
    }

    fn delete_part(&mut self, key: &str) -> StorageResult<()> {
        self.0.delete(key)
    }
}

/// Storage adapter over a [`SecretStore`]
#[derive(Clone)]
pub struct KeychainStorage {
    store: Arc<dyn SecretStore>,
    options: KeychainOptions,
}

impl KeychainStorage {
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_options(store, KeychainOptions::default())
    }

    #[must_use]
    pub fn with_options(store: Arc<dyn SecretStore>, options: KeychainOptions) -> Self {
        Self { store, options }
    }

    /// Adapter over the platform keychain under `service`
    #[cfg(feature = "keychain")]
    #[must_use]
    pub fn platform(service: impl Into<String>) -> Self {
        Self::new(Arc::new(KeyringStore::new(service)))
    }

    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SecretStore, KeychainOptions) -> StorageResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let options = self.options;
        tokio::task::spawn_blocking(move || op(store.as_ref(), options))
            .await
            .map_err(|e| StorageError::unavailable(BACKEND, e))?
    }
}

impl fmt::Debug for KeychainStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeychainStorage").field("options", &self.options).finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageAdapter for KeychainStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        self.blocking(move |store, _| chunked::read(&StoreParts(store), &key)).await
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(backend = BACKEND, key = %key, "Storing value");
        let key = key.to_string();
        let value = value.to_string();
        self.blocking(move |store, options| {
            let pieces = chunked::split(&value, options.max_value_bytes, char::len_utf8)
                .ok_or_else(|| StorageError::QuotaExceeded {
                    backend: BACKEND,
                    limit: options.max_value_bytes,
                    requested: value.len(),
                })?;
            chunked::write(&mut StoreParts(store), BACKEND, &key, &pieces, options.max_chunks)
        })
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        debug!(backend = BACKEND, key = %key, "Removing value");
        let key = key.to_string();
        self.blocking(move |store, _| chunked::remove(&mut StoreParts(store), &key)).await
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// [`SecretStore`] over the platform keychain via `keyring`
#[cfg(feature = "keychain")]
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

#[cfg(feature = "keychain")]
impl KeyringStore {
    /// Store for a service identifier (e.g. `"com.example.app.auth"`)
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, key: &str) -> StorageResult<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(|e| {
            StorageError::unavailable(BACKEND, format!("failed to create entry for {key}: {e}"))
        })
    }
}

#[cfg(feature = "keychain")]
impl SecretStore for KeyringStore {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::unavailable(
                BACKEND,
                format!("failed to retrieve secret for {key}: {e}"),
            )),
        }
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entry(key)?.set_password(value).map_err(|e| {
            StorageError::unavailable(BACKEND, format!("failed to store secret for {key}: {e}"))
        })
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::unavailable(
                BACKEND,
                format!("failed to delete secret for {key}: {e}"),
            )),
        }
    }
}
