//! Pluggable persistence for token records
//!
//! Every backend implements [`StorageAdapter`], a small async key/value
//! contract. The token manager only ever sees `Arc<dyn StorageAdapter>` and
//! never branches on which backend is underneath.
//!
//! | Backend | Lifetime | Notes |
//! |---------|----------|-------|
//! | [`MemoryStorage`] | process | volatile |
//! | [`FileStorage`] | survives restarts | one JSON file per origin, size quota |
//! | [`CookieStorage`] | request/response | reads the request jar, emits `Set-Cookie` headers, chunked |
//! | [`KeychainStorage`] | platform secure store | blocking store calls off the runtime, chunked |

use async_trait::async_trait;

use crate::error::StorageResult;

pub(crate) mod chunked;
pub mod cookie;
pub mod file;
pub mod keychain;
pub mod memory;

pub use cookie::{CookieOptions, CookieStorage, SameSite};
pub use file::{FileStorage, FileStorageOptions};
#[cfg(feature = "keychain")]
pub use keychain::KeyringStore;
pub use keychain::{KeychainOptions, KeychainStorage, SecretStore};
pub use memory::MemoryStorage;

/// Async key/value storage contract
///
/// Implementations must be safe to share across tasks. `remove` is
/// idempotent: removing a missing key succeeds.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent
    ///
    /// # Errors
    /// Returns a [`StorageError`](crate::error::StorageError) when the
    /// backend cannot be read
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any previous one
    ///
    /// # Errors
    /// Returns a [`StorageError`](crate::error::StorageError) when the
    /// backend refuses the write (including quota)
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a value
    ///
    /// # Errors
    /// Returns a [`StorageError`](crate::error::StorageError) when the
    /// backend cannot be written
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Short backend name used in logs and errors
    fn backend_name(&self) -> &'static str {
        "custom"
    }
}
