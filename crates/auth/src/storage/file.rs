//! Persistent per-origin storage on the local filesystem
//!
//! The desktop/server analogue of browser local storage: values survive
//! restarts and are scoped to an origin. Each origin gets one JSON document
//! named after the BLAKE3 hash of the origin, so origins never share a file
//! and origin strings never reach the filesystem as paths.
//!
//! Writes replace the document atomically (temp file in the same directory,
//! then rename), so a crash mid-write leaves the previous document intact.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::StorageAdapter;
use crate::error::{StorageError, StorageResult};

const BACKEND: &str = "file";

/// Default per-origin quota, matching common browser local-storage limits
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Options for [`FileStorage`]
#[derive(Debug, Clone)]
pub struct FileStorageOptions {
    /// Directory holding one document per origin
    pub directory: PathBuf,
    /// Origin the storage is scoped to (e.g. `https://app.example.com`)
    pub origin: String,
    /// Maximum serialized document size
    pub quota_bytes: usize,
}

impl FileStorageOptions {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self { directory: directory.into(), origin: origin.into(), quota_bytes: DEFAULT_QUOTA_BYTES }
    }

    #[must_use]
    pub fn with_quota_bytes(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }
}

/// Filesystem-backed storage scoped to one origin
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    directory: PathBuf,
    quota_bytes: usize,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileStorage {
    /// Open (creating the directory if needed) the document for an origin
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the directory cannot be created
    pub async fn open(options: FileStorageOptions) -> StorageResult<Self> {
        tokio::fs::create_dir_all(&options.directory).await?;
        let path = options.directory.join(document_name(&options.origin));
        debug!(backend = BACKEND, path = %path.display(), "Opened origin document");

        Ok(Self {
            path,
            directory: options.directory,
            quota_bytes: options.quota_bytes,
            cache: Mutex::new(None),
        })
    }

    /// Path of the origin document
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `change` to a copy of the document, persist it, then adopt it
    async fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> StorageResult<()> {
        let mut cache = self.cache.lock().await;
        let mut document = match cache.as_ref() {
            Some(document) => document.clone(),
            None => self.load().await?,
        };
        if !change(&mut document) {
            *cache = Some(document);
            return Ok(());
        }

        let bytes = serde_json::to_vec(&document)?;
        if bytes.len() > self.quota_bytes {
            warn!(backend = BACKEND, size = bytes.len(), quota = self.quota_bytes, "Quota exceeded");
            return Err(StorageError::QuotaExceeded {
                backend: BACKEND,
                limit: self.quota_bytes,
                requested: bytes.len(),
            });
        }

        let directory = self.directory.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&directory, &path, &bytes))
            .await
            .map_err(|e| StorageError::unavailable(BACKEND, e))??;

        *cache = Some(document);
        Ok(())
    }
}

fn document_name(origin: &str) -> String {
    format!("{}.json", hex::encode(blake3::hash(origin.as_bytes()).as_bytes()))
}

fn write_atomically(directory: &Path, path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        Ok(cache.as_ref().and_then(|document| document.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(backend = BACKEND, key = %key, "Storing value");
        self.update(|document| {
            document.insert(key.to_string(), value.to_string());
            true
        })
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        debug!(backend = BACKEND, key = %key, "Removing value");
        self.update(|document| document.remove(key).is_some()).await
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
