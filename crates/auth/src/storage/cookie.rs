//! Cookie-backed storage for server-rendered request/response cycles
//!
//! A [`CookieStorage`] is built per request from the incoming `Cookie`
//! header. Reads see the request jar plus any writes made during the
//! request; writes and removals queue `Set-Cookie` header values that the
//! host drains with [`CookieStorage::take_set_cookie_headers`] and attaches
//! to the response.
//!
//! Values are percent-encoded. A value whose encoded form does not fit in
//! one cookie is split across `key.0..key.N` (see `chunked`), up to
//! [`CookieOptions::max_chunks`] cookies.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chunked::{self, ChunkStore};
use super::StorageAdapter;
use crate::error::{StorageError, StorageResult};

const BACKEND: &str = "cookie";

/// Per-cookie size limit most user agents enforce (name + value)
pub const DEFAULT_MAX_COOKIE_BYTES: usize = 4096;

/// Default number of cookies one value may span
pub const DEFAULT_MAX_CHUNKS: usize = 4;

/// SameSite cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    /// Requires `Secure`
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "Strict"),
            Self::Lax => write!(f, "Lax"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Attributes applied to every cookie this storage writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// Lifetime of written cookies; `None` makes them session cookies
    pub max_age: Option<Duration>,
    pub max_cookie_bytes: usize,
    pub max_chunks: usize,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            max_age: Some(Duration::from_secs(29 * 24 * 60 * 60)),
            max_cookie_bytes: DEFAULT_MAX_COOKIE_BYTES,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl CookieOptions {
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn max_cookie_bytes(mut self, bytes: usize) -> Self {
        self.max_cookie_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_chunks(mut self, chunks: usize) -> Self {
        self.max_chunks = chunks;
        self
    }

    /// Render a `Set-Cookie` header value
    fn header(&self, name: &str, encoded_value: &str, max_age: Option<Duration>) -> String {
        let mut header = format!("{name}={encoded_value}; Path={}", self.path);
        if let Some(domain) = &self.domain {
            header.push_str(&format!("; Domain={domain}"));
        }
        if let Some(max_age) = max_age {
            header.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header.push_str(&format!("; SameSite={}", self.same_site));
        header
    }
}

/// Request jar plus queued response headers
#[derive(Debug, Default)]
struct CookieJar {
    /// Encoded values visible to this request
    values: BTreeMap<String, String>,
    /// Latest `Set-Cookie` value per cookie name
    pending: BTreeMap<String, String>,
}

struct JarWriter<'a> {
    jar: &'a mut CookieJar,
    options: &'a CookieOptions,
}

impl ChunkStore for JarWriter<'_> {
    fn read_part(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.jar.values.get(key).cloned())
    }

    fn write_part(&mut self, key: &str, value: &str) -> StorageResult<()> {
        let header = self.options.header(key, value, self.options.max_age);
        self.jar.values.insert(key.to_string(), value.to_string());
        self.jar.pending.insert(key.to_string(), header);
        Ok(())
    }

    fn delete_part(&mut self, key: &str) -> StorageResult<()> {
        let header = self.options.header(key, "", Some(Duration::ZERO));
        self.jar.values.remove(key);
        self.jar.pending.insert(key.to_string(), header);
        Ok(())
    }
}

/// Storage over an HTTP cookie jar
#[derive(Debug)]
pub struct CookieStorage {
    options: CookieOptions,
    jar: Mutex<CookieJar>,
}

impl CookieStorage {
    /// Storage for a request without cookies
    #[must_use]
    pub fn new(options: CookieOptions) -> Self {
        Self { options, jar: Mutex::new(CookieJar::default()) }
    }

    /// Storage seeded from a request `Cookie` header (`a=1; b=2`)
    ///
    /// Malformed pairs are ignored.
    #[must_use]
    pub fn from_cookie_header(header: &str, options: CookieOptions) -> Self {
        let values = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { options, jar: Mutex::new(CookieJar { values, pending: BTreeMap::new() }) }
    }

    /// Drain the `Set-Cookie` header values queued since the last call
    #[must_use]
    pub fn take_set_cookie_headers(&self) -> Vec<String> {
        std::mem::take(&mut self.jar.lock().pending).into_values().collect()
    }

    #[must_use]
    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    fn value_budget(&self, key: &str) -> usize {
        let longest_name = chunked::part_key(key, self.options.max_chunks).len();
        self.options.max_cookie_bytes.saturating_sub(longest_name + 1)
    }
}

fn validate_name(key: &str) -> StorageResult<()> {
    const SEPARATORS: &str = "()<>@,;:\\\"/[]?={} \t";
    if key.is_empty() || key.chars().any(|c| c.is_control() || SEPARATORS.contains(c)) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Length of `ch` after percent-encoding
fn encoded_len(ch: char) -> usize {
    if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_' | '~') {
        1
    } else {
        ch.len_utf8() * 3
    }
}

#[async_trait]
impl StorageAdapter for CookieStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_name(key)?;
        let mut jar = self.jar.lock();
        let reader = JarWriter { jar: &mut *jar, options: &self.options };
        let Some(encoded) = chunked::read(&reader, key)? else {
            return Ok(None);
        };
        let decoded = urlencoding::decode(&encoded)
            .map_err(|e| StorageError::unavailable(BACKEND, format!("cookie '{key}': {e}")))?;
        Ok(Some(decoded.into_owned()))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_name(key)?;
        let budget = self.value_budget(key);
        let pieces = chunked::split(value, budget, encoded_len).ok_or(
            StorageError::QuotaExceeded {
                backend: BACKEND,
                limit: self.options.max_cookie_bytes,
                requested: value.len(),
            },
        )?;
        let encoded: Vec<String> =
            pieces.iter().map(|piece| urlencoding::encode(piece).into_owned()).collect();
        let encoded: Vec<&str> = encoded.iter().map(String::as_str).collect();

        debug!(backend = BACKEND, key = %key, cookies = encoded.len(), "Storing value");
        let mut jar = self.jar.lock();
        let mut writer = JarWriter { jar: &mut *jar, options: &self.options };
        chunked::write(&mut writer, BACKEND, key, &encoded, self.options.max_chunks)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        validate_name(key)?;
        debug!(backend = BACKEND, key = %key, "Removing value");
        let mut jar = self.jar.lock();
        let mut writer = JarWriter { jar: &mut *jar, options: &self.options };
        chunked::remove(&mut writer, key)
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
