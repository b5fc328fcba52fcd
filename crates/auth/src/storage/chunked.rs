//! Splitting values across several backend entries
//!
//! Cookies and keychain items have per-entry size limits that a token record
//! can exceed. Values are split into `key.0`, `key.1`, ... `key.N-1`; reading
//! concatenates consecutive parts until the first missing one.

use crate::error::{StorageError, StorageResult};

/// Upper bound on parts probed when reading or removing
const PROBE_LIMIT: usize = 64;

/// Backend primitive that stores individual parts
pub(crate) trait ChunkStore {
    fn read_part(&self, key: &str) -> StorageResult<Option<String>>;
    fn write_part(&mut self, key: &str, value: &str) -> StorageResult<()>;
    fn delete_part(&mut self, key: &str) -> StorageResult<()>;
}

/// Name of part `index` of `key`
pub(crate) fn part_key(key: &str, index: usize) -> String {
    format!("{key}.{index}")
}

/// Split `value` into pieces whose total `cost` stays within `limit`
///
/// Splits only on character boundaries. An empty value yields one empty
/// piece. Returns `None` when a single character exceeds `limit`.
pub(crate) fn split(value: &str, limit: usize, cost: impl Fn(char) -> usize) -> Option<Vec<&str>> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut used = 0;

    for (idx, ch) in value.char_indices() {
        let weight = cost(ch);
        if weight > limit {
            return None;
        }
        if used + weight > limit {
            pieces.push(&value[start..idx]);
            start = idx;
            used = 0;
        }
        used += weight;
    }
    pieces.push(&value[start..]);
    Some(pieces)
}

/// Read and join all parts of `key`; a missing `key.0` means absent
pub(crate) fn read(store: &impl ChunkStore, key: &str) -> StorageResult<Option<String>> {
    let Some(mut value) = store.read_part(&part_key(key, 0))? else {
        return Ok(None);
    };
    for index in 1..PROBE_LIMIT {
        match store.read_part(&part_key(key, index))? {
            Some(part) => value.push_str(&part),
            None => break,
        }
    }
    Ok(Some(value))
}

/// Write `pieces` as the parts of `key` and drop stale higher parts
pub(crate) fn write(
    store: &mut impl ChunkStore,
    backend: &'static str,
    key: &str,
    pieces: &[&str],
    max_parts: usize,
) -> StorageResult<()> {
    if pieces.len() > max_parts {
        return Err(StorageError::QuotaExceeded {
            backend,
            limit: max_parts,
            requested: pieces.len(),
        });
    }
    for (index, piece) in pieces.iter().enumerate() {
        store.write_part(&part_key(key, index), piece)?;
    }
    remove_from(store, key, pieces.len())
}

/// Remove every part of `key`
pub(crate) fn remove(store: &mut impl ChunkStore, key: &str) -> StorageResult<()> {
    remove_from(store, key, 0)
}

fn remove_from(store: &mut impl ChunkStore, key: &str, first: usize) -> StorageResult<()> {
    for index in first..PROBE_LIMIT {
        let part = part_key(key, index);
        if store.read_part(&part)?.is_none() {
            break;
        }
        store.delete_part(&part)?;
    }
    Ok(())
}
