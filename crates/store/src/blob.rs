//! Blob storage abstraction
//!
//! Coordinators publish immutable blobs (chunks, event logs, combined
//! index files); edge readers fetch them whole or by byte range. Writes
//! have read-your-write semantics within one coordinator; cross-edge
//! visibility is eventually consistent, which readers tolerate by loading
//! stale generations.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use trellis_core::{Error, Result};

/// A blob storage backend.
///
/// Implementations must be safe to share across threads; every operation
/// is synchronous and bounded by the backend's own request timeout.
pub trait BlobStore: Send + Sync {
    /// Store a blob under `key`, replacing any existing value.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch a whole blob.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Fetch `length` bytes starting at `offset`, clamped to the blob end.
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Size of a blob in bytes.
    fn head(&self, key: &str) -> Result<u64>;

    /// Keys starting with `prefix`, in lexicographic order.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a blob; removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Clamp a range request against a blob's length, S3-style.
pub(crate) fn clamp_range(len: usize, offset: u64, length: u64) -> Result<(usize, usize)> {
    let start = offset as usize;
    if start >= len {
        return Err(Error::bad_input(format!(
            "range offset {} beyond blob of {} bytes",
            offset, len
        )));
    }
    let end = start.saturating_add(length as usize).min(len);
    Ok((start, end))
}

/// In-memory blob store for tests and single-process deployments.
///
/// Tracks operation counters so tests can assert on I/O behavior
/// (exactly one put per flush, no I/O on an empty flush).
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    puts: AtomicU64,
    gets: AtomicU64,
}

impl MemoryBlobStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful put operations.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Total get/get_range operations.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True when no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.blobs
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("blob {}", key)))
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let blobs = self.blobs.read();
        let bytes = blobs
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("blob {}", key)))?;
        let (start, end) = clamp_range(bytes.len(), offset, length)?;
        Ok(bytes[start..end].to_vec())
    }

    fn head(&self, key: &str) -> Result<u64> {
        self.blobs
            .read()
            .get(key)
            .map(|b| b.len() as u64)
            .ok_or_else(|| Error::NotFound(format!("blob {}", key)))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip() {
        let store = MemoryBlobStore::new();
        store.put("ns/a", b"hello").unwrap();
        assert_eq!(store.get("ns/a").unwrap(), b"hello");
        assert_eq!(store.head("ns/a").unwrap(), 5);
        assert_eq!(store.put_count(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(store.get("nope"), Err(Error::NotFound(_))));
        assert!(matches!(store.head("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_get_range_clamps_to_end() {
        let store = MemoryBlobStore::new();
        store.put("k", b"0123456789").unwrap();
        assert_eq!(store.get_range("k", 2, 3).unwrap(), b"234");
        assert_eq!(store.get_range("k", 8, 100).unwrap(), b"89");
        assert!(store.get_range("k", 10, 1).is_err());
    }

    #[test]
    fn test_list_by_prefix() {
        let store = MemoryBlobStore::new();
        store.put("idx/ns1/1", b"a").unwrap();
        store.put("idx/ns1/2", b"b").unwrap();
        store.put("idx/ns2/1", b"c").unwrap();
        let keys = store.list("idx/ns1/").unwrap();
        assert_eq!(keys, vec!["idx/ns1/1".to_string(), "idx/ns1/2".to_string()]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryBlobStore::new();
        store.put("k", b"x").unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(store.get("k").is_err());
    }

    #[test]
    fn test_put_replaces() {
        let store = MemoryBlobStore::new();
        store.put("k", b"old").unwrap();
        store.put("k", b"new").unwrap();
        assert_eq!(store.get("k").unwrap(), b"new");
        assert_eq!(store.len(), 1);
    }
}
