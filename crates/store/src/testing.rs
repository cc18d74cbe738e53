//! Test doubles for blob storage
//!
//! `FlakyStore` wraps another store and fails operations on demand, so
//! retry and buffer-preservation behavior can be exercised
//! deterministically.

use crate::blob::BlobStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use trellis_core::{Error, Result};

/// Failure modes a [`FlakyStore`] can inject on `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// All puts succeed
    None,
    /// Every put fails with a transient error
    AlwaysTransient,
    /// Every put fails with a permanent error
    AlwaysPermanent,
    /// The next N puts fail transiently, then puts succeed
    TransientTimes(u32),
}

/// A blob store that injects failures into `put` operations.
pub struct FlakyStore {
    inner: Arc<dyn BlobStore>,
    mode: Mutex<FailureMode>,
    attempts: AtomicU64,
}

impl FlakyStore {
    /// Wrap `inner`, starting with no failures.
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        FlakyStore {
            inner,
            mode: Mutex::new(FailureMode::None),
            attempts: AtomicU64::new(0),
        }
    }

    /// Change the injected failure mode.
    pub fn set_mode(&self, mode: FailureMode) {
        *self.mode.lock() = mode;
    }

    /// Total put attempts observed, including failed ones.
    pub fn put_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl BlobStore for FlakyStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let mut mode = self.mode.lock();
        match *mode {
            FailureMode::None => {}
            FailureMode::AlwaysTransient => {
                return Err(Error::transient("injected: connection reset by peer"))
            }
            FailureMode::AlwaysPermanent => {
                return Err(Error::permanent("injected: HTTP 403 forbidden"))
            }
            FailureMode::TransientTimes(n) => {
                if n > 0 {
                    *mode = FailureMode::TransientTimes(n - 1);
                    return Err(Error::transient("injected: HTTP 503 service unavailable"));
                }
            }
        }
        drop(mode);
        self.inner.put(key, bytes)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.inner.get_range(key, offset, length)
    }

    fn head(&self, key: &str) -> Result<u64> {
        self.inner.head(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
}
