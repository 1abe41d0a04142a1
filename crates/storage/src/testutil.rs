//! Shared test utilities for key-value store consumers.
//!
//! Feature-gated behind `testutil` to keep these out of production builds.
//!
//! ```toml
//! [dev-dependencies]
//! attribution-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    KeyValueStore,
    error::{StorageError, StorageResult},
    memory::MemoryStore,
};

/// A [`MemoryStore`] wrapper whose writes can be made to fail on demand.
///
/// Counts successful writes so tests can assert that a code path did not
/// persist anything.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl FlakyStore {
    /// Creates a store that succeeds until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `set`/`delete` calls fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of writes that reached the inner store.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::internal("injected write failure"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.check_writable()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.inner.delete(key).await
    }
}
