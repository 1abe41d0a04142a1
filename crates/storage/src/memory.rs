//! In-memory key-value store.
//!
//! [`MemoryStore`] is the reference [`KeyValueStore`] for tests and
//! development. Nothing survives a process exit.
//!
//! Thread-safe via [`parking_lot::RwLock`]; clones share the same map.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{backend::KeyValueStore, error::StorageResult};

/// In-memory key-value store.
///
/// # Cloning
///
/// `MemoryStore` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data, which lets a test hand one clone to a client and
/// inspect the other.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    #[tracing::instrument(skip(self, value), fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key.to_owned(), Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
