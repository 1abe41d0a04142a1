//! Key-value store trait definition.
//!
//! This module defines [`KeyValueStore`], the durable storage interface the
//! host environment supplies to the attribution client. The contract is
//! deliberately small:
//! - **String keys, byte values**: No assumptions about serialization format
//! - **Async by default**: Backends may touch disk without blocking the runtime
//! - **Last write wins**: `set` overwrites, `delete` of a missing key is a no-op
//!
//! Typed records are layered on top through [`JsonStoreExt`].
//!
//! # Implementing a Backend
//!
//! 1. Implement [`KeyValueStore`]
//! 2. Map backend-specific errors to [`StorageError`]
//!
//! See [`MemoryStore`](crate::MemoryStore) for a reference implementation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{StorageError, StorageResult};

/// Durable key-value storage supplied by the host.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and usable behind
/// `Arc<dyn KeyValueStore>`.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use attribution_storage::{KeyValueStore, MemoryStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
///
/// store.set("install_id", b"abc".to_vec()).await.unwrap();
/// assert_eq!(store.get("install_id").await.unwrap(), Some(Bytes::from("abc")));
/// # });
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Stores a value, overwriting any existing one.
    ///
    /// Once this returns `Ok`, the value must survive a process restart for
    /// durable backends.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Deletes a key. Deleting a missing key is a no-op.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Typed JSON access on top of any [`KeyValueStore`].
///
/// `serde_json` serializes struct fields in declaration order, so records
/// built from structs round-trip to byte-identical values.
#[async_trait]
pub trait JsonStoreExt: KeyValueStore {
    /// Reads and deserializes the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored bytes are not
    /// valid JSON for `T`.
    async fn get_json<T>(&self, key: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| {
                StorageError::serialization_with_source(format!("decode record '{key}'"), e)
            }),
            None => Ok(None),
        }
    }

    /// Serializes `value` as JSON and stores it under `key`.
    async fn set_json<T>(&self, key: &str, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_vec(value).map_err(|e| {
            StorageError::serialization_with_source(format!("encode record '{key}'"), e)
        })?;
        self.set(key, raw).await
    }
}

impl<S: KeyValueStore + ?Sized> JsonStoreExt for S {}
