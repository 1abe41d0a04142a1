//! File-backed key-value store.
//!
//! [`FileStore`] keeps the whole keyspace in one JSON document on disk and
//! mirrors it in memory. Every mutation rewrites the document through a
//! temporary sibling file followed by a rename, so a crash mid-write leaves
//! either the old or the new document, never a torn one.
//!
//! Values are stored base64-encoded so arbitrary bytes survive the JSON
//! round trip.
//!
//! The keyspace of an attribution client is a handful of small records, so
//! rewriting the document on each `set` is acceptable.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::{
    backend::KeyValueStore,
    error::{StorageError, StorageResult},
};

/// Durable key-value store persisted as a single JSON file.
pub struct FileStore {
    path: PathBuf,
    // Held across the disk write so concurrent mutations serialize.
    data: Mutex<BTreeMap<String, Bytes>>,
}

impl FileStore {
    /// Opens the store at `path`, loading existing contents.
    ///
    /// A missing file is treated as an empty store; the file is created on
    /// the first write. The parent directory must exist.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Io`] if the file exists but cannot be read
    /// - [`StorageError::Serialization`] if the file is not a valid store document
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let data = match tokio::fs::read(&path).await {
            Ok(raw) => decode_document(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StorageError::io_with_source(
                    format!("read {}", path.display()),
                    e,
                ));
            },
        };

        tracing::debug!(path = %path.display(), keys = data.len(), "opened file store");
        Ok(Self { path, data: Mutex::new(data) })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &BTreeMap<String, Bytes>) -> StorageResult<()> {
        let document = encode_document(data)?;

        let file_name = self.path.file_name().and_then(|n| n.to_str()).unwrap_or("store");
        let tmp_path =
            self.path.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()));

        if let Err(e) = tokio::fs::write(&tmp_path, document).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StorageError::io_with_source(
                format!("write {}", tmp_path.display()),
                e,
            ));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StorageError::io_with_source(
                format!("rename {} to {}", tmp_path.display(), self.path.display()),
                e,
            ));
        }

        Ok(())
    }
}

fn decode_document(raw: &[u8]) -> StorageResult<BTreeMap<String, Bytes>> {
    let encoded: BTreeMap<String, String> = serde_json::from_slice(raw)
        .map_err(|e| StorageError::serialization_with_source("parse store document", e))?;

    encoded
        .into_iter()
        .map(|(key, value)| {
            STANDARD.decode(value).map(|bytes| (key.clone(), Bytes::from(bytes))).map_err(|e| {
                StorageError::serialization_with_source(format!("decode value for '{key}'"), e)
            })
        })
        .collect()
}

fn encode_document(data: &BTreeMap<String, Bytes>) -> StorageResult<Vec<u8>> {
    let encoded: BTreeMap<&str, String> =
        data.iter().map(|(key, value)| (key.as_str(), STANDARD.encode(value))).collect();

    serde_json::to_vec_pretty(&encoded)
        .map_err(|e| StorageError::serialization_with_source("encode store document", e))
}

#[async_trait]
impl KeyValueStore for FileStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    #[tracing::instrument(skip(self, value), fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.lock().await;
        let previous = data.insert(key.to_owned(), Bytes::from(value));

        if let Err(e) = self.persist(&data).await {
            // Roll back so memory never runs ahead of disk.
            match previous {
                Some(old) => data.insert(key.to_owned(), old),
                None => data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut data = self.data.lock().await;
        let Some(previous) = data.remove(key) else {
            return Ok(());
        };

        if let Err(e) = self.persist(&data).await {
            data.insert(key.to_owned(), previous);
            return Err(e);
        }
        Ok(())
    }
}
