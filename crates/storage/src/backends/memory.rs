//! In-process memory backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::instrument;

/// Object store holding everything in a sorted map.
///
/// Meant for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    async fn lookup(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|s| s.is_empty() || s == "..")
    {
        return Err(StorageError::InvalidKey(format!("malformed key: {key:?}")));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        validate_key(key)?;
        let data = self.lookup(key).await?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        self.lookup(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let data = self.lookup(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn read_at(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes> {
        validate_key(key)?;
        let data = self.lookup(key).await?;
        let size = data.len() as u64;
        if offset >= size {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(len).min(size);
        Ok(data.slice(offset as usize..end as usize))
    }

    #[instrument(skip(self, data), fields(backend = "memory", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list_children(&self, prefix: &str) -> StorageResult<Vec<String>> {
        validate_key(prefix)?;
        let container = format!("{prefix}/");
        let objects = self.objects.read().await;
        let names: BTreeSet<String> = objects
            .range(container.clone()..)
            .take_while(|(key, _)| key.starts_with(&container))
            .filter_map(|(key, _)| key[container.len()..].split('/').next())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
