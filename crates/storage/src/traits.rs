//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Key-addressed blob store the piece store is built on.
///
/// Keys are `/`-separated paths. A key with children acts as a container;
/// containers exist implicitly while they hold at least one object.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes when the object ends first, and an empty buffer when
    /// `offset` is at or past the end.
    async fn read_at(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes>;

    /// Put an object atomically, replacing any previous content wholesale.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List the names of the direct children of a container key.
    ///
    /// A missing container lists as empty.
    async fn list_children(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Get the name of this storage backend.
    ///
    /// Used for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}
