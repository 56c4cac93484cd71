//! Resource store abstraction and the chunked piece store.
//!
//! This crate provides:
//! - The key-addressed [`ObjectStore`] capability with atomic puts
//! - Backends: local filesystem and in-memory
//! - [`ChunkedPieceStore`]: offset-tagged chunk storage with merge-on-completion

pub mod backends;
pub mod error;
pub mod pieces;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StorageError, StorageResult};
pub use pieces::{ChunkInfo, ChunkedPieceStore, PieceHandle};
pub use traits::{ByteStream, ObjectMeta, ObjectStore};

use piecestash_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}
