pub mod fixtures;

use piecestash_storage::{ChunkedPieceStore, FilesystemBackend, MemoryBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A piece store over a temporary filesystem root.
pub struct TestPieces {
    pub pieces: ChunkedPieceStore,
    pub store: Arc<dyn ObjectStore>,
    _dir: Option<TempDir>,
}

impl TestPieces {
    pub async fn filesystem() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let backend = FilesystemBackend::new(dir.path())
            .await
            .expect("filesystem backend");
        let store: Arc<dyn ObjectStore> = Arc::new(backend);
        Self {
            pieces: ChunkedPieceStore::new(store.clone()),
            store,
            _dir: Some(dir),
        }
    }

    pub fn memory() -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
        Self {
            pieces: ChunkedPieceStore::new(store.clone()),
            store,
            _dir: None,
        }
    }
}
