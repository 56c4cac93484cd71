//! Chunked piece store.
//!
//! Every write to an incomplete piece lands as its own chunk object under
//! `incomplete/<hash>/<offset>.<sequence>`. Reads before completion are
//! synthesized from the union of chunks; completion merges them into a single
//! `completed/<hash>` object and deletes the chunks.
//!
//! At any byte position the covering chunk with the greatest
//! `(offset, sequence)` supplies the data. Two writes at the same offset are
//! therefore resolved in favour of the later one.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use piecestash_core::{ChunkName, Completion, Piece};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::instrument;

/// Maps pieces to offset-tagged chunks in an [`ObjectStore`].
///
/// Cheap to clone; clones share the store and the chunk sequence counter.
#[derive(Clone)]
pub struct ChunkedPieceStore {
    store: Arc<dyn ObjectStore>,
    sequence: Arc<AtomicU64>,
}

impl ChunkedPieceStore {
    /// Create a piece store on top of `store`.
    ///
    /// The chunk sequence is seeded from the wall clock so that chunks written
    /// after a restart still sort after older ones.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let seed = time::OffsetDateTime::now_utc().unix_timestamp_nanos().max(0) as u64;
        Self {
            store,
            sequence: Arc::new(AtomicU64::new(seed)),
        }
    }

    /// The underlying resource store.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Get a handle for one piece.
    pub fn piece(&self, piece: Piece) -> PieceHandle {
        PieceHandle {
            pieces: self.clone(),
            piece,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

/// A chunk currently stored for an incomplete piece.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    pub name: ChunkName,
    pub key: String,
    pub size: u64,
}

impl ChunkInfo {
    /// One past the last piece offset this chunk holds.
    fn end(&self) -> u64 {
        self.name.offset.saturating_add(self.size)
    }
}

/// One contiguous read out of a single chunk.
#[derive(Debug, PartialEq, Eq)]
struct Segment {
    chunk: usize,
    chunk_offset: u64,
    len: u64,
}

/// Plan how to serve `[offset, offset + len)` from `chunks` (sorted by name).
///
/// Stops at the first byte no chunk covers.
fn plan_read(chunks: &[ChunkInfo], offset: u64, len: u64) -> Vec<Segment> {
    let end = offset.saturating_add(len);
    let mut cursor = offset;
    let mut segments = Vec::new();

    while cursor < end {
        // chunks[..upper] start at or before the cursor.
        let upper = chunks.partition_point(|c| c.name.offset <= cursor);
        let Some(index) = chunks[..upper].iter().rposition(|c| c.end() > cursor) else {
            break;
        };
        let chunk = &chunks[index];

        // A chunk starting further on takes over from its first byte.
        let mut stop = chunk.end().min(end);
        if let Some(next) = chunks.get(upper) {
            stop = stop.min(next.name.offset);
        }

        segments.push(Segment {
            chunk: index,
            chunk_offset: cursor - chunk.name.offset,
            len: stop - cursor,
        });
        cursor = stop;
    }

    segments
}

/// Storage for a single piece.
#[derive(Clone)]
pub struct PieceHandle {
    pieces: ChunkedPieceStore,
    piece: Piece,
}

impl PieceHandle {
    /// The piece this handle addresses.
    pub fn piece(&self) -> &Piece {
        &self.piece
    }

    /// The piece store this handle belongs to.
    pub fn pieces(&self) -> &ChunkedPieceStore {
        &self.pieces
    }

    fn store(&self) -> &dyn ObjectStore {
        self.pieces.store.as_ref()
    }

    /// Store `data` as a new chunk beginning at `offset`.
    ///
    /// Never rejected for overlap or ordering. Returns the number of bytes
    /// written.
    #[instrument(skip(self, data), fields(piece = %self.piece.hash, size = data.len()))]
    pub async fn write(&self, offset: u64, data: Bytes) -> StorageResult<usize> {
        let name = ChunkName::new(offset, self.pieces.next_sequence());
        let len = data.len();
        self.store().put(&self.piece.chunk_key(&name), data).await?;
        tracing::trace!(chunk = %name, "chunk stored");
        Ok(len)
    }

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Complete pieces are served from the completed instance; otherwise the
    /// read is synthesized from the chunks and stops at the first uncovered
    /// byte. An empty result means end-of-data.
    #[instrument(skip(self), fields(piece = %self.piece.hash))]
    pub async fn read_at(&self, offset: u64, len: u64) -> StorageResult<Bytes> {
        if offset >= self.piece.length {
            return Ok(Bytes::new());
        }
        let len = len.min(self.piece.length - offset);

        if self.completion().await.complete {
            return self
                .store()
                .read_at(&self.piece.completed_key(), offset, len)
                .await;
        }

        let chunks = self.chunks().await?;
        self.read_chunks(&chunks, offset, len).await
    }

    /// Whether a completed instance of exactly the declared length exists.
    ///
    /// Store failures report the piece as incomplete.
    pub async fn completion(&self) -> Completion {
        match self.store().head(&self.piece.completed_key()).await {
            Ok(meta) => Completion {
                complete: meta.size == self.piece.length,
            },
            Err(StorageError::NotFound(_)) => Completion::incomplete(),
            Err(e) => {
                tracing::warn!(
                    piece = %self.piece.hash,
                    error = %e,
                    "Failed to stat completed instance, reporting incomplete"
                );
                Completion::incomplete()
            }
        }
    }

    /// Merge all chunks into the completed instance, then delete the chunks.
    ///
    /// Fails without deleting anything if the chunks do not cover the whole
    /// piece. Calling this again on a complete piece is a no-op.
    #[instrument(skip(self), fields(piece = %self.piece.hash, length = self.piece.length))]
    pub async fn mark_complete(&self) -> StorageResult<()> {
        let chunks = self.chunks().await?;
        let data = self.read_chunks(&chunks, 0, self.piece.length).await?;

        if (data.len() as u64) < self.piece.length {
            if self.completion().await.complete {
                tracing::debug!("Piece already complete, nothing to merge");
                return Ok(());
            }
            return Err(StorageError::IncompletePiece {
                piece: self.piece.hash.to_hex(),
                covered: data.len() as u64,
                length: self.piece.length,
            });
        }

        self.store()
            .put(&self.piece.completed_key(), data)
            .await?;

        for chunk in &chunks {
            match self.store().delete(&chunk.key).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(chunk = %chunk.key, error = %e, "Failed to delete merged chunk");
                }
            }
        }

        tracing::info!(chunks = chunks.len(), "Piece completed");
        Ok(())
    }

    /// Delete the completed instance. Idempotent.
    #[instrument(skip(self), fields(piece = %self.piece.hash))]
    pub async fn mark_incomplete(&self) -> StorageResult<()> {
        match self.store().delete(&self.piece.completed_key()).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// List this piece's chunks, sorted by `(offset, sequence)`.
    ///
    /// Names that do not parse as chunk names are ignored, as are chunks
    /// deleted between listing and inspection.
    pub async fn chunks(&self) -> StorageResult<Vec<ChunkInfo>> {
        let dir = self.piece.chunk_dir();
        let names = self.store().list_children(&dir).await?;

        let lookups = names.into_iter().filter_map(|raw| match ChunkName::parse(&raw) {
            Ok(name) => Some(name),
            Err(_) => {
                tracing::debug!(piece = %self.piece.hash, name = %raw, "Ignoring foreign entry");
                None
            }
        });
        let lookups = lookups.map(|name| async move {
            let key = self.piece.chunk_key(&name);
            match self.store().head(&key).await {
                Ok(meta) => Ok(Some(ChunkInfo {
                    name,
                    key,
                    size: meta.size,
                })),
                Err(StorageError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        });

        let mut chunks: Vec<ChunkInfo> = try_join_all(lookups).await?.into_iter().flatten().collect();
        chunks.sort_by_key(|c| c.name);
        Ok(chunks)
    }

    async fn read_chunks(
        &self,
        chunks: &[ChunkInfo],
        offset: u64,
        len: u64,
    ) -> StorageResult<Bytes> {
        let segments = plan_read(chunks, offset, len);
        let mut out = BytesMut::with_capacity(segments.iter().map(|s| s.len as usize).sum());

        for segment in segments {
            let chunk = &chunks[segment.chunk];
            let data = self
                .store()
                .read_at(&chunk.key, segment.chunk_offset, segment.len)
                .await?;
            let short = (data.len() as u64) < segment.len;
            out.extend_from_slice(&data);
            if short {
                // The chunk changed under us; serve what is contiguous.
                break;
            }
        }

        Ok(out.freeze())
    }
}
