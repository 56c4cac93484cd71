//! Piece identity, completion state and chunk naming.

use crate::hash::PieceHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key prefix for completed instances.
pub const COMPLETED_PREFIX: &str = "completed";

/// Key prefix for the per-piece chunk containers.
pub const INCOMPLETE_PREFIX: &str = "incomplete";

/// A fixed-identity unit of a larger object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    /// Content hash identifying the piece.
    pub hash: PieceHash,
    /// Declared length in bytes.
    pub length: u64,
}

impl Piece {
    /// Create a new piece.
    pub fn new(hash: PieceHash, length: u64) -> Self {
        Self { hash, length }
    }

    /// Resource store key of the completed instance.
    pub fn completed_key(&self) -> String {
        format!("{}/{}", COMPLETED_PREFIX, self.hash.to_hex())
    }

    /// Resource store key of the container holding this piece's chunks.
    pub fn chunk_dir(&self) -> String {
        format!("{}/{}", INCOMPLETE_PREFIX, self.hash.to_hex())
    }

    /// Resource store key of a single chunk.
    pub fn chunk_key(&self, name: &ChunkName) -> String {
        format!("{}/{}", self.chunk_dir(), name)
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.hash, self.length)
    }
}

/// Completion state of a piece.
///
/// Always definite: there is no "unknown" state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub complete: bool,
}

impl Completion {
    pub fn complete() -> Self {
        Self { complete: true }
    }

    pub fn incomplete() -> Self {
        Self { complete: false }
    }
}

/// Name of a chunk within its piece container: `<offset>.<sequence>`.
///
/// Ordering is by offset, then by creation sequence, so the greatest name that
/// covers a byte is the most recent write starting closest to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkName {
    /// Byte position within the piece where the chunk begins.
    pub offset: u64,
    /// Creation sequence; higher is newer.
    pub sequence: u64,
}

impl ChunkName {
    pub fn new(offset: u64, sequence: u64) -> Self {
        Self { offset, sequence }
    }

    /// Parse a chunk name. A bare `<offset>` is accepted with sequence 0.
    pub fn parse(name: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::InvalidChunkName(name.to_string());
        let (offset, sequence) = match name.split_once('.') {
            Some((offset, sequence)) => (offset, sequence.parse().map_err(|_| invalid())?),
            None => (name, 0),
        };
        let offset = offset.parse().map_err(|_| invalid())?;
        Ok(Self { offset, sequence })
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.offset, self.sequence)
    }
}
