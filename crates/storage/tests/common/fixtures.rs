use bytes::Bytes;
use piecestash_core::{Piece, PieceHash};

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A piece whose hash is derived from `seed`.
pub fn piece(seed: u8, length: u64) -> Piece {
    Piece::new(PieceHash::from_bytes([seed; 20]), length)
}

/// Split `data` into `(offset, bytes)` writes of at most `size` bytes.
pub fn split_writes(data: &Bytes, size: usize) -> Vec<(u64, Bytes)> {
    (0..data.len())
        .step_by(size)
        .map(|start| {
            let end = (start + size).min(data.len());
            (start as u64, data.slice(start..end))
        })
        .collect()
}
