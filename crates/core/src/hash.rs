//! Piece hash type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of a piece hash (SHA-1 sized, as used by torrent metainfo).
pub const PIECE_HASH_LEN: usize = 20;

/// The fixed-length content hash that identifies a piece.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PieceHash([u8; PIECE_HASH_LEN]);

impl PieceHash {
    /// Create a new PieceHash from raw bytes.
    pub fn from_bytes(bytes: [u8; PIECE_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PIECE_HASH_LEN] {
        &self.0
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != PIECE_HASH_LEN * 2 {
            return Err(crate::Error::InvalidHash(format!(
                "expected {} hex chars, got {}",
                PIECE_HASH_LEN * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; PIECE_HASH_LEN];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl FromStr for PieceHash {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for PieceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for PieceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
