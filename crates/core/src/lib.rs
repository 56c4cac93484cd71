//! Core domain types for the piece stash.
//!
//! This crate defines the data model shared by the storage and upload crates:
//! - Piece identity and completion state
//! - Offset-tagged chunk naming within the resource store
//! - Upload session lifecycle and range addressing
//! - Configuration records

pub mod config;
pub mod error;
pub mod hash;
pub mod piece;
pub mod upload;

pub use error::{Error, Result};
pub use hash::PieceHash;
pub use piece::{ChunkName, Completion, Piece};
pub use upload::{ContentRange, UploadSession, UploadState};

/// Default upload window: 16 MiB
pub const DEFAULT_WINDOW_SIZE: u64 = 16 * 1024 * 1024;

/// Non-final upload ranges must be a multiple of this size: 256 KiB
pub const WINDOW_ALIGNMENT: u64 = 256 * 1024;

/// Number of leading bytes inspected when sniffing a content type.
pub const SNIFF_LEN: usize = 512;
