//! Resumable, range-addressed streaming upload of completed objects.
//!
//! This crate provides:
//! - [`SessionNegotiator`]: opens an upload session and returns its locator
//! - [`ChunkProducer`] / [`ChunkUploader`]: window-sized units sent as
//!   `bytes <start>-<end>/<total-or-*>` requests
//! - [`UploadPipeline`]: both stages joined by a bounded queue, with
//!   cancellation and per-request timeouts
//! - [`UploadRegistry`]: caller-owned tracking of in-flight uploads

pub mod auth;
pub mod error;
pub mod mime;
pub mod negotiator;
pub mod pipeline;
pub mod producer;
pub mod registry;
pub mod uploader;

pub use auth::{StaticToken, TokenProvider};
pub use error::{UploadError, UploadResult};
pub use mime::sniff_content_type;
pub use negotiator::{ObjectMetadata, SessionNegotiator};
pub use pipeline::{UploadOutcome, UploadPipeline};
pub use producer::{ChunkProducer, UploadUnit};
pub use registry::UploadRegistry;
pub use uploader::ChunkUploader;
pub use tokio_util::sync::CancellationToken;
