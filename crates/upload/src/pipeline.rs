//! The producer/uploader pipeline for one object.

use crate::auth::TokenProvider;
use crate::error::{UploadError, UploadResult};
use crate::mime::sniff_content_type;
use crate::negotiator::SessionNegotiator;
use crate::producer::ChunkProducer;
use crate::uploader::ChunkUploader;
use futures::TryStreamExt;
use piecestash_core::config::UploadConfig;
use piecestash_core::{SNIFF_LEN, UploadSession, UploadState};
use piecestash_storage::{ObjectStore, PieceHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Read buffer in front of the source; at least [`SNIFF_LEN`].
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Result of a finalized upload.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub object_name: String,
    pub locator: String,
    pub mime_type: String,
    pub total_length: u64,
    pub units: u64,
}

/// Streams objects to the remote endpoint through a session.
///
/// A producer task reads window-sized units into a bounded queue that the
/// uploader drains. The producer reserves a queue slot before reading, so
/// with the default `handoff_capacity` of 1 at most two windows are held per
/// upload: the one in flight and the one queued.
pub struct UploadPipeline {
    negotiator: SessionNegotiator,
    uploader: ChunkUploader,
    config: UploadConfig,
}

impl UploadPipeline {
    /// Build a pipeline from validated configuration.
    pub fn new(config: UploadConfig, token: Arc<dyn TokenProvider>) -> UploadResult<Self> {
        config.validate().map_err(UploadError::Config)?;

        // 308 is the protocol's "continue" and must never be followed.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            negotiator: SessionNegotiator::new(http.clone(), &config, token.clone()),
            uploader: ChunkUploader::new(http, &config, token),
            config,
        })
    }

    /// Override the initial retry delay of the uploader.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.uploader = self.uploader.with_backoff(backoff);
        self
    }

    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload everything `reader` yields as `object_name`.
    ///
    /// Resolves once the remote has finalized the object. Any read failure,
    /// fatal response or cancellation aborts the session; nothing is
    /// finalized remotely unless the final unit was accepted.
    #[instrument(skip(self, reader, cancel))]
    pub async fn upload<R>(
        &self,
        object_name: &str,
        reader: R,
        cancel: CancellationToken,
    ) -> UploadResult<UploadOutcome>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE.max(SNIFF_LEN), reader);
        let head = reader.fill_buf().await.map_err(UploadError::Read)?;
        let mime_type = sniff_content_type(&head[..head.len().min(SNIFF_LEN)]);

        let parent = self.config.effective_parent();
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            session = self.negotiator.open(object_name, mime_type, parent) => session?,
        };

        match self.stream(&mut session, reader, &cancel).await {
            Ok(units) => Ok(UploadOutcome {
                object_name: session.object_name,
                locator: session.locator,
                mime_type: session.mime_type,
                total_length: session.next_offset,
                units,
            }),
            Err(e) => {
                if let Err(state_err) = session.transition(UploadState::Aborted) {
                    tracing::debug!(error = %state_err, "Session already terminal");
                }
                tracing::warn!(
                    object = %object_name,
                    offset = session.next_offset,
                    error = %e,
                    "Upload aborted"
                );
                Err(e)
            }
        }
    }

    /// Run the producer task and the uploader until the session finalizes.
    async fn stream<R>(
        &self,
        session: &mut UploadSession,
        reader: BufReader<R>,
        cancel: &CancellationToken,
    ) -> UploadResult<u64>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let window = usize::try_from(self.config.window_size)
            .map_err(|_| UploadError::Config("window_size exceeds address space".to_string()))?;
        let (tx, rx) = mpsc::channel(self.config.handoff_capacity);

        // Stopping either stage stops the other; the caller's token is only
        // ever observed, never cancelled.
        let stop = cancel.child_token();
        let producer = tokio::spawn(ChunkProducer::new(reader, window).run(tx, stop.clone()));

        let uploaded = self.uploader.run(session, rx, &stop).await;
        if uploaded.is_err() {
            stop.cancel();
        }
        let produced = producer
            .await
            .map_err(|e| UploadError::Task(e.to_string()))?;

        match (produced, uploaded) {
            // A failed read is the root cause of whatever the uploader saw.
            (Err(e @ UploadError::Read(_)), _) => Err(e),
            (_, Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Ok(read), Ok(units)) => {
                tracing::debug!(bytes = read, units, "Pipeline drained");
                Ok(units)
            }
        }
    }

    /// Upload the object stored under `key` in `store`.
    pub async fn upload_object(
        &self,
        store: &dyn ObjectStore,
        key: &str,
        object_name: &str,
        cancel: CancellationToken,
    ) -> UploadResult<UploadOutcome> {
        let stream = store
            .get_stream(key)
            .await?
            .map_err(std::io::Error::other);
        self.upload(object_name, StreamReader::new(stream), cancel)
            .await
    }

    /// Upload a piece's completed instance.
    ///
    /// The piece must stay complete until this resolves.
    pub async fn upload_piece(
        &self,
        piece: &PieceHandle,
        object_name: &str,
        cancel: CancellationToken,
    ) -> UploadResult<UploadOutcome> {
        if !piece.completion().await.complete {
            return Err(UploadError::PieceIncomplete(piece.piece().hash.to_hex()));
        }
        let key = piece.piece().completed_key();
        self.upload_object(
            piece.pieces().object_store().as_ref(),
            &key,
            object_name,
            cancel,
        )
        .await
    }
}
