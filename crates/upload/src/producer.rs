//! Chunk producer: slices a sequential reader into window-sized units.

use crate::error::{UploadError, UploadResult};
use bytes::Bytes;
use piecestash_core::ContentRange;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One window of the object, ready to transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadUnit {
    /// Object offset of the first byte.
    pub start: u64,
    pub data: Bytes,
    /// Set on the last unit; its range declares the total length.
    pub eof: bool,
}

impl UploadUnit {
    /// One past the last object offset this unit carries.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    /// The range header for sending this unit's bytes from `from` onwards.
    pub fn content_range(&self, from: u64) -> piecestash_core::Result<ContentRange> {
        let len = self.end().saturating_sub(from);
        if self.eof {
            Ok(ContentRange::last(from, len))
        } else {
            ContentRange::partial(from, len)
        }
    }
}

/// Reads fixed-size windows until end-of-data.
pub struct ChunkProducer<R> {
    reader: R,
    window: usize,
    offset: u64,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> ChunkProducer<R> {
    pub fn new(reader: R, window: usize) -> Self {
        Self {
            reader,
            window: window.max(1),
            offset: 0,
            finished: false,
        }
    }

    /// Read the next unit, or `None` once the final unit has been returned.
    ///
    /// A full window followed by end-of-data is itself the final unit, so an
    /// object of length `L` yields `ceil(L / window)` units (one for `L = 0`).
    pub async fn next_unit(&mut self) -> std::io::Result<Option<UploadUnit>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.window];
        let mut filled = 0;
        while filled < self.window {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        let eof = filled < self.window || self.reader.fill_buf().await?.is_empty();
        let unit = UploadUnit {
            start: self.offset,
            data: Bytes::from(buf),
            eof,
        };
        self.offset += filled as u64;
        self.finished = eof;
        Ok(Some(unit))
    }

    /// Feed every unit into `tx`, returning the total number of bytes read.
    ///
    /// A queue slot is reserved before each window is read, so the producer
    /// never holds a window the queue has no room for. Read failures abort
    /// the pipeline.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<UploadUnit>,
        cancel: CancellationToken,
    ) -> UploadResult<u64> {
        loop {
            if self.finished {
                return Ok(self.offset);
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit,
                    // The uploader stopped; its error explains why.
                    Err(_) => return Err(UploadError::Cancelled),
                },
            };

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                next = self.next_unit() => next,
            };
            let unit = match next {
                Ok(Some(unit)) => unit,
                Ok(None) => return Ok(self.offset),
                Err(e) => {
                    tracing::error!(offset = self.offset, error = %e, "Reading upload source failed");
                    return Err(UploadError::Read(e));
                }
            };

            tracing::trace!(start = unit.start, len = unit.data.len(), eof = unit.eof, "Unit produced");
            permit.send(unit);
        }
    }
}
