//! Chunk uploader: sends units as range-addressed requests.

use crate::auth::{TokenProvider, authorize};
use crate::error::{UploadError, UploadResult};
use crate::producer::UploadUnit;
use piecestash_core::config::UploadConfig;
use piecestash_core::upload::parse_acknowledged;
use piecestash_core::{ContentRange, UploadSession, UploadState};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Delay before the first retry; doubles per attempt.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How the remote answered one range request.
#[derive(Debug, PartialEq, Eq)]
enum RangeReply {
    /// 200/201: the object is complete.
    Finalized,
    /// 308: the remote holds this many bytes and wants more.
    Continue(u64),
}

/// Sends units against a session locator and tracks the acknowledged offset.
#[derive(Clone)]
pub struct ChunkUploader {
    http: reqwest::Client,
    token: Arc<dyn TokenProvider>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl ChunkUploader {
    pub fn new(http: reqwest::Client, config: &UploadConfig, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            token,
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Override the initial retry delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(MAX_BACKOFF)
    }

    /// Upload every unit from `rx` until the final one is accepted.
    ///
    /// Returns the number of units sent. The session ends `Finalized` on
    /// success; on error the caller decides whether to abort it.
    pub async fn run(
        &self,
        session: &mut UploadSession,
        mut rx: mpsc::Receiver<UploadUnit>,
        cancel: &CancellationToken,
    ) -> UploadResult<u64> {
        let mut units = 0u64;
        loop {
            let unit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                unit = rx.recv() => unit,
            };
            let Some(unit) = unit else {
                return Err(UploadError::Protocol(format!(
                    "source ended at offset {} without a final unit",
                    session.next_offset
                )));
            };

            let eof = unit.eof;
            self.upload_unit(session, &unit, cancel).await?;
            units += 1;
            if eof {
                return Ok(units);
            }
        }
    }

    /// Send one unit, resending any tail the remote did not acknowledge.
    ///
    /// Transient failures are retried from the session's acknowledged offset
    /// up to `max_retries` times.
    #[instrument(skip(self, session, unit, cancel), fields(start = unit.start, len = unit.data.len(), eof = unit.eof))]
    pub async fn upload_unit(
        &self,
        session: &mut UploadSession,
        unit: &UploadUnit,
        cancel: &CancellationToken,
    ) -> UploadResult<()> {
        if unit.start != session.next_offset {
            return Err(UploadError::Protocol(format!(
                "unit starts at {} but the remote holds {} bytes",
                unit.start, session.next_offset
            )));
        }

        let mut failures = 0u32;
        loop {
            let from = session.next_offset;
            let range = unit.content_range(from)?;
            let body = unit.data.slice((from - unit.start) as usize..);

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                reply = self.send_range(&session.locator, range, body) => reply,
            };

            match reply {
                Ok(RangeReply::Finalized) => {
                    if !range.is_final() {
                        return Err(UploadError::Protocol(format!(
                            "remote finalized the object on non-final {range}"
                        )));
                    }
                    session.acknowledge(unit.end())?;
                    session.total_length = Some(unit.end());
                    session.transition(UploadState::Finalized)?;
                    tracing::info!(
                        object = %session.object_name,
                        total = unit.end(),
                        "Upload finalized"
                    );
                    return Ok(());
                }
                Ok(RangeReply::Continue(acknowledged)) => {
                    if acknowledged > unit.end() {
                        return Err(UploadError::Protocol(format!(
                            "remote acknowledged {acknowledged} bytes after {range}"
                        )));
                    }
                    if acknowledged < session.next_offset {
                        return Err(UploadError::Protocol(format!(
                            "remote acknowledged {acknowledged} bytes after already holding {}",
                            session.next_offset
                        )));
                    }
                    let progressed = acknowledged > from;
                    session.acknowledge(acknowledged)?;

                    if acknowledged == unit.end() {
                        if range.is_final() {
                            return Err(UploadError::Protocol(format!(
                                "remote did not finalize after final {range}"
                            )));
                        }
                        session.transition(UploadState::Streaming)?;
                        return Ok(());
                    }

                    tracing::debug!(
                        acknowledged,
                        expected = unit.end(),
                        "Remote persisted part of the range, resending tail"
                    );
                    if !progressed {
                        failures += 1;
                        if failures > self.max_retries {
                            return Err(UploadError::Protocol(format!(
                                "remote made no progress past offset {acknowledged}"
                            )));
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    if failures >= self.max_retries {
                        return Err(UploadError::RetriesExhausted {
                            offset: from,
                            attempts: failures + 1,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.retry_delay(failures);
                    failures += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Transient upload failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_range(
        &self,
        locator: &str,
        range: ContentRange,
        body: bytes::Bytes,
    ) -> UploadResult<RangeReply> {
        tracing::debug!(range = %range, "Uploading range");
        let builder = self
            .http
            .put(locator)
            .header(CONTENT_RANGE, range.to_string())
            .body(body);
        let builder = authorize(builder, self.token.as_ref()).await?;

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| UploadError::Timeout(self.timeout))??;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(RangeReply::Finalized),
            StatusCode::PERMANENT_REDIRECT => {
                let acknowledged = match response.headers().get(RANGE) {
                    Some(value) => {
                        let value = value.to_str().map_err(|_| {
                            UploadError::Protocol("non-ASCII Range header".to_string())
                        })?;
                        parse_acknowledged(value)?
                    }
                    None => 0,
                };
                Ok(RangeReply::Continue(acknowledged))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = %status, range = %range, "Unexpected upload response");
                Err(UploadError::UnexpectedStatus {
                    status: status.as_u16(),
                    range: range.to_string(),
                    body,
                })
            }
        }
    }
}
