//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upload session state.
///
/// `NotStarted -> SessionOpen -> Streaming -> {Finalized | Aborted}`; any
/// non-terminal state may move to `Aborted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// No session has been requested yet.
    NotStarted,
    /// The remote returned a locator; no range has been accepted.
    SessionOpen,
    /// At least one non-final range has been accepted.
    Streaming,
    /// The remote acknowledged the final range.
    Finalized,
    /// A fatal read or transport error ended the upload.
    Aborted,
}

impl UploadState {
    /// Check if the upload reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Aborted)
    }

    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (NotStarted, SessionOpen) => true,
            (SessionOpen | Streaming, Streaming) => true,
            (SessionOpen | Streaming, Finalized) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A byte-range header value: `bytes <start>-<end>/<total-or-*>`.
///
/// `end` is inclusive. An empty range (`bytes */<total>`) is used to finalize
/// a zero-length object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive byte span, or `None` for an empty body.
    pub span: Option<(u64, u64)>,
    /// Total object length, or `None` while more data will follow.
    pub total: Option<u64>,
}

impl ContentRange {
    /// A non-final range of `len` bytes starting at `start`.
    pub fn partial(start: u64, len: u64) -> crate::Result<Self> {
        if len == 0 {
            return Err(crate::Error::InvalidRange(format!(
                "non-final range at {start} must not be empty"
            )));
        }
        Ok(Self {
            span: Some((start, start + len - 1)),
            total: None,
        })
    }

    /// The final range of `len` bytes starting at `start`; declares the total.
    pub fn last(start: u64, len: u64) -> Self {
        if len == 0 {
            return Self {
                span: None,
                total: Some(start),
            };
        }
        let end = start + len - 1;
        Self {
            span: Some((start, end)),
            total: Some(end + 1),
        }
    }

    /// Whether this range tells the remote to finalize the object.
    pub fn is_final(&self) -> bool {
        self.total.is_some()
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some((start, end)) => write!(f, "bytes {start}-{end}/")?,
            None => write!(f, "bytes */")?,
        }
        match self.total {
            Some(total) => write!(f, "{total}"),
            None => write!(f, "*"),
        }
    }
}

/// Parse the remote's `Range: bytes=0-<n>` acknowledgement into the number of
/// bytes persisted so far.
pub fn parse_acknowledged(range: &str) -> crate::Result<u64> {
    let invalid = || crate::Error::InvalidRange(format!("unparsable acknowledgement: {range}"));
    let span = range.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = span.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.parse().map_err(|_| invalid())?;
    let end: u64 = end.parse().map_err(|_| invalid())?;
    if start != 0 || end < start {
        return Err(invalid());
    }
    Ok(end + 1)
}

/// A single-use upload of one object to one remote locator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Remote-assigned session URI.
    pub locator: String,
    /// Object name sent with the session metadata.
    pub object_name: String,
    /// Content type sniffed from the object's leading bytes.
    pub mime_type: String,
    /// Total length, once known.
    pub total_length: Option<u64>,
    /// Bytes acknowledged by the remote so far.
    pub next_offset: u64,
    /// Current state.
    pub state: UploadState,
}

impl UploadSession {
    /// Create a freshly opened session.
    pub fn open(
        locator: impl Into<String>,
        object_name: impl Into<String>,
        mime_type: impl Into<String>,
        total_length: Option<u64>,
    ) -> Self {
        Self {
            locator: locator.into(),
            object_name: object_name.into(),
            mime_type: mime_type.into(),
            total_length,
            next_offset: 0,
            state: UploadState::SessionOpen,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: UploadState) -> crate::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(crate::Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record that the remote now holds `acknowledged` bytes.
    ///
    /// The offset never moves backwards.
    pub fn acknowledge(&mut self, acknowledged: u64) -> crate::Result<()> {
        if acknowledged < self.next_offset {
            return Err(crate::Error::UploadSession(format!(
                "acknowledged offset moved backwards: {} -> {}",
                self.next_offset, acknowledged
            )));
        }
        self.next_offset = acknowledged;
        Ok(())
    }
}
