//! Content-Range handling
//!
//! Chunks carry `Content-Range: bytes <start>-<end>/<total>` with an inclusive
//! `end`. A zero-length artifact is announced as `bytes 0-0/0` with an empty
//! body.

use serde::{Deserialize, Serialize};

use super::types::UploadError;

/// A byte range claimed by one chunk, plus the total the sender declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset (inclusive)
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
    /// Total artifact length the sender claims
    pub total: u64,
}

impl ByteRange {
    /// Range covering a whole artifact of `total` bytes
    pub fn full(total: u64) -> Self {
        if total == 0 {
            return Self::empty();
        }
        Self {
            start: 0,
            end: total - 1,
            total,
        }
    }

    /// The zero-length range `bytes 0-0/0`
    pub fn empty() -> Self {
        Self {
            start: 0,
            end: 0,
            total: 0,
        }
    }

    /// Parse a `Content-Range` header value
    pub fn parse(header: &str) -> Result<Self, UploadError> {
        let malformed = || UploadError::MalformedRange(header.to_string());

        let spec = header.trim().strip_prefix("bytes").ok_or_else(malformed)?.trim();
        let (span, total) = spec.split_once('/').ok_or_else(malformed)?;
        let (start, end) = span.split_once('-').ok_or_else(malformed)?;

        let start: u64 = start.trim().parse().map_err(|_| malformed())?;
        let end: u64 = end.trim().parse().map_err(|_| malformed())?;
        let total: u64 = total.trim().parse().map_err(|_| malformed())?;

        if total == 0 {
            return if start == 0 && end == 0 {
                Ok(Self::empty())
            } else {
                Err(malformed())
            };
        }

        if end < start || end >= total {
            return Err(malformed());
        }

        Ok(Self { start, end, total })
    }

    /// Number of bytes this range covers
    pub fn len(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// `Range` header value telling a client where to resume.
///
/// Returns `None` when nothing has been received yet.
pub fn resume_range(received: u64) -> Option<String> {
    (received > 0).then(|| format!("bytes 0-{}", received - 1))
}
