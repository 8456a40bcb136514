//! Requested byte ranges and the window a handle serves.
//!
//! [`ByteRange`] is what a caller asked for, typically parsed from an HTTP
//! `Range` header. [`ServedRange`] is that request clamped against the
//! file's size: the exact inclusive window a [`VirtualFile`] will deliver.
//!
//! [`VirtualFile`]: crate::VirtualFile

use crate::error::{Result, VfsError};
use std::fmt;
use std::str::FromStr;

/// A single requested byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`, inclusive.
    Closed { start: u64, end: u64 },
    /// `bytes=start-`, through the end of the file.
    From(u64),
    /// `bytes=-len`, the last `len` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header value such as `bytes=0-1023`.
    ///
    /// Only single ranges in the `bytes` unit are accepted.
    pub fn parse(header: &str) -> Result<Self> {
        let invalid = |why: &str| VfsError::InvalidRange(format!("{why}: {header:?}"));

        let spec = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| invalid("unsupported unit"))?
            .trim();
        if spec.contains(',') {
            return Err(invalid("multiple ranges"));
        }
        let (first, last) = spec.split_once('-').ok_or_else(|| invalid("missing '-'"))?;
        let (first, last) = (first.trim(), last.trim());

        let number = |s: &str| s.parse::<u64>().map_err(|_| invalid("bad offset"));

        match (first.is_empty(), last.is_empty()) {
            (true, true) => Err(invalid("empty range")),
            (true, false) => match number(last)? {
                0 => Err(invalid("empty suffix")),
                len => Ok(Self::Suffix(len)),
            },
            (false, true) => Ok(Self::From(number(first)?)),
            (false, false) => {
                let (start, end) = (number(first)?, number(last)?);
                if start > end {
                    return Err(invalid("start after end"));
                }
                Ok(Self::Closed { start, end })
            }
        }
    }
}

impl FromStr for ByteRange {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed { start, end } => write!(f, "bytes={start}-{end}"),
            Self::From(start) => write!(f, "bytes={start}-"),
            Self::Suffix(len) => write!(f, "bytes=-{len}"),
        }
    }
}

/// The inclusive window a handle serves, clamped into the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedRange {
    start: u64,
    /// `None` when nothing is served (empty file).
    end: Option<u64>,
    file_size: u64,
    bounded: bool,
}

impl ServedRange {
    /// Clamp `requested` into `[0, file_size - 1]`.
    ///
    /// Suffix lengths larger than the file serve the whole file. Starts past
    /// the end are pulled back to the last byte.
    pub fn resolve(requested: Option<ByteRange>, file_size: u64) -> Self {
        let bounded = matches!(
            requested,
            Some(ByteRange::Closed { .. } | ByteRange::Suffix(_))
        );
        if file_size == 0 {
            return Self {
                start: 0,
                end: None,
                file_size,
                bounded,
            };
        }

        let last = file_size - 1;
        let (start, end) = match requested {
            None => (0, last),
            Some(ByteRange::Closed { start, end }) => (start.min(last), end.min(last)),
            Some(ByteRange::From(start)) => (start.min(last), last),
            Some(ByteRange::Suffix(len)) => (file_size - len.min(file_size), last),
        };

        Self {
            start,
            end: Some(end.max(start)),
            file_size,
            bounded,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Whether the request named its last byte (closed or suffix range).
    ///
    /// Bounded windows are fetched as one piece; open-ended ones are split
    /// into streaming chunks.
    pub fn is_bounded(&self) -> bool {
        self.bounded
    }

    /// Number of bytes served.
    pub fn len(&self) -> u64 {
        self.end.map_or(0, |end| end - self.start + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.end.is_none()
    }

    /// `(start, end, total)` for building a `Content-Range` response.
    pub fn info(&self) -> (u64, Option<u64>, u64) {
        (self.start, self.end, self.file_size)
    }
}
