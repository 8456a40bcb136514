//! Error types for virtual file resolution and segment streaming.
//!
//! This module provides the [`VfsError`] type which covers every failure the
//! range planner, the segment decode stream and the virtual file can report.
//!
//! ## Error Categories
//!
//! | Category | Errors | Boundary mapping |
//! |----------|--------|------------------|
//! | Lookup | [`NotFound`], [`IsDirectory`], [`NotADirectory`] | "does not exist" |
//! | Metadata | [`Corrupted`], [`NoCipherConfigured`] | server-side failure |
//! | Planning | [`SegmentLimitReached`] | nothing to serve |
//! | Streaming | [`PartialContent`], [`CorruptedStream`], [`TransportTruncated`] | terminates the stream |
//! | Handle | [`InvalidOperation`], [`PermissionDenied`] | rejected call |
//!
//! ## Example
//!
//! ```rust,ignore
//! use nzb_stream::VfsError;
//!
//! match fs.open("movies/title.mkv", None) {
//!     Ok(entry) => { /* serve it */ }
//!     Err(VfsError::NotFound(_)) => { /* 404 */ }
//!     Err(VfsError::Corrupted(path)) => eprintln!("{path} has missing segments"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```
//!
//! [`NotFound`]: VfsError::NotFound
//! [`IsDirectory`]: VfsError::IsDirectory
//! [`NotADirectory`]: VfsError::NotADirectory
//! [`Corrupted`]: VfsError::Corrupted
//! [`NoCipherConfigured`]: VfsError::NoCipherConfigured
//! [`SegmentLimitReached`]: VfsError::SegmentLimitReached
//! [`PartialContent`]: VfsError::PartialContent
//! [`CorruptedStream`]: VfsError::CorruptedStream
//! [`TransportTruncated`]: VfsError::TransportTruncated
//! [`InvalidOperation`]: VfsError::InvalidOperation
//! [`PermissionDenied`]: VfsError::PermissionDenied

use std::io;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for virtual file operations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The path is absent from the metadata store.
    #[error("not found: {0}")]
    NotFound(String),

    /// A file operation was attempted on a directory.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// A directory operation was attempted on a file.
    #[error("not a directory")]
    NotADirectory,

    /// The file's metadata marks it unusable (missing segments).
    #[error("file is corrupted, there are some missing segments: {0}")]
    Corrupted(String),

    /// The file is encrypted but no encryption adapter was supplied.
    #[error("no cipher configured for encryption")]
    NoCipherConfigured,

    /// Range planning produced zero usable segments.
    #[error("segment limit reached")]
    SegmentLimitReached,

    /// A stream delivered some bytes and then failed or ended early.
    #[error("partial content: read {bytes_read}/{total_expected} bytes, underlying error: {source}")]
    PartialContent {
        bytes_read: u64,
        total_expected: u64,
        #[source]
        source: BoxError,
    },

    /// A stream failed before delivering anything.
    #[error("corrupted file: no content available from {total_expected} expected bytes, underlying error: {source}")]
    CorruptedStream {
        total_expected: u64,
        #[source]
        source: BoxError,
    },

    /// The transport appears to have capped the response size.
    ///
    /// Raised instead of [`VfsError::PartialContent`] when the segment
    /// stream stopped past the configured transport buffer limit, so the
    /// caller can retry with a different strategy.
    #[error("transport truncated segment {segment_id} after {bytes_read}/{total_expected} bytes")]
    TransportTruncated {
        segment_id: String,
        bytes_read: u64,
        total_expected: u64,
    },

    /// Seeking, or another unsupported operation, was requested.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// Writes, and reads on a directory.
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    /// A `Range` header could not be parsed.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// The binary transport stream is malformed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The metadata store failed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A required collaborator is missing.
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    /// An I/O error from a collaborator stream.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create a partial-content error wrapping `source`.
    pub fn partial(
        bytes_read: u64,
        total_expected: u64,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::PartialContent {
            bytes_read,
            total_expected,
            source: source.into(),
        }
    }

    /// Create a corrupted-stream error wrapping `source`.
    pub fn corrupted_stream(total_expected: u64, source: impl Into<BoxError>) -> Self {
        Self::CorruptedStream {
            total_expected,
            source: source.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a metadata store error.
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Recover a `VfsError` carried inside an `io::Error`, or wrap it.
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(vfs)) => *vfs,
            Some(Err(other)) => Self::Io(io::Error::other(other)),
            None => Self::Io(io::Error::other("empty io error")),
        }
    }

    /// The `io::ErrorKind` this error surfaces as through `std::io::Read`.
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::NotFound(_) => io::ErrorKind::NotFound,
            Self::IsDirectory(_) => io::ErrorKind::IsADirectory,
            Self::NotADirectory => io::ErrorKind::NotADirectory,
            Self::InvalidOperation(_) | Self::InvalidRange(_) => io::ErrorKind::InvalidInput,
            Self::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            Self::PartialContent { .. } | Self::TransportTruncated { .. } => {
                io::ErrorKind::UnexpectedEof
            }
            Self::Decode(_) | Self::CorruptedStream { .. } => io::ErrorKind::InvalidData,
            Self::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(inner) => inner,
            other => Self::new(other.io_kind(), other),
        }
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;
