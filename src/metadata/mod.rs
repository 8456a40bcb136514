//! File metadata records and the store they are read from.
//!
//! A [`FileMetadata`] describes one virtual file: its declared size and the
//! ordered article segments whose decoded bytes make it up. Records are
//! written once by an import pipeline and only read here.

mod memory;
#[cfg(feature = "serde")]
mod fs;

pub use memory::MemoryMetadataStore;
#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
pub use fs::FsMetadataStore;

use crate::error::Result;
use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Root of the virtual tree.
pub const ROOT_PATH: &str = "/";

/// Decoded size estimate for segments without declared boundaries: yEnc
/// inflates payloads by roughly 3%.
pub const DECODED_SIZE_PERCENT: u64 = 97;

/// Health of a stored file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FileStatus {
    #[default]
    Healthy,
    /// Some segments failed during a previous read.
    Partial,
    /// Segments are missing; the file must not be opened.
    Corrupted,
}

/// Encryption applied to the stored bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Encryption {
    #[default]
    None,
    Aes256Cbc,
    Other(String),
}

impl Encryption {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// One article backing part of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentRecord {
    /// Message-ID of the article.
    pub id: String,
    /// Encoded (on-the-wire) size in bytes.
    pub segment_size: u64,
    /// Decoded boundaries within the file, when known at import time.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub start_offset: Option<u64>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub end_offset: Option<u64>,
}

impl SegmentRecord {
    pub fn new(id: impl Into<String>, segment_size: u64) -> Self {
        Self {
            id: id.into(),
            segment_size,
            start_offset: None,
            end_offset: None,
        }
    }

    /// Attach pre-computed decoded boundaries (inclusive).
    pub fn with_bounds(mut self, start: u64, end: u64) -> Self {
        self.start_offset = Some(start);
        self.end_offset = Some(end);
        self
    }

    /// Declared decoded boundaries, if both are present and ordered.
    pub fn bounds(&self) -> Option<(u64, u64)> {
        match (self.start_offset, self.end_offset) {
            (Some(start), Some(end)) if end >= start => Some((start, end)),
            _ => None,
        }
    }

    /// Decoded length this segment contributes to the file.
    ///
    /// Uses the declared boundaries when present, otherwise 97% of the
    /// encoded size, falling back to the encoded size if that rounds to 0.
    pub fn decoded_len(&self) -> u64 {
        let estimated = match self.bounds() {
            Some((start, end)) => end - start + 1,
            None => self.segment_size * DECODED_SIZE_PERCENT / 100,
        };
        if estimated == 0 {
            self.segment_size
        } else {
            estimated
        }
    }
}

/// Metadata for one virtual file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileMetadata {
    /// Declared logical size in bytes.
    pub file_size: u64,
    /// NZB the file was imported from.
    pub source_nzb_path: String,
    pub status: FileStatus,
    pub encryption: Encryption,
    pub segments: Vec<SegmentRecord>,
    /// Newsgroups the file was posted to.
    #[cfg_attr(feature = "serde", serde(default))]
    pub groups: Vec<String>,
    /// Unix seconds.
    pub created_at: i64,
    pub modified_at: i64,
}

impl FileMetadata {
    pub fn new(file_size: u64, segments: Vec<SegmentRecord>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            file_size,
            segments,
            created_at: now,
            modified_at: now,
            ..Self::default()
        }
    }

    pub fn is_corrupted(&self) -> bool {
        self.status == FileStatus::Corrupted
    }

    /// Segments ordered by declared start offset.
    ///
    /// Records without boundaries compare as offset 0; the sort is stable so
    /// they keep their stored order.
    pub fn sorted_segments(&self) -> Vec<&SegmentRecord> {
        let mut segments: Vec<&SegmentRecord> = self.segments.iter().collect();
        segments.sort_by_key(|s| s.start_offset.unwrap_or(0));
        segments
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        timestamp(self.created_at)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        timestamp(self.modified_at)
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs > 0 {
        DateTime::from_timestamp(secs, 0)
    } else {
        None
    }
}

/// Lightweight identification of a virtual file, read without opening streams.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct FileDescriptor {
    pub virtual_path: String,
    pub normalized_path: String,
    pub file_size: u64,
    pub segment_count: usize,
    pub source_reference: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl FileDescriptor {
    pub fn from_metadata(virtual_path: &str, normalized_path: &str, meta: &FileMetadata) -> Self {
        Self {
            virtual_path: virtual_path.to_string(),
            normalized_path: normalized_path.to_string(),
            file_size: meta.file_size,
            segment_count: meta.segments.len(),
            source_reference: meta.source_nzb_path.trim().to_string(),
            created_at: meta.created(),
        }
    }
}

/// Read access to persisted file and directory records.
///
/// Paths are normalized: `/` for the root, otherwise slash-separated
/// without a leading slash (`movies/title.mkv`).
pub trait MetadataStore: Send + Sync {
    fn file_exists(&self, path: &str) -> bool;
    fn directory_exists(&self, path: &str) -> bool;
    fn read_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>>;
    /// Names of the files directly inside `path`.
    fn list_directory(&self, path: &str) -> Result<Vec<String>>;
    /// Names of the directories directly inside `path`.
    fn list_subdirectories(&self, path: &str) -> Result<Vec<String>>;
}

/// Join a normalized directory path and a child name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == ROOT_PATH || dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Normalized parent of `path` (`/` for top-level entries).
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) if pos > 0 => &path[..pos],
        _ => ROOT_PATH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_len_uses_bounds() {
        let seg = SegmentRecord::new("<a@b>", 800_000).with_bounds(1000, 1999);
        assert_eq!(seg.decoded_len(), 1000);
    }

    #[test]
    fn test_decoded_len_estimates_from_encoded_size() {
        assert_eq!(SegmentRecord::new("<a@b>", 1000).decoded_len(), 970);
        // 97% of 1 rounds to zero; fall back to the encoded size.
        assert_eq!(SegmentRecord::new("<a@b>", 1).decoded_len(), 1);
        assert_eq!(SegmentRecord::new("<a@b>", 0).decoded_len(), 0);
    }

    #[test]
    fn test_sorted_segments_is_stable_without_bounds() {
        let meta = FileMetadata::new(
            0,
            vec![
                SegmentRecord::new("<2@x>", 10).with_bounds(10, 19),
                SegmentRecord::new("<1@x>", 10).with_bounds(0, 9),
                SegmentRecord::new("<3@x>", 10).with_bounds(20, 29),
            ],
        );
        let ids: Vec<&str> = meta.sorted_segments().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["<1@x>", "<2@x>", "<3@x>"]);

        let unbounded = FileMetadata::new(
            0,
            vec![SegmentRecord::new("<b@x>", 10), SegmentRecord::new("<a@x>", 10)],
        );
        let ids: Vec<&str> = unbounded.sorted_segments().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["<b@x>", "<a@x>"]);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(join_path("/", "movies"), "movies");
        assert_eq!(join_path("movies", "a.mkv"), "movies/a.mkv");
        assert_eq!(parent_path("movies/a.mkv"), "movies");
        assert_eq!(parent_path("movies"), "/");
    }

    #[test]
    fn test_descriptor_trims_source() {
        let mut meta = FileMetadata::new(2048, vec![SegmentRecord::new("<a@b>", 100)]);
        meta.source_nzb_path = "  library/movie.nzb\n".into();
        let desc = FileDescriptor::from_metadata("/movies/a.mkv", "movies/a.mkv", &meta);
        assert_eq!(desc.file_size, 2048);
        assert_eq!(desc.segment_count, 1);
        assert_eq!(desc.source_reference, "library/movie.nzb");
        assert!(desc.created_at.is_some());
    }
}
