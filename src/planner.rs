//! Range planner - maps a logical byte range onto segment read windows.
//!
//! A virtual file is the concatenation of the usable bytes of its segments.
//! Planning walks the segments in order, skips those that end before the
//! request, trims the first and last to the requested bytes, and stops once
//! the end of the request is covered.
//!
//! ```text
//! file offsets   0          12       20
//!                [ seg 0    ][ seg 1 ]
//! request             [5 ........ 14]
//! windows        seg 0: [5, 11]   seg 1: [0, 2]
//! ```

use crate::error::{Result, VfsError};
use crate::metadata::{FileMetadata, SegmentRecord};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One physical segment as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalSegment {
    pub id: String,
    /// Offset within the segment where data for this file begins.
    pub start: u64,
    /// Full size of the segment.
    pub size: u64,
}

impl PhysicalSegment {
    pub fn new(id: impl Into<String>, start: u64, size: u64) -> Self {
        Self {
            id: id.into(),
            start,
            size,
        }
    }

    /// Bytes this segment contributes to the file.
    pub fn usable_len(&self) -> u64 {
        self.size.saturating_sub(self.start)
    }
}

/// Ordered access to the physical segments of one file.
pub trait SegmentLoader {
    /// Segment at `index` with its newsgroups, or `None` past the last one.
    fn get_segment(&self, index: usize) -> Option<(PhysicalSegment, Arc<[String]>)>;
}

impl SegmentLoader for [PhysicalSegment] {
    fn get_segment(&self, index: usize) -> Option<(PhysicalSegment, Arc<[String]>)> {
        self.get(index).map(|s| (s.clone(), Arc::from(Vec::new())))
    }
}

impl SegmentLoader for Vec<PhysicalSegment> {
    fn get_segment(&self, index: usize) -> Option<(PhysicalSegment, Arc<[String]>)> {
        self.as_slice().get_segment(index)
    }
}

/// Loader over a file's metadata records, in ascending start-offset order.
///
/// Each record contributes its declared (or estimated) decoded length.
pub struct MetadataLoader<'a> {
    segments: Vec<&'a SegmentRecord>,
    groups: Arc<[String]>,
}

impl<'a> MetadataLoader<'a> {
    pub fn new(meta: &'a FileMetadata) -> Self {
        Self {
            segments: meta.sorted_segments(),
            groups: Arc::from(meta.groups.clone()),
        }
    }
}

impl SegmentLoader for MetadataLoader<'_> {
    fn get_segment(&self, index: usize) -> Option<(PhysicalSegment, Arc<[String]>)> {
        let record = self.segments.get(index)?;
        Some((
            PhysicalSegment::new(record.id.clone(), 0, record.decoded_len()),
            Arc::clone(&self.groups),
        ))
    }
}

/// A segment resolved for one request: the window of decoded bytes to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    pub id: String,
    pub groups: Arc<[String]>,
    /// First byte to emit, inclusive, in segment coordinates.
    pub start: u64,
    /// Last byte to emit, inclusive.
    pub end: u64,
    /// Decoded size of the segment; corrected once the decoder reports it.
    pub segment_size: u64,
}

impl ResolvedSegment {
    pub fn len(&self) -> u64 {
        if self.end >= self.start {
            self.end - self.start + 1
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered segments covering one request, with a read cursor.
#[derive(Debug, Clone, Default)]
pub struct SegmentRange {
    start: u64,
    end: u64,
    segments: Vec<ResolvedSegment>,
    current: usize,
    truncated: bool,
}

impl SegmentRange {
    /// Requested logical range.
    pub fn bounds(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    /// Segment under the cursor.
    pub fn get(&self) -> Result<&ResolvedSegment> {
        self.segments
            .get(self.current)
            .ok_or(VfsError::SegmentLimitReached)
    }

    /// Move the cursor to the next segment and return it.
    pub fn advance(&mut self) -> Result<&ResolvedSegment> {
        if self.current >= self.segments.len() {
            return Err(VfsError::SegmentLimitReached);
        }
        self.current += 1;
        self.get()
    }

    /// Index of the segment under the cursor.
    pub fn position(&self) -> usize {
        self.current
    }

    pub fn segments(&self) -> &[ResolvedSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `max_segments` cut the plan short of the requested end.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Sum of the window lengths.
    pub fn total_len(&self) -> u64 {
        self.segments.iter().map(ResolvedSegment::len).sum()
    }

    /// Drop every segment and reset the cursor.
    pub fn clear(&mut self) {
        tracing::debug!(segments_freed = self.segments.len(), "segment_range.cleared");
        self.segments.clear();
        self.current = 0;
    }

    /// `group:count` pairs across all segments, or `"none"`.
    pub fn summarize_groups(&self) -> String {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for segment in &self.segments {
            for group in segment.groups.iter() {
                *counts.entry(group.trim()).or_default() += 1;
            }
        }
        if counts.is_empty() {
            return "none".to_string();
        }
        counts
            .iter()
            .map(|(group, count)| format!("{group}:{count}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl IntoIterator for SegmentRange {
    type Item = ResolvedSegment;
    type IntoIter = std::vec::IntoIter<ResolvedSegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

/// Resolve the inclusive logical range `[start, end]` against `loader`.
///
/// Returns an empty range when the request is inverted or lies beyond the
/// available data. With `max_segments`, at most that many segments are
/// returned even if the request is not fully covered.
pub fn plan<L: SegmentLoader + ?Sized>(
    start: u64,
    end: u64,
    loader: &L,
    max_segments: Option<usize>,
) -> SegmentRange {
    let mut range = SegmentRange {
        start,
        end,
        ..SegmentRange::default()
    };
    if end < start {
        return range;
    }

    // File offset where the next segment's usable data begins.
    let mut logical_file_pos = 0u64;

    for index in 0.. {
        let Some((src, groups)) = loader.get_segment(index) else {
            break;
        };

        let usable_len = src.usable_len();
        if usable_len == 0 {
            continue;
        }

        let seg_file_start = logical_file_pos;
        let seg_file_end = seg_file_start + usable_len - 1;

        if seg_file_end < start {
            logical_file_pos += usable_len;
            continue;
        }
        if seg_file_start > end {
            break;
        }

        let mut read_start = src.start;
        let mut read_end = src.size - 1;
        if start > seg_file_start {
            read_start = src.start + (start - seg_file_start);
        }
        if end < seg_file_end {
            read_end = (src.size - 1) - (seg_file_end - end);
        }

        range.segments.push(ResolvedSegment {
            id: src.id,
            groups,
            start: read_start,
            end: read_end,
            segment_size: src.size,
        });

        if seg_file_end >= end {
            break;
        }

        if max_segments.is_some_and(|max| range.segments.len() >= max) {
            range.truncated = true;
            tracing::debug!(
                max_segments = max_segments.unwrap_or_default(),
                segments_built = range.segments.len(),
                "planner.segment_limit_reached"
            );
            break;
        }

        logical_file_pos += usable_len;
    }

    range
}

/// Resolve `[start, end]` against a file's metadata.
///
/// `end` is clamped to the last byte of the file. Fails with
/// [`VfsError::SegmentLimitReached`] when no segment overlaps the request.
pub fn plan_metadata(
    meta: &FileMetadata,
    start: u64,
    end: u64,
    max_segments: Option<usize>,
) -> Result<SegmentRange> {
    if meta.file_size == 0 || start >= meta.file_size {
        return Err(VfsError::SegmentLimitReached);
    }
    let end = end.min(meta.file_size - 1);

    tracing::debug!(
        requested_start = start,
        requested_end = end,
        file_size = meta.file_size,
        num_segments = meta.segments.len(),
        "planner.request"
    );

    let loader = MetadataLoader::new(meta);
    let range = plan(start, end, &loader, max_segments);
    if range.is_empty() {
        return Err(VfsError::SegmentLimitReached);
    }

    tracing::debug!(
        requested_start = start,
        requested_end = end,
        segments_built = range.len(),
        truncated = range.is_truncated(),
        "planner.result"
    );
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(sizes: &[u64]) -> Vec<PhysicalSegment> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| PhysicalSegment::new(format!("<{i}@test>"), 0, size))
            .collect()
    }

    fn windows(range: &SegmentRange) -> Vec<(String, u64, u64)> {
        range
            .segments()
            .iter()
            .map(|s| (s.id.clone(), s.start, s.end))
            .collect()
    }

    #[test]
    fn test_two_segment_scenario() {
        let range = plan(5, 14, &segments(&[12, 8]), None);
        assert_eq!(
            windows(&range),
            [("<0@test>".to_string(), 5, 11), ("<1@test>".to_string(), 0, 2)]
        );
        assert_eq!(range.total_len(), 10);
        assert!(!range.is_truncated());
    }

    #[test]
    fn test_single_segment_interior() {
        let range = plan(3, 4, &segments(&[10]), None);
        assert_eq!(windows(&range), [("<0@test>".to_string(), 3, 4)]);
    }

    #[test]
    fn test_prefix_trim_shifts_windows() {
        // Segment 0 carries 4 bytes of a previous file before ours.
        let loader = vec![PhysicalSegment::new("a", 4, 10), PhysicalSegment::new("b", 0, 10)];
        let range = plan(0, 7, &loader, None);
        assert_eq!(
            windows(&range),
            [("a".to_string(), 4, 9), ("b".to_string(), 0, 1)]
        );
        assert_eq!(range.total_len(), 8);
    }

    #[test]
    fn test_range_beyond_data_is_empty() {
        let range = plan(100, 200, &segments(&[10, 10]), None);
        assert!(range.is_empty());
        assert!(plan(5, 4, &segments(&[10]), None).is_empty());
    }

    #[test]
    fn test_short_result_when_end_beyond_data() {
        let range = plan(15, 100, &segments(&[10, 10]), None);
        assert_eq!(windows(&range), [("<1@test>".to_string(), 5, 9)]);
    }

    #[test]
    fn test_zero_sized_segments_are_skipped() {
        let range = plan(0, 19, &segments(&[10, 0, 10]), None);
        assert_eq!(range.len(), 2);
        assert_eq!(range.total_len(), 20);
    }

    #[test]
    fn test_max_segments_truncates() {
        let range = plan(0, 99, &segments(&[10; 10]), Some(3));
        assert_eq!(range.len(), 3);
        assert_eq!(range.total_len(), 30);
        assert!(range.is_truncated());

        // A cap that is exactly sufficient is not a truncation.
        let range = plan(0, 29, &segments(&[10; 10]), Some(3));
        assert_eq!(range.total_len(), 30);
        assert!(!range.is_truncated());
    }

    #[test]
    fn test_coverage_and_ordering_over_partitions() {
        // Deterministic pseudo-random partitions.
        let mut seed = 0x2545F4914F6CDD1Du64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..200 {
            let count = (next() % 12 + 1) as usize;
            let sizes: Vec<u64> = (0..count).map(|_| next() % 50 + 1).collect();
            let file_size: u64 = sizes.iter().sum();
            let a = next() % file_size;
            let b = next() % file_size;
            let (start, end) = (a.min(b), a.max(b));

            let loader = segments(&sizes);
            let range = plan(start, end, &loader, None);
            assert_eq!(range.total_len(), end - start + 1, "sizes={sizes:?} [{start},{end}]");

            // Windows tile the request with no gaps or overlaps.
            let mut offsets = Vec::new();
            let mut seg_file_start = 0u64;
            let by_id: BTreeMap<&str, u64> = loader
                .iter()
                .map(|s| {
                    let at = seg_file_start;
                    seg_file_start += s.size;
                    (s.id.as_str(), at)
                })
                .collect();
            for seg in range.segments() {
                offsets.push((by_id[seg.id.as_str()] + seg.start, by_id[seg.id.as_str()] + seg.end));
            }
            assert_eq!(offsets.first().map(|o| o.0), Some(start));
            assert_eq!(offsets.last().map(|o| o.1), Some(end));
            for pair in offsets.windows(2) {
                assert_eq!(pair[0].1 + 1, pair[1].0);
            }
        }
    }

    #[test]
    fn test_cursor_walks_segments() {
        let mut range = plan(0, 29, &segments(&[10, 10, 10]), None);
        assert_eq!(range.get().unwrap().id, "<0@test>");
        assert_eq!(range.advance().unwrap().id, "<1@test>");
        assert_eq!(range.advance().unwrap().id, "<2@test>");
        assert!(matches!(range.advance(), Err(VfsError::SegmentLimitReached)));
        assert!(matches!(range.advance(), Err(VfsError::SegmentLimitReached)));

        range.clear();
        assert!(range.is_empty());
        assert!(range.get().is_err());
    }

    #[test]
    fn test_plan_metadata_uses_declared_bounds() {
        let mut meta = FileMetadata::new(
            20,
            vec![
                SegmentRecord::new("<b@x>", 900).with_bounds(12, 19),
                SegmentRecord::new("<a@x>", 900).with_bounds(0, 11),
            ],
        );
        meta.groups = vec!["alt.binaries.test".into()];

        let range = plan_metadata(&meta, 5, 14, None).unwrap();
        assert_eq!(
            windows(&range),
            [("<a@x>".to_string(), 5, 11), ("<b@x>".to_string(), 0, 2)]
        );
        assert_eq!(range.summarize_groups(), "alt.binaries.test:2");
    }

    #[test]
    fn test_plan_metadata_estimates_without_bounds() {
        // 97% of 1000 encoded bytes = 970 decoded bytes per segment.
        let meta = FileMetadata::new(
            1940,
            vec![SegmentRecord::new("<a@x>", 1000), SegmentRecord::new("<b@x>", 1000)],
        );
        let range = plan_metadata(&meta, 960, 980, None).unwrap();
        assert_eq!(
            windows(&range),
            [("<a@x>".to_string(), 960, 969), ("<b@x>".to_string(), 0, 10)]
        );
        assert_eq!(range.segments()[0].segment_size, 970);
    }

    #[test]
    fn test_plan_metadata_clamps_end() {
        let meta = FileMetadata::new(20, vec![SegmentRecord::new("<a@x>", 20).with_bounds(0, 19)]);
        let range = plan_metadata(&meta, 10, u64::MAX, None).unwrap();
        assert_eq!(range.bounds(), (10, 19));
        assert_eq!(range.total_len(), 10);
    }

    #[test]
    fn test_plan_metadata_out_of_bounds_is_segment_limit() {
        let meta = FileMetadata::new(20, vec![SegmentRecord::new("<a@x>", 20).with_bounds(0, 19)]);
        assert!(matches!(
            plan_metadata(&meta, 20, 30, None),
            Err(VfsError::SegmentLimitReached)
        ));
        let empty = FileMetadata::new(0, vec![]);
        assert!(matches!(
            plan_metadata(&empty, 0, 0, None),
            Err(VfsError::SegmentLimitReached)
        ));
    }

    #[test]
    fn test_summarize_groups_without_groups() {
        let range = plan(0, 9, &segments(&[10]), None);
        assert_eq!(range.summarize_groups(), "none");
    }
}
