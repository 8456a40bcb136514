//! Reader factory that assembles windows from individual articles.
//!
//! [`SegmentedReaderFactory`] plans the requested window over the file's
//! segments, then [`SegmentedReader`] fetches and decodes one article at a
//! time, in order, emitting each segment's window back to back.
//!
//! A segment that ends before its window is complete is classified:
//!
//! | Condition | Result |
//! |-----------|--------|
//! | short past the transport buffer limit | [`VfsError::TransportTruncated`] |
//! | last segment of the file, some bytes read | accepted, window shrunk |
//! | some bytes read | [`VfsError::PartialContent`] |
//! | nothing read | [`VfsError::CorruptedStream`] |

use crate::config::StreamConfig;
use crate::error::{Result, VfsError};
use crate::metadata::FileMetadata;
use crate::planner::{plan_metadata, ResolvedSegment, SegmentRange};
use crate::segment_stream::SegmentDecodeStream;
use crate::source::{BoxedStream, ReadStream, ReaderFactory};
use std::io::{self, Read};
use std::sync::Arc;

/// Retrieves raw article bodies from the network.
pub trait ArticleFetcher: Send + Sync {
    /// Raw body of the article with message-id `id`.
    fn fetch(&self, id: &str, groups: &[String]) -> Result<BoxedStream>;
}

/// [`ReaderFactory`] over an [`ArticleFetcher`].
#[derive(Clone)]
pub struct SegmentedReaderFactory {
    fetcher: Arc<dyn ArticleFetcher>,
    config: StreamConfig,
}

impl SegmentedReaderFactory {
    pub fn new(fetcher: Arc<dyn ArticleFetcher>) -> Self {
        Self::with_config(fetcher, StreamConfig::default())
    }

    pub fn with_config(fetcher: Arc<dyn ArticleFetcher>, config: StreamConfig) -> Self {
        Self { fetcher, config }
    }
}

impl ReaderFactory for SegmentedReaderFactory {
    fn new_reader(&self, meta: &FileMetadata, start: u64, end: u64) -> Result<BoxedStream> {
        let max_segments = self.config.max_segments_for(end.saturating_sub(start) + 1);
        let range = plan_metadata(meta, start, end, Some(max_segments))?;

        tracing::debug!(
            start,
            end,
            segments = range.len(),
            max_segments,
            truncated = range.is_truncated(),
            groups = %range.summarize_groups(),
            "segmented.new_reader"
        );

        let last_segment = meta.sorted_segments().last().map(|s| s.id.clone());
        Ok(Box::new(SegmentedReader {
            fetcher: Arc::clone(&self.fetcher),
            range,
            current: None,
            last_segment,
            transport_buffer_limit: self.config.transport_buffer_limit,
            delivered: 0,
            done: false,
        }))
    }
}

/// Sequential reader over the segments of one planned window.
pub struct SegmentedReader {
    fetcher: Arc<dyn ArticleFetcher>,
    range: SegmentRange,
    current: Option<SegmentDecodeStream<BoxedStream>>,
    /// Id of the file's final segment, whose size is allowed to fall short.
    last_segment: Option<String>,
    transport_buffer_limit: u64,
    delivered: u64,
    done: bool,
}

impl SegmentedReader {
    /// Bytes delivered across all segments.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn open_current(&mut self) -> io::Result<bool> {
        let segment: ResolvedSegment = match self.range.get() {
            Ok(segment) => segment.clone(),
            Err(_) => return Ok(false),
        };

        let raw = self
            .fetcher
            .fetch(&segment.id, &segment.groups)
            .map_err(|e| {
                tracing::warn!(segment_id = %segment.id, error = %e, "segmented.fetch_failed");
                io::Error::from(VfsError::corrupted_stream(segment.len(), e))
            })?;

        self.current = Some(
            SegmentDecodeStream::new(&segment, raw)
                .with_transport_buffer_limit(self.transport_buffer_limit),
        );
        Ok(true)
    }

    fn finish_current(&mut self) {
        if let Some(mut stream) = self.current.take() {
            if let Err(e) = stream.close() {
                tracing::warn!(segment_id = %stream.id(), error = %e, "segment.cleanup_error");
            }
        }
    }

    /// Decide what a segment that stopped short means.
    fn short_segment(&mut self) -> Option<VfsError> {
        let stream = self.current.as_mut()?;
        let (bytes_read, expected) = (stream.bytes_read(), stream.len());

        if stream.hit_transport_buffer_limit() {
            return Some(VfsError::TransportTruncated {
                segment_id: stream.id().to_string(),
                bytes_read,
                total_expected: expected,
            });
        }
        if bytes_read > 0 && self.last_segment.as_deref() == Some(stream.id()) {
            stream.adjust_to_bytes_read(bytes_read);
            return None;
        }

        let cause = format!("segment {} ended after {bytes_read}/{expected} bytes", stream.id());
        if bytes_read > 0 {
            Some(VfsError::partial(bytes_read, expected, cause))
        } else {
            Some(VfsError::corrupted_stream(expected, cause))
        }
    }

    fn classify_error(stream: &SegmentDecodeStream<BoxedStream>, err: io::Error) -> io::Error {
        // Deadlines and interrupts belong to the caller.
        if matches!(err.kind(), io::ErrorKind::Interrupted | io::ErrorKind::TimedOut) {
            return err;
        }
        let err = VfsError::from_io(err);
        let wrapped = if stream.bytes_read() > 0 {
            VfsError::partial(stream.bytes_read(), stream.len(), err)
        } else {
            VfsError::corrupted_stream(stream.len(), err)
        };
        wrapped.into()
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        self.done = true;
        self.finish_current();
        err
    }
}

impl Read for SegmentedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.done {
                return Ok(0);
            }
            if self.current.is_none() {
                match self.open_current() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.done = true;
                        return Ok(0);
                    }
                    Err(e) => return Err(self.fail(e)),
                }
            }
            let Some(stream) = self.current.as_mut() else {
                continue;
            };

            match stream.read(buf) {
                Ok(0) => {
                    if !stream.is_complete() {
                        if let Some(err) = self.short_segment() {
                            tracing::warn!(error = %err, "segmented.short_segment");
                            return Err(self.fail(err.into()));
                        }
                    }
                    self.finish_current();
                    if self.range.advance().is_err() {
                        self.done = true;
                    }
                }
                Ok(n) => {
                    self.delivered += n as u64;
                    return Ok(n);
                }
                Err(e) => {
                    let err = Self::classify_error(stream, e);
                    return Err(self.fail(err));
                }
            }
        }
    }
}

impl ReadStream for SegmentedReader {
    fn close(&mut self) -> io::Result<()> {
        self.done = true;
        self.finish_current();
        self.range.clear();
        Ok(())
    }
}
