//! Segment decode stream - one article's raw bytes in, an exact window out.
//!
//! The raw stream is inspected on first read. yEnc bodies are decoded, and
//! anything else is passed through as already-decoded bytes. The decoded
//! stream then has `start` bytes discarded and is capped at the window
//! length.
//!
//! ```text
//! raw article ──▶ sniff ──▶ [YencDecoder] ──▶ skip(start) ──▶ limit(len) ──▶ caller
//! ```
//!
//! The window is `[start, end]` in decoded segment coordinates. The planner
//! only knows an estimate of each segment's decoded size; when the yEnc
//! header declares the real part size the window is corrected to it.

use crate::config::StreamConfig;
use crate::planner::ResolvedSegment;
use crate::source::ReadStream;
use crate::yenc::{self, Sniffed, YencDecoder};
use std::io::{self, BufReader, Read};

enum Body<R> {
    Plain(Sniffed<R>),
    Yenc(YencDecoder<BufReader<Sniffed<R>>>),
}

impl<R: Read> Body<R> {
    fn raw_mut(&mut self) -> &mut R {
        match self {
            Self::Plain(chain) => chain.get_mut().1,
            Self::Yenc(decoder) => decoder.get_mut().get_mut().get_mut().1,
        }
    }
}

impl<R: Read> Read for Body<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(chain) => chain.read(buf),
            Self::Yenc(decoder) => decoder.read(buf),
        }
    }
}

enum State<R> {
    Unopened(R),
    Open(Body<R>),
    Closed,
}

/// Decodes one segment's raw stream into its exact byte window.
pub struct SegmentDecodeStream<R> {
    id: String,
    start: u64,
    /// Window length; the window is empty when 0.
    bound: u64,
    segment_size: u64,
    part_size: Option<u64>,
    skip_pending: bool,
    remaining: u64,
    bytes_read: u64,
    transport_buffer_limit: u64,
    /// The `=yend` trailer was read after the window.
    trailer_checked: bool,
    state: State<R>,
}

impl<R: ReadStream> SegmentDecodeStream<R> {
    /// Stream over `raw` emitting the window `segment` describes.
    pub fn new(segment: &ResolvedSegment, raw: R) -> Self {
        let bound = segment.len();
        Self {
            id: segment.id.clone(),
            start: segment.start,
            bound,
            segment_size: segment.segment_size,
            part_size: None,
            skip_pending: segment.start > 0,
            remaining: bound,
            bytes_read: 0,
            transport_buffer_limit: StreamConfig::default().transport_buffer_limit,
            trailer_checked: false,
            state: State::Unopened(raw),
        }
    }

    pub fn with_transport_buffer_limit(mut self, bytes: u64) -> Self {
        self.transport_buffer_limit = bytes;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte of the window, or `None` when the window is empty.
    pub fn end(&self) -> Option<u64> {
        (self.bound > 0).then(|| self.start + self.bound - 1)
    }

    /// Expected number of bytes in the window.
    pub fn len(&self) -> u64 {
        self.bound
    }

    pub fn is_empty(&self) -> bool {
        self.bound == 0
    }

    /// Decoded segment size; the yEnc part size once the header was read.
    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Part size declared by the yEnc header, if any.
    pub fn part_size(&self) -> Option<u64> {
        self.part_size
    }

    pub fn has_decoder(&self) -> bool {
        matches!(self.state, State::Open(Body::Yenc(_)))
    }

    /// Bytes delivered to the caller so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_read >= self.bound
    }

    /// Some but not all of the window was delivered.
    pub fn is_incomplete(&self) -> bool {
        self.bound > 0 && self.bytes_read > 0 && self.bytes_read < self.bound
    }

    /// The stream stopped short past the transport buffer limit.
    ///
    /// Some transports silently cap response sizes; a short read that
    /// crosses the limit is more likely that cap than missing data.
    pub fn hit_transport_buffer_limit(&self) -> bool {
        let limit = self.transport_buffer_limit;
        if self.bytes_read == 0 || self.bytes_read >= self.bound {
            return false;
        }
        if self.bytes_read + self.start < limit {
            return false;
        }
        self.start + self.bound > limit
    }

    /// Shrink the expected window to what was actually delivered.
    pub fn adjust_to_bytes_read(&mut self, total: u64) {
        self.bound = total;
        self.remaining = total.saturating_sub(self.bytes_read);
        self.segment_size = self.part_size.unwrap_or(total);

        tracing::debug!(
            segment_id = %self.id,
            total_bytes = total,
            start = self.start,
            end = ?self.end(),
            "segment.adjusted_to_bytes"
        );
    }

    /// Inspect the raw stream and set up decoding.
    ///
    /// Called by the first read; call it earlier to learn the part size
    /// before consuming data.
    pub fn init(&mut self) -> io::Result<()> {
        let raw = match std::mem::replace(&mut self.state, State::Closed) {
            State::Unopened(raw) => raw,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let (is_yenc, sniffed) = yenc::sniff(raw)?;
        let body = if is_yenc {
            Body::Yenc(YencDecoder::new(BufReader::new(sniffed))?)
        } else {
            Body::Plain(sniffed)
        };

        let initial_window = self.bound;
        if let Body::Yenc(decoder) = &body {
            self.adopt_part_size(decoder.part_size(), initial_window);
        }
        self.remaining = self.bound;
        self.state = State::Open(body);

        tracing::debug!(
            segment_id = %self.id,
            start = self.start,
            end = ?self.end(),
            bound_bytes = self.bound,
            has_decoder = is_yenc,
            segment_size = self.segment_size,
            initial_window,
            "segment.reader_initialized"
        );
        Ok(())
    }

    fn adopt_part_size(&mut self, part_size: Option<u64>, initial_window: u64) {
        match part_size {
            Some(part_size) => {
                if self.segment_size != part_size {
                    tracing::debug!(
                        segment_id = %self.id,
                        metadata_size = self.segment_size,
                        yenc_part_size = part_size,
                        "segment.part_size_detected"
                    );
                }
                self.part_size = Some(part_size);
                self.segment_size = part_size;

                let max_readable = part_size.saturating_sub(self.start);
                if max_readable > 0 && max_readable < self.bound {
                    let old_end = self.end();
                    self.bound = max_readable;
                    tracing::debug!(
                        segment_id = %self.id,
                        start = self.start,
                        old_end = ?old_end,
                        new_end = ?self.end(),
                        metadata_window = initial_window,
                        adjusted_window = self.bound,
                        part_size,
                        "segment.window_adjusted"
                    );
                }
            }
            // Without a declared part size, a window starting at 0 is capped
            // to the caller's segment size; it never grows past the request.
            None if self.segment_size > 0 && self.start == 0 && self.segment_size < self.bound => {
                let old_end = self.end();
                self.bound = self.segment_size;
                tracing::debug!(
                    segment_id = %self.id,
                    start = self.start,
                    old_end = ?old_end,
                    new_end = ?self.end(),
                    metadata_window = initial_window,
                    adjusted_window = self.bound,
                    "segment.window_adjusted"
                );
            }
            None => {}
        }
    }

    fn skip_prefix(body: &mut Body<R>, skip: u64) -> io::Result<bool> {
        let skipped = match io::copy(&mut body.by_ref().take(skip), &mut io::sink()) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(requested_skip = skip, error = %e, "segment.skip_failed");
                return Err(io::Error::new(
                    e.kind(),
                    format!("skip failed before {skip} bytes: {e}"),
                ));
            }
        };
        if skipped < skip {
            tracing::warn!(
                requested_skip = skip,
                actual_skipped = skipped,
                "segment.skip_insufficient_data"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Release the decoder and the raw stream. Later calls do nothing.
    pub fn close(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Unopened(mut raw) => raw.close(),
            State::Open(mut body) => body.raw_mut().close(),
            State::Closed => Ok(()),
        }
    }
}

impl<R: ReadStream> Read for SegmentDecodeStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.init()?;

        let State::Open(body) = &mut self.state else {
            return Ok(0);
        };

        if self.skip_pending {
            self.skip_pending = false;
            if !Self::skip_prefix(body, self.start)? {
                // Not enough data to reach the window.
                self.remaining = 0;
                return Ok(0);
            }
        }

        if self.remaining == 0 {
            // A window ending on the part's last byte also reads the trailer,
            // so its size and checksum are verified.
            if let Body::Yenc(decoder) = body {
                if !self.trailer_checked && self.start + self.bound >= self.segment_size {
                    self.trailer_checked = true;
                    io::copy(decoder, &mut io::sink())?;
                }
            }
            return Ok(0);
        }

        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = body.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<R: ReadStream> ReadStream for SegmentDecodeStream<R> {
    fn close(&mut self) -> io::Result<()> {
        SegmentDecodeStream::close(self)
    }
}
