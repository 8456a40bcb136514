//! Streaming yEnc decoder.
//!
//! Wraps a buffered raw article stream and yields decoded bytes. Header
//! lines are consumed eagerly in [`YencDecoder::new`] so the part size is
//! known before the first read; data lines are decoded one at a time.

use super::header::{parse_yend, parse_ybegin, parse_ypart, YencMeta, YencTrailer, YBEGIN, YEND, YPART};
use crate::crc32::Crc32;
use crate::error::VfsError;
use std::io::{self, BufRead, Read};

/// Streaming yEnc decoder over a buffered reader.
pub struct YencDecoder<R> {
    inner: R,
    meta: YencMeta,
    trailer: Option<YencTrailer>,
    line: Vec<u8>,
    pending: Vec<u8>,
    pending_pos: usize,
    /// Escape byte seen at the end of the previous line.
    escape: bool,
    decoded: u64,
    crc: Crc32,
    finished: bool,
}

impl<R: BufRead> YencDecoder<R> {
    /// Consume the `=ybegin` (and `=ypart`, if any) lines from `inner`.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let mut line = Vec::with_capacity(256);

        read_line(&mut inner, &mut line)?;
        if !line.starts_with(YBEGIN) {
            return Err(VfsError::decode("stream does not start with =ybegin").into());
        }
        let mut meta = parse_ybegin(&line)?;

        let mut pending = Vec::new();
        if meta.is_multipart() {
            read_line(&mut inner, &mut line)?;
            if line.starts_with(YPART) {
                parse_ypart(&line, &mut meta)?;
                line.clear();
            } else {
                // Tolerate posters that omit =ypart; keep the line as data.
                tracing::debug!(name = %meta.name, "yenc.decoder.missing_ypart");
                pending = std::mem::take(&mut line);
            }
        }

        let mut decoder = Self {
            inner,
            meta,
            trailer: None,
            line,
            pending: Vec::with_capacity(8 * 1024),
            pending_pos: 0,
            escape: false,
            decoded: 0,
            crc: Crc32::new(),
            finished: false,
        };
        if !pending.is_empty() {
            decoder.decode_line(&pending)?;
        }
        Ok(decoder)
    }

    /// Header metadata.
    pub fn meta(&self) -> &YencMeta {
        &self.meta
    }

    /// Authoritative decoded size of this part, when the header carries one.
    pub fn part_size(&self) -> Option<u64> {
        match self.meta.part_size() {
            0 => None,
            n => Some(n),
        }
    }

    /// The `=yend` trailer, once it has been reached.
    pub fn trailer(&self) -> Option<&YencTrailer> {
        self.trailer.as_ref()
    }

    /// Total decoded bytes produced so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn decode_line(&mut self, line: &[u8]) -> io::Result<()> {
        let mut body = trim_eol(line);

        // NNTP dot-stuffing: a lone "." ends the article, ".." is an escaped dot.
        if body == b"." {
            self.finished = true;
            return Ok(());
        }
        if body.starts_with(b"..") {
            body = &body[1..];
        }

        let start = self.pending.len();
        for &byte in body {
            if self.escape {
                self.pending.push(byte.wrapping_sub(64).wrapping_sub(42));
                self.escape = false;
            } else if byte == b'=' {
                self.escape = true;
            } else {
                self.pending.push(byte.wrapping_sub(42));
            }
        }
        // A trailing '=' escapes the first byte of the next line.

        let produced = &self.pending[start..];
        self.crc.update(produced);
        self.decoded += produced.len() as u64;
        Ok(())
    }

    fn finish(&mut self, trailer: YencTrailer) -> io::Result<()> {
        self.finished = true;

        if let Some(size) = trailer.size {
            if size != self.decoded {
                return Err(VfsError::decode(format!(
                    "=yend size={size} but decoded {} bytes",
                    self.decoded
                ))
                .into());
            }
        }

        let expected = if self.meta.is_multipart() {
            trailer.pcrc32
        } else {
            trailer.pcrc32.or(trailer.crc32)
        };
        if let Some(expected) = expected {
            let actual = self.crc.finish();
            if actual != expected {
                return Err(VfsError::decode(format!(
                    "crc mismatch: expected {expected:08x}, got {actual:08x}"
                ))
                .into());
            }
        }

        self.trailer = Some(trailer);
        Ok(())
    }

    /// Decode lines until there is pending output or the part has ended.
    fn fill(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pending_pos = 0;

        while self.pending.is_empty() && !self.finished {
            let mut line = std::mem::take(&mut self.line);
            let result = read_line(&mut self.inner, &mut line);
            let outcome = match result {
                Ok(0) => {
                    // Truncated article: no trailer, the caller sees a short part.
                    self.finished = true;
                    Ok(())
                }
                Ok(_) if !self.escape && line.starts_with(YEND) => {
                    parse_yend(&line).map_err(io::Error::from).and_then(|t| self.finish(t))
                }
                Ok(_) => self.decode_line(&line),
                Err(e) => Err(e),
            };
            self.line = line;
            outcome?;
        }

        Ok(())
    }
}

impl<R: BufRead> Read for YencDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending_pos >= self.pending.len() {
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }

        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }
}

fn read_line<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<usize> {
    line.clear();
    reader.read_until(b'\n', line)
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}
