//! yEnc keyword line parsing.
//!
//! Keyword lines look like:
//!
//! ```text
//! =ybegin part=1 total=3 line=128 size=768000 name=movie.mkv
//! =ypart begin=1 end=256000
//! =yend size=256000 part=1 pcrc32=4c3a81f0
//! ```
//!
//! `name=` is always last and runs to the end of the line, so it may contain spaces.

use crate::error::{Result, VfsError};

/// Magic prefix identifying a yEnc body.
pub const YBEGIN: &[u8] = b"=ybegin";
pub const YPART: &[u8] = b"=ypart";
pub const YEND: &[u8] = b"=yend";

/// Metadata from the `=ybegin` and optional `=ypart` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YencMeta {
    pub name: String,
    /// Size of the whole file across all parts.
    pub file_size: u64,
    pub line_len: u32,
    pub part: Option<u32>,
    pub total: Option<u32>,
    /// 1-based inclusive offsets of this part within the file.
    pub begin: Option<u64>,
    pub end: Option<u64>,
}

impl YencMeta {
    /// Decoded size of this part.
    ///
    /// Multi-part posts declare it through `=ypart`; single-part posts
    /// carry the whole file so the part size is the file size.
    pub fn part_size(&self) -> u64 {
        match (self.begin, self.end) {
            (Some(begin), Some(end)) if end >= begin => end - begin + 1,
            _ if self.part.is_none() => self.file_size,
            _ => 0,
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.part.is_some()
    }
}

/// Values from the `=yend` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YencTrailer {
    pub size: Option<u64>,
    pub part: Option<u32>,
    pub pcrc32: Option<u32>,
    pub crc32: Option<u32>,
}

/// Split a keyword line (without its `=yxxx` tag) into key/value pairs.
fn keywords(rest: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut remaining = rest.trim_start();

    while !remaining.is_empty() {
        if let Some(name) = remaining.strip_prefix("name=") {
            pairs.push(("name", name.trim_end()));
            break;
        }
        let (token, tail) = match remaining.find(' ') {
            Some(pos) => (&remaining[..pos], &remaining[pos + 1..]),
            None => (remaining, ""),
        };
        if let Some((key, value)) = token.split_once('=') {
            pairs.push((key, value));
        }
        remaining = tail.trim_start();
    }

    pairs
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VfsError::decode(format!("invalid yEnc {key}={value:?}")))
}

fn crc(key: &str, value: &str) -> Result<u32> {
    u32::from_str_radix(value.trim(), 16)
        .map_err(|_| VfsError::decode(format!("invalid yEnc {key}={value:?}")))
}

fn line_str(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line)
        .map(|s| s.trim_end_matches(['\r', '\n']))
        .or_else(|_| {
            // Names are not required to be UTF-8; parse what precedes them.
            let cut = line
                .windows(5)
                .position(|w| w == b"name=")
                .unwrap_or(line.len());
            std::str::from_utf8(&line[..cut])
                .map(|s| s.trim_end_matches(['\r', '\n']))
                .map_err(|_| VfsError::decode("yEnc header is not valid text"))
        })
}

/// Parse a `=ybegin` line into a fresh [`YencMeta`].
pub fn parse_ybegin(line: &[u8]) -> Result<YencMeta> {
    let text = line_str(line)?;
    let rest = text
        .strip_prefix("=ybegin")
        .ok_or_else(|| VfsError::decode("missing =ybegin"))?;

    let mut meta = YencMeta::default();
    let mut saw_size = false;
    for (key, value) in keywords(rest) {
        match key {
            "name" => meta.name = value.to_string(),
            "size" => {
                meta.file_size = number(key, value)?;
                saw_size = true;
            }
            "line" => meta.line_len = number(key, value)?,
            "part" => meta.part = Some(number(key, value)?),
            "total" => meta.total = Some(number(key, value)?),
            _ => {}
        }
    }

    if !saw_size {
        return Err(VfsError::decode("=ybegin without size"));
    }
    Ok(meta)
}

/// Apply a `=ypart` line to `meta`.
pub fn parse_ypart(line: &[u8], meta: &mut YencMeta) -> Result<()> {
    let text = line_str(line)?;
    let rest = text
        .strip_prefix("=ypart")
        .ok_or_else(|| VfsError::decode("missing =ypart"))?;

    for (key, value) in keywords(rest) {
        match key {
            "begin" => meta.begin = Some(number(key, value)?),
            "end" => meta.end = Some(number(key, value)?),
            _ => {}
        }
    }

    match (meta.begin, meta.end) {
        (Some(begin), Some(end)) if begin >= 1 && end >= begin => Ok(()),
        _ => Err(VfsError::decode(format!(
            "invalid =ypart range begin={:?} end={:?}",
            meta.begin, meta.end
        ))),
    }
}

/// Parse a `=yend` line.
pub fn parse_yend(line: &[u8]) -> Result<YencTrailer> {
    let text = line_str(line)?;
    let rest = text
        .strip_prefix("=yend")
        .ok_or_else(|| VfsError::decode("missing =yend"))?;

    let mut trailer = YencTrailer::default();
    for (key, value) in keywords(rest) {
        match key {
            "size" => trailer.size = Some(number(key, value)?),
            "part" => trailer.part = Some(number(key, value)?),
            "pcrc32" => trailer.pcrc32 = Some(crc(key, value)?),
            "crc32" => trailer.crc32 = Some(crc(key, value)?),
            _ => {}
        }
    }
    Ok(trailer)
}
