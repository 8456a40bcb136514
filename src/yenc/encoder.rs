//! yEnc encoder.
//!
//! Produces the article bodies the decoder consumes. Used to build test
//! fixtures, benchmark inputs and fuzz seeds; posting is out of scope.

use crate::crc32::crc32;

/// Default encoded line length.
pub const DEFAULT_LINE_LEN: usize = 128;

/// Describes where a part sits inside the posted file.
#[derive(Debug, Clone)]
pub struct PartInfo<'a> {
    pub name: &'a str,
    pub file_size: u64,
    /// 1-based part number; `None` writes a single-part post.
    pub part: Option<u32>,
    pub total: Option<u32>,
    /// Zero-based offset of this part's first byte within the file.
    pub offset: u64,
    pub line_len: usize,
}

impl<'a> PartInfo<'a> {
    /// A single-part post carrying the whole of `data`.
    pub fn single(name: &'a str, len: usize) -> Self {
        Self {
            name,
            file_size: len as u64,
            part: None,
            total: None,
            offset: 0,
            line_len: DEFAULT_LINE_LEN,
        }
    }
}

#[inline]
fn needs_escape(byte: u8, column: usize, line_len: usize) -> bool {
    match byte {
        0x00 | b'\n' | b'\r' | b'=' => true,
        // Leading dots would be dot-stuffed by NNTP.
        b'.' => column == 0,
        b'\t' | b' ' => column == 0 || column + 1 >= line_len,
        _ => false,
    }
}

/// Encode `data` as one yEnc article body.
pub fn encode_part(data: &[u8], info: &PartInfo<'_>) -> Vec<u8> {
    let line_len = info.line_len.max(1);
    let mut out = Vec::with_capacity(data.len() + data.len() / 32 + 256);

    match (info.part, info.total) {
        (Some(part), total) => {
            let total = total.map(|t| format!(" total={t}")).unwrap_or_default();
            out.extend_from_slice(
                format!(
                    "=ybegin part={part}{total} line={line_len} size={} name={}\r\n",
                    info.file_size, info.name
                )
                .as_bytes(),
            );
            out.extend_from_slice(
                format!(
                    "=ypart begin={} end={}\r\n",
                    info.offset + 1,
                    info.offset + data.len() as u64
                )
                .as_bytes(),
            );
        }
        (None, _) => {
            out.extend_from_slice(
                format!(
                    "=ybegin line={line_len} size={} name={}\r\n",
                    info.file_size, info.name
                )
                .as_bytes(),
            );
        }
    }

    let mut column = 0usize;
    for &byte in data {
        let encoded = byte.wrapping_add(42);
        if needs_escape(encoded, column, line_len) {
            out.push(b'=');
            out.push(encoded.wrapping_add(64));
            column += 2;
        } else {
            out.push(encoded);
            column += 1;
        }
        if column >= line_len {
            out.extend_from_slice(b"\r\n");
            column = 0;
        }
    }
    if column > 0 {
        out.extend_from_slice(b"\r\n");
    }

    let checksum = crc32(data);
    let trailer = match info.part {
        Some(part) => format!(
            "=yend size={} part={part} pcrc32={checksum:08x}\r\n",
            data.len()
        ),
        None => format!("=yend size={} crc32={checksum:08x}\r\n", data.len()),
    };
    out.extend_from_slice(trailer.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_critical_bytes() {
        // 0xD6 + 42 wraps to 0x00, 0xE0 -> '\n', 0xE3 -> '\r', 0x13 -> '='
        let encoded = encode_part(&[0xD6, 0xE0, 0xE3, 0x13], &PartInfo::single("x", 4));
        let body_start = encoded.windows(2).position(|w| w == b"\r\n").unwrap() + 2;
        let body = &encoded[body_start..];
        assert_eq!(&body[..8], b"=@=J=M=}");
    }

    #[test]
    fn test_wraps_lines() {
        // 0x17 encodes to ASCII 'A'
        let data = vec![0x17u8; 300];
        let info = PartInfo {
            line_len: 100,
            ..PartInfo::single("x", data.len())
        };
        let encoded = encode_part(&data, &info);
        let text = String::from_utf8(encoded).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();
        // header, 3 data lines, trailer, trailing empty split
        assert_eq!(lines.len(), 6);
        assert!(lines[1..4].iter().all(|l| l.len() == 100));
        assert!(lines[4].starts_with("=yend size=300 crc32="));
    }

    #[test]
    fn test_multipart_headers() {
        let info = PartInfo {
            name: "movie.mkv",
            file_size: 30,
            part: Some(2),
            total: Some(3),
            offset: 10,
            line_len: DEFAULT_LINE_LEN,
        };
        let encoded = String::from_utf8(encode_part(&[1u8; 10], &info)).unwrap();
        assert!(encoded.starts_with("=ybegin part=2 total=3 line=128 size=30 name=movie.mkv\r\n"));
        assert!(encoded.contains("=ypart begin=11 end=20\r\n"));
        assert!(encoded.contains("=yend size=10 part=2 pcrc32="));
    }
}
