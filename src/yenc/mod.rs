//! yEnc binary transport encoding.
//!
//! Usenet article bodies carry binary data as yEnc: every byte is shifted by
//! 42, the four critical values (`NUL`, `LF`, `CR`, `=`) are escaped with `=`
//! and a further 64, and the body is framed by keyword lines.
//!
//! ```text
//! =ybegin part=1 total=40 line=128 size=30000000 name=movie.mkv
//! =ypart begin=1 end=750000
//! ...encoded lines...
//! =yend size=750000 part=1 pcrc32=2a5b9c01
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`header`] | Keyword line parsing |
//! | [`decoder`] | Streaming [`YencDecoder`] |
//! | [`encoder`] | [`encode_part`] for fixtures and benchmarks |

pub mod decoder;
pub mod encoder;
pub mod header;

pub use decoder::YencDecoder;
pub use encoder::{encode_part, PartInfo};
pub use header::{YencMeta, YencTrailer};

use std::io::{self, Cursor, Read};

/// A stream whose first bytes were read for format detection and are replayed.
pub type Sniffed<R> = io::Chain<Cursor<Vec<u8>>, R>;

/// Read up to `=ybegin`'s length from `reader` and report whether the stream is yEnc.
///
/// Unlike a single `fill_buf`, this keeps reading until the prefix is
/// complete or the stream ends, so short network reads cannot hide the magic.
pub fn sniff<R: Read>(mut reader: R) -> io::Result<(bool, Sniffed<R>)> {
    let mut prefix = vec![0u8; header::YBEGIN.len()];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    prefix.truncate(filled);

    let is_yenc = prefix == header::YBEGIN;
    Ok((is_yenc, Cursor::new(prefix).chain(reader)))
}
