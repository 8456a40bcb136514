//! AES-256-CBC decryption with random access.
//!
//! Stored layout: the plaintext zero-padded to a whole number of 16-byte
//! blocks, encrypted with AES-256-CBC. Key and base IV come from
//! PBKDF2-HMAC-SHA256 over the password and salt.
//!
//! CBC decrypts block `i` with ciphertext block `i - 1` as its IV, so a
//! window starting in block `i > 0` is fetched from block `i - 1`:
//!
//! ```text
//! stored   | c0 | c1 | c2 | c3 | c4 |
//! request              [  ..  ]          plaintext bytes in c2..c3
//! fetched       [ c1 | c2 | c3 ]         c1 is only used as the IV
//! ```

use super::EncryptionAdapter;
use crate::error::{Result, VfsError};
use crate::metadata::{Encryption, FileMetadata};
use crate::source::{BoxedStream, ReadStream, ReaderFactory};
use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fmt;
use std::io::{self, Read};

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

pub const CRYPT_BLOCK_SIZE: usize = 16;
const BLOCK: u64 = CRYPT_BLOCK_SIZE as u64;
const KEY_SIZE: usize = 32;

/// PBKDF2 iteration count used by [`AesCbcAdapter::new`].
pub const DEFAULT_KDF_ITERATIONS: u32 = 1 << 15;

/// Ciphertext read per decrypt call.
const READ_CHUNK: usize = 64 * 1024;

/// [`EncryptionAdapter`] for AES-256-CBC encrypted files.
#[derive(Clone)]
pub struct AesCbcAdapter {
    key: [u8; KEY_SIZE],
    iv: [u8; CRYPT_BLOCK_SIZE],
}

impl fmt::Debug for AesCbcAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCbcAdapter").finish_non_exhaustive()
    }
}

impl AesCbcAdapter {
    pub fn new(password: &str, salt: &[u8]) -> Self {
        Self::with_iterations(password, salt, DEFAULT_KDF_ITERATIONS)
    }

    /// Derive the key and base IV with an explicit PBKDF2 iteration count.
    pub fn with_iterations(password: &str, salt: &[u8], iterations: u32) -> Self {
        let mut material = [0u8; KEY_SIZE + CRYPT_BLOCK_SIZE];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations.max(1), &mut material);

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&material[..KEY_SIZE]);
        let mut iv = [0u8; CRYPT_BLOCK_SIZE];
        iv.copy_from_slice(&material[KEY_SIZE..]);
        Self { key, iv }
    }

    /// Stored size of a `plain_len`-byte file.
    pub fn stored_len(plain_len: u64) -> u64 {
        plain_len.div_ceil(BLOCK) * BLOCK
    }

    /// Encrypt `plaintext` into the stored layout.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut buf = plaintext.to_vec();
        buf.resize(Self::stored_len(plaintext.len() as u64) as usize, 0);
        let len = buf.len();

        Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|_| VfsError::InvalidOperation("invalid key length"))?
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| VfsError::InvalidOperation("unaligned ciphertext"))?;
        Ok(buf)
    }

    /// Decrypt whole blocks in place.
    fn decrypt(&self, iv: &[u8; CRYPT_BLOCK_SIZE], data: &mut [u8]) -> io::Result<()> {
        if data.len() % CRYPT_BLOCK_SIZE != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "unaligned ciphertext"));
        }
        Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid key length"))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "decryption failed"))?;
        Ok(())
    }
}

impl EncryptionAdapter for AesCbcAdapter {
    fn wrap(
        &self,
        meta: &FileMetadata,
        start: u64,
        end: u64,
        factory: &dyn ReaderFactory,
    ) -> Result<BoxedStream> {
        if meta.encryption != Encryption::Aes256Cbc {
            return Err(VfsError::NoCipherConfigured);
        }
        if end < start {
            return Err(VfsError::InvalidRange(format!("{start}-{end}")));
        }

        let first_block = start / BLOCK;
        let fetch_start = first_block.saturating_sub(1) * BLOCK;
        let fetch_end = (end / BLOCK + 1) * BLOCK - 1;

        // Segment data covers the padded ciphertext, not just the plaintext.
        let mut stored = meta.clone();
        stored.file_size = Self::stored_len(meta.file_size);

        tracing::debug!(start, end, fetch_start, fetch_end, "encryption.aes_cbc.wrap");

        let mut inner = factory.new_reader(&stored, fetch_start, fetch_end)?;
        let iv = if first_block == 0 {
            self.iv
        } else {
            let mut iv = [0u8; CRYPT_BLOCK_SIZE];
            if let Err(e) = inner.read_exact(&mut iv) {
                let _ = inner.close();
                return Err(e.into());
            }
            iv
        };

        Ok(Box::new(DecryptingStream {
            cipher: self.clone(),
            inner,
            iv,
            raw: vec![0u8; READ_CHUNK],
            carry: 0,
            pending: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            skip: start - first_block * BLOCK,
            remaining: end - start + 1,
            done: false,
        }))
    }
}

/// Plaintext view over a block-aligned ciphertext stream.
struct DecryptingStream {
    cipher: AesCbcAdapter,
    inner: BoxedStream,
    /// IV for the next block: the last ciphertext block decrypted.
    iv: [u8; CRYPT_BLOCK_SIZE],
    raw: Vec<u8>,
    /// Bytes of an incomplete block left at the front of `raw`.
    carry: usize,
    pending: Vec<u8>,
    pos: usize,
    skip: u64,
    remaining: u64,
    done: bool,
}

impl DecryptingStream {
    fn fill(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pos = 0;

        let mut filled = self.carry;
        let mut eof = false;
        while filled < self.raw.len() {
            match self.inner.read(&mut self.raw[filled..]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let whole = filled - filled % CRYPT_BLOCK_SIZE;
        if whole == 0 {
            self.done = true;
            if filled > 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "ciphertext ends mid-block",
                ));
            }
            return Ok(());
        }

        let mut next_iv = [0u8; CRYPT_BLOCK_SIZE];
        next_iv.copy_from_slice(&self.raw[whole - CRYPT_BLOCK_SIZE..whole]);

        self.pending.extend_from_slice(&self.raw[..whole]);
        self.cipher.decrypt(&self.iv, &mut self.pending)?;
        self.iv = next_iv;

        self.raw.copy_within(whole..filled, 0);
        self.carry = filled - whole;
        if eof && self.carry == 0 {
            self.done = true;
        }
        Ok(())
    }
}

impl Read for DecryptingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.remaining == 0 {
                return Ok(0);
            }
            if self.pos < self.pending.len() {
                let available = self.pending.len() - self.pos;
                if self.skip > 0 {
                    let n = available.min(usize::try_from(self.skip).unwrap_or(usize::MAX));
                    self.pos += n;
                    self.skip -= n as u64;
                    continue;
                }
                let n = available
                    .min(buf.len())
                    .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
                buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
                self.pos += n;
                self.remaining -= n as u64;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

impl ReadStream for DecryptingStream {
    fn close(&mut self) -> io::Result<()> {
        self.done = true;
        self.inner.close()
    }
}
