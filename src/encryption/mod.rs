//! Decryption of encrypted virtual files.
//!
//! When a file's metadata declares encryption, the virtual file routes each
//! window fetch through an [`EncryptionAdapter`] instead of calling the
//! reader factory directly. The adapter decides which stored bytes it
//! needs, fetches them through the factory, and returns a stream of
//! plaintext for exactly the requested window.
//!
//! With the `crypto` feature, [`AesCbcAdapter`] handles files stored as
//! AES-256-CBC ciphertext with a PBKDF2-HMAC-SHA256 derived key.

#[cfg(feature = "crypto")]
mod aes_cbc;

#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub use aes_cbc::{AesCbcAdapter, CRYPT_BLOCK_SIZE, DEFAULT_KDF_ITERATIONS};

use crate::error::Result;
use crate::metadata::FileMetadata;
use crate::source::{BoxedStream, ReaderFactory};

/// Decorates reader factory calls with decryption.
pub trait EncryptionAdapter: Send + Sync {
    /// Plaintext stream for `[start, end]` (inclusive) of the file.
    fn wrap(
        &self,
        meta: &FileMetadata,
        start: u64,
        end: u64,
        factory: &dyn ReaderFactory,
    ) -> Result<BoxedStream>;
}
