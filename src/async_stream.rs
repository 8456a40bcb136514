//! Async adapter over [`VirtualFile`].
//!
//! Reads block on the network, so each chunk is filled on tokio's blocking
//! pool. The handle stays usable from synchronous code at the same time;
//! calls are serialized by its own lock.

use crate::error::{Result, VfsError};
use crate::virtual_file::VirtualFile;
use std::io;
use std::sync::Arc;

/// Default chunk size yielded by [`ChunkStream::next_chunk`].
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Pulls a virtual file in fixed-size chunks.
pub struct ChunkStream {
    file: Arc<VirtualFile>,
    chunk_size: usize,
    delivered: u64,
    pending: Option<VfsError>,
    done: bool,
}

impl ChunkStream {
    pub fn new(file: Arc<VirtualFile>) -> Self {
        Self::with_chunk_size(file, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(file: Arc<VirtualFile>, chunk_size: usize) -> Self {
        Self {
            file,
            chunk_size: chunk_size.max(1),
            delivered: 0,
            pending: None,
            done: false,
        }
    }

    /// Next chunk of up to `chunk_size` bytes, or `None` at the end of the
    /// served range. Only the last chunk may be short. Bytes read before a
    /// failure are yielded first and the error on the following call, after
    /// which the stream is finished.
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>>> {
        if let Some(e) = self.pending.take() {
            self.done = true;
            return Some(Err(e));
        }
        if self.done {
            return None;
        }

        let file = Arc::clone(&self.file);
        let chunk_size = self.chunk_size;
        let joined = tokio::task::spawn_blocking(move || fill_chunk(&file, chunk_size)).await;

        let (chunk, error) = match joined {
            Ok(filled) => filled,
            Err(e) => (Vec::new(), Some(VfsError::Io(io::Error::other(e)))),
        };

        if chunk.is_empty() {
            self.done = true;
            return error.map(Err);
        }

        self.delivered += chunk.len() as u64;
        match error {
            Some(e) => self.pending = Some(e),
            None if chunk.len() < self.chunk_size => self.done = true,
            None => {}
        }
        Some(Ok(chunk))
    }

    /// Collect everything that remains.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Bytes yielded so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn file(&self) -> &VirtualFile {
        &self.file
    }
}

/// Read until `chunk_size` bytes, end of data, or an error. Bytes already
/// read are returned alongside the error.
fn fill_chunk(file: &VirtualFile, chunk_size: usize) -> (Vec<u8>, Option<VfsError>) {
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;
    let mut error = None;
    while filled < chunk_size {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    buf.truncate(filled);
    (buf, error)
}
