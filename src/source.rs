//! Byte stream plumbing between the virtual file and its collaborators.
//!
//! A [`ReaderFactory`] opens a [`ReadStream`] for an inclusive window of a
//! file's bytes. Streams are closed explicitly; dropping one without
//! calling [`ReadStream::close`] is allowed but skips close-time errors.

use crate::error::Result;
use crate::metadata::FileMetadata;
use std::fmt;
use std::io::{self, Read};

/// A readable byte stream with an explicit close.
pub trait ReadStream: Read + Send {
    /// Release the underlying resources. Calling it again is a no-op.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Type-erased stream handed between components.
pub type BoxedStream = Box<dyn ReadStream>;

impl<S: ReadStream + ?Sized> ReadStream for Box<S> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl ReadStream for io::Cursor<Vec<u8>> {}
impl ReadStream for io::Empty {}

/// Opens byte streams for windows of a virtual file.
pub trait ReaderFactory: Send + Sync {
    /// Stream yielding exactly the bytes `[start, end]` (inclusive).
    fn new_reader(&self, meta: &FileMetadata, start: u64, end: u64) -> Result<BoxedStream>;
}

/// [`ReaderFactory`] backed by a closure.
pub struct ReaderFactoryFn<F>(pub F);

impl<F> ReaderFactory for ReaderFactoryFn<F>
where
    F: Fn(&FileMetadata, u64, u64) -> Result<BoxedStream> + Send + Sync,
{
    fn new_reader(&self, meta: &FileMetadata, start: u64, end: u64) -> Result<BoxedStream> {
        (self.0)(meta, start, end)
    }
}

impl<F> fmt::Debug for ReaderFactoryFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReaderFactoryFn")
    }
}

/// Adapts any `Read + Send` into a [`ReadStream`] that drops it on close.
pub struct OwnedStream<R> {
    inner: Option<R>,
}

impl<R: Read + Send> OwnedStream<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn boxed(inner: R) -> BoxedStream
    where
        R: 'static,
    {
        Box::new(Self::new(inner))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<R: Read + Send> Read for OwnedStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Err(io::Error::other("read on closed stream")),
        }
    }
}

impl<R: Read + Send> ReadStream for OwnedStream<R> {
    fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Stream limited to a fixed number of bytes; close is forwarded.
pub struct BoundedStream<S> {
    inner: S,
    remaining: u64,
}

impl<S: ReadStream> BoundedStream<S> {
    pub fn new(inner: S, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<S: ReadStream> Read for BoundedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<S: ReadStream> ReadStream for BoundedStream<S> {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory stream that counts closes and can fail after a prefix.
    pub struct MockStream {
        data: io::Cursor<Vec<u8>>,
        fail_after: Option<usize>,
        closes: Arc<AtomicUsize>,
        closed: bool,
    }

    impl MockStream {
        pub fn new(data: Vec<u8>, closes: Arc<AtomicUsize>) -> Self {
            Self {
                data: io::Cursor::new(data),
                fail_after: None,
                closes,
                closed: false,
            }
        }

        /// Yield `n` bytes then fail with a connection reset.
        pub fn failing_after(mut self, n: usize) -> Self {
            self.fail_after = Some(n);
            self
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let pos = self.data.position() as usize;
            if let Some(limit) = self.fail_after {
                if pos >= limit {
                    return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
                }
                let max = buf.len().min(limit - pos);
                return self.data.read(&mut buf[..max]);
            }
            self.data.read(buf)
        }
    }

    impl ReadStream for MockStream {
        fn close(&mut self) -> io::Result<()> {
            if !self.closed {
                self.closed = true;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    /// Factory serving slices of `data`, recording every window it opens.
    pub struct MockFactory {
        pub data: Vec<u8>,
        pub calls: std::sync::Mutex<Vec<(u64, u64)>>,
        pub closes: Arc<AtomicUsize>,
        pub fail_after: Option<usize>,
    }

    impl MockFactory {
        pub fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                calls: std::sync::Mutex::new(Vec::new()),
                closes: Arc::new(AtomicUsize::new(0)),
                fail_after: None,
            }
        }

        pub fn calls(&self) -> Vec<(u64, u64)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    impl ReaderFactory for MockFactory {
        fn new_reader(&self, _meta: &FileMetadata, start: u64, end: u64) -> Result<BoxedStream> {
            self.calls.lock().unwrap().push((start, end));
            let end = (end as usize).min(self.data.len().saturating_sub(1));
            let slice = self.data.get(start as usize..=end).unwrap_or_default().to_vec();
            let mut stream = MockStream::new(slice, Arc::clone(&self.closes));
            if let Some(n) = self.fail_after {
                stream = stream.failing_after(n);
            }
            Ok(Box::new(stream))
        }
    }
}
