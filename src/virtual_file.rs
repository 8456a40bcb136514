//! Random-access handle over a virtual file.
//!
//! A [`VirtualFile`] serves one clamped byte window of a file, in order,
//! from streams opened through a [`ReaderFactory`]. Each underlying fetch
//! covers at most [`StreamConfig::streaming_chunk`] bytes when the request
//! was open-ended; bounded requests are fetched in one window.
//!
//! ```text
//! read(buf) ──▶ ensure reader for [offset, window end]
//!                 ├─ parked reader for that window? reuse it
//!                 └─ factory (or encryption adapter) ──▶ bound to window
//!           ──▶ copy into buf, advance offset
//!           ──▶ on end of stream: close, open the next window
//! ```
//!
//! All state sits behind one mutex, so calls on the same handle are
//! serialized. Distinct handles share nothing.

use crate::config::StreamConfig;
use crate::directory::FileInfo;
use crate::encryption::EncryptionAdapter;
use crate::error::{Result, VfsError};
use crate::health::{HealthReporter, NoopHealthReporter};
use crate::metadata::{FileDescriptor, FileMetadata};
use crate::range::{ByteRange, ServedRange};
use crate::source::{BoundedStream, BoxedStream, ReaderFactory};
use std::io::{self, Read, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// `(start, end)` of the window a reader is positioned to serve.
type RangeKey = (u64, u64);

/// Bounded LRU of idle readers, most recently parked last.
struct ReaderCache {
    capacity: usize,
    entries: Vec<(RangeKey, BoxedStream)>,
}

impl ReaderCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    fn take(&mut self, key: RangeKey) -> Option<BoxedStream> {
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Reader positioned at `start` whose window ends by `max_end`.
    fn take_at(&mut self, start: u64, max_end: u64) -> Option<(u64, BoxedStream)> {
        let pos = self
            .entries
            .iter()
            .rposition(|((s, e), _)| *s == start && *e <= max_end)?;
        let ((_, end), stream) = self.entries.remove(pos);
        Some((end, stream))
    }

    fn park(&mut self, key: RangeKey, mut stream: BoxedStream) {
        if self.capacity == 0 {
            close_quietly(key, &mut stream);
            return;
        }
        if let Some(mut stale) = self.take(key) {
            close_quietly(key, &mut stale);
        }
        self.entries.push((key, stream));
        while self.entries.len() > self.capacity {
            let (key, mut evicted) = self.entries.remove(0);
            tracing::debug!(start = key.0, end = key.1, "virtual_file.reader_evicted");
            close_quietly(key, &mut evicted);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        for (key, mut stream) in self.entries.drain(..) {
            close_quietly(key, &mut stream);
        }
    }
}

fn close_quietly(key: RangeKey, stream: &mut BoxedStream) {
    if let Err(e) = stream.close() {
        tracing::warn!(start = key.0, end = key.1, error = %e, "virtual_file.cleanup_error");
    }
}

struct ActiveReader {
    /// Last byte the reader serves.
    end: u64,
    stream: BoxedStream,
    /// Bytes this reader has delivered.
    delivered: u64,
    /// Taken from the reader cache rather than freshly opened.
    reused: bool,
}

struct State {
    range: Option<ServedRange>,
    current_offset: u64,
    active: Option<ActiveReader>,
    cache: ReaderCache,
    /// Error raised after some bytes of a call were already returned.
    pending_error: Option<VfsError>,
    closed: bool,
}

impl State {
    fn release_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            close_quietly((self.current_offset, active.end), &mut active.stream);
        }
    }
}

/// Read-only handle serving one window of a virtual file.
pub struct VirtualFile {
    virtual_path: String,
    name: String,
    meta: Arc<FileMetadata>,
    factory: Arc<dyn ReaderFactory>,
    health: Arc<dyn HealthReporter>,
    encryption: Option<Arc<dyn EncryptionAdapter>>,
    requested: Option<ByteRange>,
    config: StreamConfig,
    state: Mutex<State>,
}

impl VirtualFile {
    /// Handle over the whole of `meta`, read through `factory`.
    ///
    /// `path` is the normalized path used in logs and health reports.
    pub fn new(path: &str, meta: impl Into<Arc<FileMetadata>>, factory: Arc<dyn ReaderFactory>) -> Self {
        let config = StreamConfig::default();
        Self {
            virtual_path: path.to_string(),
            name: path.to_string(),
            meta: meta.into(),
            factory,
            health: Arc::new(NoopHealthReporter),
            encryption: None,
            requested: None,
            state: Mutex::new(State {
                range: None,
                current_offset: 0,
                active: None,
                cache: ReaderCache::new(config.reader_cache_capacity),
                pending_error: None,
                closed: false,
            }),
            config,
        }
    }

    /// Path as the caller spelled it, kept for [`VirtualFile::descriptor`].
    pub fn with_virtual_path(mut self, path: &str) -> Self {
        self.virtual_path = path.to_string();
        self
    }

    pub fn with_range(mut self, range: Option<ByteRange>) -> Self {
        self.requested = range;
        self
    }

    pub fn with_health_reporter(mut self, health: Arc<dyn HealthReporter>) -> Self {
        self.health = health;
        self
    }

    pub fn with_encryption(mut self, adapter: Option<Arc<dyn EncryptionAdapter>>) -> Self {
        self.encryption = adapter;
        self
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cache = ReaderCache::new(config.reader_cache_capacity);
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.meta
    }

    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor::from_metadata(&self.virtual_path, &self.name, &self.meta)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn served_range(&self, state: &mut State) -> ServedRange {
        if let Some(range) = state.range {
            return range;
        }

        let range = ServedRange::resolve(self.requested, self.meta.file_size);
        if let Some(requested) = self.requested {
            tracing::info!(
                path = %self.name,
                requested = %requested,
                start_offset = range.start(),
                end_offset = ?range.end(),
                range_size = range.len(),
                file_size = self.meta.file_size,
                "virtual_file.range_initialized"
            );
        }
        state.range = Some(range);
        state.current_offset = range.start();
        range
    }

    /// Served window: `(start, end, total)`; `end` is `None` when empty.
    pub fn range_info(&self) -> (u64, Option<u64>, u64) {
        let mut state = self.lock();
        self.served_range(&mut state).info()
    }

    /// File information reporting the served length as the size.
    pub fn stat(&self) -> FileInfo {
        let mut state = self.lock();
        let range = self.served_range(&mut state);
        FileInfo {
            name: base_name(&self.name).to_string(),
            size: range.len(),
            modified: self.meta.modified(),
            is_dir: false,
        }
    }

    /// Current logical offset.
    pub fn position(&self) -> u64 {
        let mut state = self.lock();
        self.served_range(&mut state);
        state.current_offset
    }

    /// Read the next bytes of the window into `buf`.
    ///
    /// Returns `Ok(0)` at the end of the window. An error hit after some
    /// bytes were copied is returned by the following call.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Ok(0);
        }
        if let Some(err) = state.pending_error.take() {
            return Err(err);
        }

        let range = self.served_range(state);
        let Some(end) = range.end() else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let mut total = 0;
        while total < buf.len() && state.current_offset <= end {
            if let Err(err) = self.ensure_reader(state, range, end) {
                return Self::finish_with_error(state, total, err);
            }
            let remaining = end - state.current_offset + 1;
            let Some(active) = state.active.as_mut() else {
                break;
            };

            let max = (buf.len() - total).min(usize::try_from(remaining).unwrap_or(usize::MAX));

            match active.stream.read(&mut buf[total..total + max]) {
                Ok(0) => {
                    let (delivered, reused) = (active.delivered, active.reused);
                    let window_end = active.end;
                    state.release_active();
                    if state.current_offset > end || state.current_offset >= self.meta.file_size {
                        break;
                    }
                    // An exhausted cached reader is replaced by a fresh window.
                    if delivered == 0 && !reused {
                        let err = VfsError::corrupted_stream(
                            window_end - state.current_offset + 1,
                            format!("window {}-{window_end} returned no data", state.current_offset),
                        );
                        self.report(&err, 0);
                        return Self::finish_with_error(state, total, err);
                    }
                }
                Ok(n) => {
                    active.delivered += n as u64;
                    state.current_offset += n as u64;
                    total += n;
                    if state.current_offset > end {
                        state.release_active();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let (delivered, window_end) = (active.delivered, active.end);
                    let window_len = window_end - state.current_offset + 1 + delivered;
                    let terminal = is_terminal(&e);
                    let err = classify_read_error(e, delivered, window_len);
                    self.report(&err, delivered);

                    // Only a transient failure leaves a reader worth retrying.
                    if terminal {
                        state.release_active();
                    } else if let Some(active) = state.active.take() {
                        let key = (state.current_offset, active.end);
                        state.cache.park(key, active.stream);
                    }
                    return Self::finish_with_error(state, total, err);
                }
            }
        }

        Ok(total)
    }

    fn finish_with_error(state: &mut State, total: usize, err: VfsError) -> Result<usize> {
        if total > 0 {
            state.pending_error = Some(err);
            Ok(total)
        } else {
            Err(err)
        }
    }

    fn report(&self, err: &VfsError, delivered: u64) {
        tracing::warn!(path = %self.name, delivered, error = %err, "virtual_file.read_failed");
        if delivered > 0 {
            self.health.mark_partial(&self.name, err);
        } else {
            self.health.mark_corrupted(&self.name, err);
        }
    }

    fn ensure_reader(&self, state: &mut State, range: ServedRange, served_end: u64) -> Result<()> {
        if state.active.is_some() {
            return Ok(());
        }

        let start = state.current_offset;
        if let Some((end, stream)) = state.cache.take_at(start, served_end) {
            tracing::debug!(path = %self.name, start, end, "virtual_file.reader_reused");
            state.active = Some(ActiveReader {
                end,
                stream,
                delivered: 0,
                reused: true,
            });
            return Ok(());
        }

        let mut end = served_end.max(start);
        if !range.is_bounded() {
            let chunk = self.config.streaming_chunk.max(1);
            end = end.min(start.saturating_add(chunk - 1));
        }

        let stream = if self.meta.encryption.is_encrypted() {
            let adapter = self.encryption.as_ref().ok_or(VfsError::NoCipherConfigured)?;
            adapter.wrap(&self.meta, start, end, self.factory.as_ref())
        } else {
            self.factory.new_reader(&self.meta, start, end)
        }
        .inspect_err(|e| {
            tracing::warn!(path = %self.name, start, end, error = %e, "virtual_file.open_reader_failed");
        })?;

        let length = end - start + 1;
        tracing::info!(
            path = %self.name,
            range_start = start,
            range_end = end,
            range_length = length,
            current_offset = state.current_offset,
            "virtual_file.range_reader"
        );

        state.active = Some(ActiveReader {
            end,
            stream: Box::new(BoundedStream::new(stream, length)),
            delivered: 0,
            reused: false,
        });
        Ok(())
    }

    /// Seeking is not supported; open a new handle for another range.
    pub fn seek(&self, _pos: SeekFrom) -> Result<u64> {
        Err(VfsError::InvalidOperation("seek is not supported"))
    }

    pub fn read_at(&self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        Err(VfsError::PermissionDenied("read_at"))
    }

    pub fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(VfsError::PermissionDenied("write"))
    }

    pub fn truncate(&self, _size: u64) -> Result<()> {
        Err(VfsError::PermissionDenied("truncate"))
    }

    pub fn readdir(&self, _count: Option<usize>) -> Result<Vec<FileInfo>> {
        Err(VfsError::NotADirectory)
    }

    pub fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Release the active reader and every cached reader. Later calls do nothing.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.release_active();
        state.cache.clear();
        state.pending_error = None;
        tracing::debug!(path = %self.name, offset = state.current_offset, "virtual_file.closed");
        Ok(())
    }

    #[cfg(test)]
    fn cached_readers(&self) -> usize {
        self.lock().cache.len()
    }
}

/// Map a reader failure onto the streaming taxonomy.
/// Whether the stream already classified the failure as final.
fn is_terminal(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<VfsError>())
        .is_some_and(|e| {
            matches!(
                e,
                VfsError::PartialContent { .. }
                    | VfsError::CorruptedStream { .. }
                    | VfsError::TransportTruncated { .. }
                    | VfsError::Decode(_)
            )
        })
}

fn classify_read_error(err: io::Error, delivered: u64, window_len: u64) -> VfsError {
    if matches!(err.kind(), io::ErrorKind::TimedOut) {
        return VfsError::Io(err);
    }
    match VfsError::from_io(err) {
        err @ (VfsError::PartialContent { .. }
        | VfsError::CorruptedStream { .. }
        | VfsError::TransportTruncated { .. }) => err,
        other if delivered > 0 => VfsError::partial(delivered, window_len, other),
        other => VfsError::corrupted_stream(window_len, other),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFile")
            .field("name", &self.name)
            .field("file_size", &self.meta.file_size)
            .field("requested", &self.requested)
            .finish_non_exhaustive()
    }
}

impl Read for &VirtualFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VirtualFile::read(self, buf).map_err(io::Error::from)
    }
}

impl Read for VirtualFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VirtualFile::read(self, buf).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthEvent, RecordingHealthReporter};
    use crate::metadata::{Encryption, SegmentRecord};
    use crate::segmented::{ArticleFetcher, SegmentedReaderFactory};
    use crate::source::test_support::{MockFactory, MockStream};
    use crate::source::ReadStream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn data(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 253) as u8).collect()
    }

    fn file(len: usize) -> (Vec<u8>, Arc<MockFactory>, VirtualFile) {
        let bytes = data(len);
        let factory = Arc::new(MockFactory::new(bytes.clone()));
        let vf = VirtualFile::new("movies/a.mkv", FileMetadata::new(len as u64, vec![]), factory.clone());
        (bytes, factory, vf)
    }

    fn read_all(vf: &VirtualFile, chunk: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            match vf.read(&mut buf)? {
                0 => return Ok(out),
                n => out.extend_from_slice(&buf[..n]),
            }
        }
    }

    #[test]
    fn test_reads_whole_file() {
        let (bytes, factory, vf) = file(1000);
        assert_eq!(read_all(&vf, 64).unwrap(), bytes);
        assert_eq!(factory.calls(), [(0, 999)]);
        assert_eq!(vf.stat().size, 1000);
        assert_eq!(vf.position(), 1000);
        // Exhausted readers are closed right away.
        assert_eq!(factory.closes(), 1);
    }

    #[test]
    fn test_empty_file_reads_nothing() {
        let (_, factory, vf) = file(0);
        let mut buf = [0u8; 16];
        assert_eq!(vf.read(&mut buf).unwrap(), 0);
        assert_eq!(vf.stat().size, 0);
        assert_eq!(vf.range_info(), (0, None, 0));
        assert!(factory.calls().is_empty());
    }

    #[test]
    fn test_suffix_range() {
        let (bytes, _, vf) = file(1000);
        let vf = vf.with_range(Some(ByteRange::Suffix(200)));
        assert_eq!(vf.range_info(), (800, Some(999), 1000));
        assert_eq!(vf.stat().size, 200);
        assert_eq!(read_all(&vf, 4096).unwrap(), &bytes[800..]);

        let (bytes, _, vf) = file(100);
        let vf = vf.with_range(Some(ByteRange::Suffix(500)));
        assert_eq!(read_all(&vf, 4096).unwrap(), bytes);
    }

    #[test]
    fn test_closed_range_is_one_fetch() {
        let (bytes, factory, vf) = file(350);
        let vf = vf
            .with_config(StreamConfig::default().with_streaming_chunk(100))
            .with_range(Some(ByteRange::Closed { start: 0, end: 349 }));
        assert_eq!(read_all(&vf, 64).unwrap(), bytes);
        assert_eq!(factory.calls(), [(0, 349)]);
    }

    #[test]
    fn test_open_ended_reads_in_streaming_chunks() {
        let (bytes, factory, vf) = file(350);
        let vf = vf.with_config(StreamConfig::default().with_streaming_chunk(100));
        assert_eq!(read_all(&vf, 64).unwrap(), bytes);
        assert_eq!(factory.calls(), [(0, 99), (100, 199), (200, 299), (300, 349)]);

        let (bytes, factory, vf) = file(350);
        let vf = vf
            .with_config(StreamConfig::default().with_streaming_chunk(100))
            .with_range(Some(ByteRange::From(50)));
        assert_eq!(read_all(&vf, 1000).unwrap(), &bytes[50..]);
        assert_eq!(factory.calls(), [(50, 149), (150, 249), (250, 349)]);
    }

    #[test]
    fn test_read_fills_buffer_across_windows() {
        let (bytes, _, vf) = file(350);
        let vf = vf.with_config(StreamConfig::default().with_streaming_chunk(100));
        let mut buf = vec![0u8; 250];
        assert_eq!(vf.read(&mut buf).unwrap(), 250);
        assert_eq!(buf, &bytes[..250]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_, factory, vf) = file(1000);
        let mut buf = [0u8; 10];
        assert_eq!(vf.read(&mut buf).unwrap(), 10);

        vf.close().unwrap();
        vf.close().unwrap();
        assert_eq!(factory.closes(), 1);
        assert_eq!(vf.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_and_write_are_rejected() {
        let (_, _, vf) = file(10);
        assert!(matches!(vf.seek(SeekFrom::Start(5)), Err(VfsError::InvalidOperation(_))));
        assert!(matches!(vf.write(b"x"), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(vf.readdir(None), Err(VfsError::NotADirectory)));
    }

    #[test]
    fn test_encrypted_without_adapter() {
        let factory = Arc::new(MockFactory::new(data(10)));
        let mut meta = FileMetadata::new(10, vec![]);
        meta.encryption = Encryption::Aes256Cbc;
        let vf = VirtualFile::new("enc.bin", meta, factory.clone());

        assert!(matches!(vf.read(&mut [0u8; 4]), Err(VfsError::NoCipherConfigured)));
        assert!(factory.calls().is_empty());
    }

    #[test]
    fn test_failure_before_any_bytes_is_corrupted() {
        let mut factory = MockFactory::new(data(100));
        factory.fail_after = Some(0);
        let health = Arc::new(RecordingHealthReporter::new());
        let vf = VirtualFile::new("a.mkv", FileMetadata::new(100, vec![]), Arc::new(factory))
            .with_health_reporter(health.clone());

        let err = vf.read(&mut [0u8; 16]).unwrap_err();
        assert!(matches!(err, VfsError::CorruptedStream { total_expected: 100, .. }));
        let events = health.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, HealthEvent::Corrupted);
        assert_eq!(events[0].1, "a.mkv");
    }

    #[test]
    fn test_failure_after_bytes_returns_data_first() {
        let mut factory = MockFactory::new(data(100));
        factory.fail_after = Some(30);
        let health = Arc::new(RecordingHealthReporter::new());
        let vf = VirtualFile::new("a.mkv", FileMetadata::new(100, vec![]), Arc::new(factory))
            .with_health_reporter(health.clone());

        let mut buf = [0u8; 64];
        assert_eq!(vf.read(&mut buf).unwrap(), 30);
        let err = vf.read(&mut buf).unwrap_err();
        assert!(matches!(err, VfsError::PartialContent { bytes_read: 30, .. }));
        assert_eq!(health.events()[0].0, HealthEvent::Partial);
    }

    struct ShortArticles;

    impl ArticleFetcher for ShortArticles {
        fn fetch(&self, id: &str, _groups: &[String]) -> Result<BoxedStream> {
            // The first article stops after 400 of its 1000 bytes.
            let len = if id == "<0@x>" { 400 } else { 1000 };
            Ok(Box::new(MockStream::new(vec![7u8; len], Arc::new(AtomicUsize::new(0)))))
        }
    }

    #[test]
    fn test_short_segment_reports_partial() {
        let meta = FileMetadata::new(
            2000,
            vec![
                SegmentRecord::new("<0@x>", 1031).with_bounds(0, 999),
                SegmentRecord::new("<1@x>", 1031).with_bounds(1000, 1999),
            ],
        );
        let health = Arc::new(RecordingHealthReporter::new());
        let factory = Arc::new(SegmentedReaderFactory::new(Arc::new(ShortArticles)));
        let vf = VirtualFile::new("a.mkv", meta, factory).with_health_reporter(health.clone());

        let mut buf = vec![0u8; 4096];
        assert_eq!(vf.read(&mut buf).unwrap(), 400);
        let err = vf.read(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            VfsError::PartialContent { bytes_read: 400, total_expected: 1000, .. }
        ));

        let events = health.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, HealthEvent::Partial);
    }

    /// Times out once at `fail_at`, then reads normally.
    struct Flaky {
        inner: io::Cursor<Vec<u8>>,
        fail_at: u64,
        failed: bool,
    }

    impl Flaky {
        fn boxed(bytes: Vec<u8>, fail_at: u64) -> BoxedStream {
            Box::new(Self {
                inner: io::Cursor::new(bytes),
                fail_at,
                failed: false,
            })
        }
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.failed {
                return self.inner.read(buf);
            }
            let pos = self.inner.position();
            if pos >= self.fail_at {
                self.failed = true;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"));
            }
            let max = buf.len().min((self.fail_at - pos) as usize);
            self.inner.read(&mut buf[..max])
        }
    }

    impl ReadStream for Flaky {}

    #[test]
    fn test_retry_reuses_parked_reader() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let factory = crate::source::ReaderFactoryFn(move |_: &FileMetadata, start: u64, end: u64| -> Result<BoxedStream> {
            counter.fetch_add(1, Ordering::SeqCst);
            let bytes: Vec<u8> = (start..=end).map(|b| b as u8).collect();
            Ok(Flaky::boxed(bytes, 0))
        });
        let vf = VirtualFile::new("a.mkv", FileMetadata::new(50, vec![]), Arc::new(factory));

        let mut buf = [0u8; 100];
        // Deadlines surface unchanged.
        match vf.read(&mut buf) {
            Err(VfsError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(vf.cached_readers(), 1);

        assert_eq!(vf.read(&mut buf).unwrap(), 50);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(vf.cached_readers(), 0);
    }

    #[test]
    fn test_retry_mid_window_reuses_parked_reader() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&opened);
        let factory = crate::source::ReaderFactoryFn(move |_: &FileMetadata, start: u64, end: u64| -> Result<BoxedStream> {
            log.lock().unwrap().push((start, end));
            let bytes: Vec<u8> = (start..=end).map(|b| b as u8).collect();
            let fail_at = if start == 0 { 10 } else { u64::MAX };
            Ok(Flaky::boxed(bytes, fail_at))
        });
        let health = Arc::new(RecordingHealthReporter::new());
        let vf = VirtualFile::new("a.mkv", FileMetadata::new(100, vec![]), Arc::new(factory))
            .with_health_reporter(health.clone())
            .with_config(StreamConfig::default().with_streaming_chunk(40));

        let mut buf = [0u8; 100];
        assert_eq!(vf.read(&mut buf).unwrap(), 10);
        assert!(matches!(vf.read(&mut buf), Err(VfsError::Io(ref e)) if e.kind() == io::ErrorKind::TimedOut));
        assert_eq!(health.events()[0].0, HealthEvent::Partial);

        let mut rest = Vec::new();
        (&vf).read_to_end(&mut rest).unwrap();
        assert_eq!(rest, (10..100u8).collect::<Vec<_>>());
        assert_eq!(*opened.lock().unwrap(), [(0, 39), (40, 79), (80, 99)]);
    }

    /// The first fetch of `<0@x>` is cut short, later fetches are whole.
    #[derive(Default)]
    struct HealingArticles {
        fetched: Mutex<Vec<String>>,
    }

    impl ArticleFetcher for HealingArticles {
        fn fetch(&self, id: &str, _groups: &[String]) -> Result<BoxedStream> {
            let mut fetched = self.fetched.lock().unwrap();
            let first = !fetched.iter().any(|f| f == id);
            fetched.push(id.to_string());
            let len = if id == "<0@x>" && first { 400 } else { 1000 };
            Ok(Box::new(MockStream::new(vec![7u8; len], Arc::new(AtomicUsize::new(0)))))
        }
    }

    #[test]
    fn test_retry_after_partial_opens_fresh_window() {
        let meta = FileMetadata::new(
            2000,
            vec![
                SegmentRecord::new("<0@x>", 1031).with_bounds(0, 999),
                SegmentRecord::new("<1@x>", 1031).with_bounds(1000, 1999),
            ],
        );
        let fetcher = Arc::new(HealingArticles::default());
        let health = Arc::new(RecordingHealthReporter::new());
        let factory = Arc::new(SegmentedReaderFactory::new(fetcher.clone()));
        let vf = VirtualFile::new("a.mkv", meta, factory).with_health_reporter(health.clone());

        let mut buf = vec![0u8; 4096];
        assert_eq!(vf.read(&mut buf).unwrap(), 400);
        assert!(matches!(vf.read(&mut buf), Err(VfsError::PartialContent { bytes_read: 400, .. })));
        assert_eq!(vf.cached_readers(), 0);

        let mut rest = Vec::new();
        (&vf).read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![7u8; 1600]);
        assert_eq!(vf.position(), 2000);

        let refetched = fetcher.fetched.lock().unwrap().iter().filter(|id| *id == "<0@x>").count();
        assert_eq!(refetched, 2);
        let events = health.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, HealthEvent::Partial);
    }

    /// Times out once, then reports end of data.
    struct Stalled {
        failed: bool,
    }

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            if self.failed {
                return Ok(0);
            }
            self.failed = true;
            Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"))
        }
    }

    impl ReadStream for Stalled {}

    #[test]
    fn test_exhausted_parked_reader_is_replaced() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let factory = crate::source::ReaderFactoryFn(move |_: &FileMetadata, start: u64, end: u64| -> Result<BoxedStream> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Box::new(Stalled { failed: false }));
            }
            let bytes: Vec<u8> = (start..=end).map(|b| b as u8).collect();
            Ok(Box::new(MockStream::new(bytes, Arc::new(AtomicUsize::new(0)))))
        });
        let health = Arc::new(RecordingHealthReporter::new());
        let vf = VirtualFile::new("a.mkv", FileMetadata::new(50, vec![]), Arc::new(factory))
            .with_health_reporter(health.clone());

        let mut buf = [0u8; 100];
        assert!(matches!(vf.read(&mut buf), Err(VfsError::Io(ref e)) if e.kind() == io::ErrorKind::TimedOut));
        assert_eq!(vf.cached_readers(), 1);

        assert_eq!(vf.read(&mut buf).unwrap(), 50);
        assert_eq!(&buf[..50], (0..50u8).collect::<Vec<_>>());
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(health.events().len(), 1);
    }

    #[test]
    fn test_cache_disabled_closes_parked_reader() {
        let mut factory = MockFactory::new(data(100));
        factory.fail_after = Some(0);
        let factory = Arc::new(factory);
        let vf = VirtualFile::new("a.mkv", FileMetadata::new(100, vec![]), factory.clone())
            .with_config(StreamConfig::default().with_reader_cache_capacity(0));

        assert!(vf.read(&mut [0u8; 8]).is_err());
        assert_eq!(vf.cached_readers(), 0);
        assert_eq!(factory.closes(), 1);
    }

    #[test]
    fn test_reader_cache_evicts_oldest() {
        let closes = Arc::new(AtomicUsize::new(0));
        let stream = || -> BoxedStream { Box::new(MockStream::new(vec![0u8; 4], Arc::clone(&closes))) };

        let mut cache = ReaderCache::new(2);
        cache.park((0, 9), stream());
        cache.park((10, 19), stream());
        cache.park((20, 29), stream());
        assert_eq!(cache.len(), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(cache.take((0, 9)).is_none());
        assert!(cache.take((20, 29)).is_some());

        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_io_read_and_descriptor() {
        let (bytes, _, vf) = file(300);
        let vf = vf.with_virtual_path("/movies/a.mkv");
        let mut out = Vec::new();
        (&vf).read_to_end(&mut out).unwrap();
        assert_eq!(out, bytes);

        let desc = vf.descriptor();
        assert_eq!(desc.virtual_path, "/movies/a.mkv");
        assert_eq!(desc.normalized_path, "movies/a.mkv");
        assert_eq!(desc.file_size, 300);
        assert_eq!(vf.stat().name, "a.mkv");
    }

    #[test]
    fn test_handle_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VirtualFile>();
    }
}
