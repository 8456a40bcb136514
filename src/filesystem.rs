//! Path resolution over a metadata store.
//!
//! [`MetadataFs`] is the entry point of the crate: it turns a requested path
//! and optional byte range into either a [`VirtualFile`] handle or a
//! [`VirtualDirectory`] listing.
//!
//! ## Example
//!
//! ```rust,ignore
//! use nzb_stream::{ByteRange, Entry, MetadataFs};
//! use std::io::Read;
//!
//! let fs = MetadataFs::builder()
//!     .store(store)
//!     .reader_factory(factory)
//!     .build()?;
//!
//! let range = ByteRange::parse("bytes=0-1023")?;
//! if let Entry::File(file) = fs.open("/movies/title.mkv", Some(range))? {
//!     let mut head = Vec::new();
//!     (&file).read_to_end(&mut head)?;
//!     file.close()?;
//! }
//! ```

use crate::config::StreamConfig;
use crate::directory::{FileInfo, VirtualDirectory};
use crate::encryption::EncryptionAdapter;
use crate::error::{Result, VfsError};
use crate::health::{HealthReporter, NoopHealthReporter};
use crate::metadata::{parent_path, FileDescriptor, MetadataStore, ROOT_PATH};
use crate::range::ByteRange;
use crate::source::ReaderFactory;
use crate::virtual_file::VirtualFile;
use std::sync::Arc;

/// Result of [`MetadataFs::open`].
#[derive(Debug)]
pub enum Entry {
    File(VirtualFile),
    Directory(VirtualDirectory),
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    pub fn stat(&self) -> FileInfo {
        match self {
            Self::File(file) => file.stat(),
            Self::Directory(dir) => dir.stat(),
        }
    }

    /// The file handle, or [`VfsError::IsDirectory`].
    pub fn into_file(self) -> Result<VirtualFile> {
        match self {
            Self::File(file) => Ok(file),
            Self::Directory(dir) => Err(VfsError::IsDirectory(dir.name().to_string())),
        }
    }

    /// The directory handle, or [`VfsError::NotADirectory`].
    pub fn into_directory(self) -> Result<VirtualDirectory> {
        match self {
            Self::Directory(dir) => Ok(dir),
            Self::File(_) => Err(VfsError::NotADirectory),
        }
    }
}

/// Builder for [`MetadataFs`].
#[derive(Default)]
pub struct MetadataFsBuilder {
    store: Option<Arc<dyn MetadataStore>>,
    factory: Option<Arc<dyn ReaderFactory>>,
    health: Option<Arc<dyn HealthReporter>>,
    encryption: Option<Arc<dyn EncryptionAdapter>>,
    config: StreamConfig,
}

impl MetadataFsBuilder {
    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reader_factory(mut self, factory: Arc<dyn ReaderFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn health_reporter(mut self, health: Arc<dyn HealthReporter>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn encryption(mut self, adapter: Arc<dyn EncryptionAdapter>) -> Self {
        self.encryption = Some(adapter);
        self
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Fails with [`VfsError::NotConfigured`] when the store or the reader
    /// factory is missing.
    pub fn build(self) -> Result<MetadataFs> {
        Ok(MetadataFs {
            store: self.store.ok_or(VfsError::NotConfigured("metadata store"))?,
            factory: self.factory.ok_or(VfsError::NotConfigured("reader factory"))?,
            health: self.health.unwrap_or_else(|| Arc::new(NoopHealthReporter)),
            encryption: self.encryption,
            config: self.config,
        })
    }
}

/// Read-only virtual filesystem backed by a [`MetadataStore`].
///
/// Handles returned by [`MetadataFs::open`] share the collaborators but no
/// mutable state.
pub struct MetadataFs {
    store: Arc<dyn MetadataStore>,
    factory: Arc<dyn ReaderFactory>,
    health: Arc<dyn HealthReporter>,
    encryption: Option<Arc<dyn EncryptionAdapter>>,
    config: StreamConfig,
}

impl MetadataFs {
    pub fn builder() -> MetadataFsBuilder {
        MetadataFsBuilder::default()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Resolve `path` to a file handle or a directory.
    ///
    /// Corrupted files fail here, before any segment is fetched. A path that
    /// is neither a file nor a directory resolves to an empty directory when
    /// one of its ancestors exists.
    pub fn open(&self, path: &str, range: Option<ByteRange>) -> Result<Entry> {
        let normalized = normalize_path(path);

        if self.store.directory_exists(&normalized) {
            return Ok(Entry::Directory(self.directory(path, &normalized)));
        }

        if !self.store.file_exists(&normalized) {
            if self.is_valid_empty_directory(&normalized) {
                return Ok(Entry::Directory(self.directory(path, &normalized)));
            }
            return Err(VfsError::NotFound(path.to_string()));
        }

        let meta = self
            .store
            .read_file_metadata(&normalized)?
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        if meta.is_corrupted() {
            tracing::warn!(path = %normalized, "filesystem.open_corrupted");
            return Err(VfsError::Corrupted(normalized));
        }

        let file = VirtualFile::new(&normalized, meta, Arc::clone(&self.factory))
            .with_virtual_path(path)
            .with_range(range)
            .with_health_reporter(Arc::clone(&self.health))
            .with_encryption(self.encryption.clone())
            .with_config(self.config.clone());
        Ok(Entry::File(file))
    }

    /// Like [`MetadataFs::open`], rejecting directories.
    pub fn open_file(&self, path: &str, range: Option<ByteRange>) -> Result<VirtualFile> {
        self.open(path, range)?.into_file()
    }

    /// Metadata summary of a file without opening any stream.
    pub fn describe(&self, path: &str) -> Result<FileDescriptor> {
        let normalized = normalize_path(path);
        if !self.store.file_exists(&normalized) {
            return Err(VfsError::NotFound(path.to_string()));
        }
        let meta = self
            .store
            .read_file_metadata(&normalized)?
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        Ok(FileDescriptor::from_metadata(path, &normalized, &meta))
    }

    fn directory(&self, path: &str, normalized: &str) -> VirtualDirectory {
        VirtualDirectory::new(path, normalized, Arc::clone(&self.store))
    }

    fn is_valid_empty_directory(&self, normalized: &str) -> bool {
        if normalized == ROOT_PATH {
            return true;
        }
        let mut current = normalized;
        loop {
            let parent = parent_path(current);
            if self.store.directory_exists(parent) {
                return true;
            }
            if parent == ROOT_PATH || parent == current {
                return false;
            }
            current = parent;
        }
    }
}

impl std::fmt::Debug for MetadataFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataFs")
            .field("encryption", &self.encryption.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Normalize a requested path to the store's form.
///
/// Empty and `.` components are dropped, `..` pops a component (never above
/// the root), and the leading slash is removed. The root is `/`.
///
/// ```
/// use nzb_stream::normalize_path;
///
/// assert_eq!(normalize_path("/movies//a/../title.mkv"), "movies/title.mkv");
/// assert_eq!(normalize_path("/.."), "/");
/// ```
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ROOT_PATH.to_string()
    } else {
        parts.join("/")
    }
}
