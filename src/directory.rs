//! Listing-only handle over a virtual directory.

use crate::error::{Result, VfsError};
use crate::metadata::{join_path, MetadataStore, ROOT_PATH};
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Name, size and timestamp of a directory entry or open handle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

impl FileInfo {
    fn directory(name: impl Into<String>, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified,
            is_dir: true,
        }
    }
}

/// A directory of the virtual tree.
///
/// Entries are read from the metadata store on every call; nothing is
/// cached on the handle.
pub struct VirtualDirectory {
    name: String,
    path: String,
    store: Arc<dyn MetadataStore>,
}

impl VirtualDirectory {
    /// `name` is the path as requested, `path` its normalized form.
    pub fn new(name: &str, path: &str, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized path inside the metadata store.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Subdirectories first, then files, stopping after `count` entries.
    ///
    /// `None` or `Some(0)` lists everything. Files whose metadata cannot be
    /// read are left out rather than failing the listing.
    pub fn readdir(&self, count: Option<usize>) -> Result<Vec<FileInfo>> {
        let limit = count.filter(|&n| n > 0).unwrap_or(usize::MAX);
        let mut infos = Vec::new();

        for dir in self.store.list_subdirectories(&self.path)? {
            if infos.len() >= limit {
                return Ok(infos);
            }
            infos.push(FileInfo::directory(dir, None));
        }

        for file in self.store.list_directory(&self.path)? {
            if infos.len() >= limit {
                break;
            }
            let meta = match self.store.read_file_metadata(&join_path(&self.path, &file)) {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(dir = %self.path, file = %file, error = %e, "directory.skip_entry");
                    continue;
                }
            };
            infos.push(FileInfo {
                name: file,
                size: meta.file_size,
                modified: meta.modified(),
                is_dir: false,
            });
        }

        Ok(infos)
    }

    pub fn readdir_names(&self, count: Option<usize>) -> Result<Vec<String>> {
        Ok(self
            .readdir(count)?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    pub fn stat(&self) -> FileInfo {
        let name = if self.path == ROOT_PATH {
            ROOT_PATH
        } else {
            self.path.rsplit('/').next().unwrap_or(&self.path)
        };
        FileInfo::directory(name, Some(Utc::now()))
    }

    pub fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(VfsError::IsDirectory(self.name.clone()))
    }

    pub fn read_at(&self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        Err(VfsError::PermissionDenied("directory is not readable"))
    }

    pub fn seek(&self, _pos: SeekFrom) -> Result<u64> {
        Err(VfsError::InvalidOperation("seek on a directory"))
    }

    pub fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(VfsError::PermissionDenied("read-only filesystem"))
    }

    pub fn truncate(&self, _size: u64) -> Result<()> {
        Err(VfsError::PermissionDenied("read-only filesystem"))
    }

    pub fn sync(&self) -> Result<()> {
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for VirtualDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDirectory")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FileMetadata, MemoryMetadataStore};

    /// Store whose metadata lookups fail for one path.
    struct Unreadable {
        inner: MemoryMetadataStore,
        broken: &'static str,
    }

    impl MetadataStore for Unreadable {
        fn file_exists(&self, path: &str) -> bool {
            self.inner.file_exists(path)
        }
        fn directory_exists(&self, path: &str) -> bool {
            self.inner.directory_exists(path)
        }
        fn read_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
            if path == self.broken {
                return Err(VfsError::metadata("truncated record"));
            }
            self.inner.read_file_metadata(path)
        }
        fn list_directory(&self, path: &str) -> Result<Vec<String>> {
            self.inner.list_directory(path)
        }
        fn list_subdirectories(&self, path: &str) -> Result<Vec<String>> {
            self.inner.list_subdirectories(path)
        }
    }

    fn store() -> Arc<MemoryMetadataStore> {
        let store = MemoryMetadataStore::new();
        let mut meta = FileMetadata::new(1234, vec![]);
        meta.modified_at = 1_700_000_000;
        store.insert_file("movies/a.mkv", meta);
        store.insert_file("movies/b.mkv", FileMetadata::new(10, vec![]));
        store.insert_file("movies/extras/c.mkv", FileMetadata::new(5, vec![]));
        Arc::new(store)
    }

    #[test]
    fn test_readdir_lists_directories_first() {
        let dir = VirtualDirectory::new("/movies", "movies", store());
        let infos = dir.readdir(None).unwrap();

        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].name, "extras");
        assert!(infos[0].is_dir);
        assert_eq!(infos[1].name, "a.mkv");
        assert_eq!(infos[1].size, 1234);
        assert_eq!(infos[1].modified.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(!infos[1].is_dir);
        assert_eq!(infos[2].name, "b.mkv");
    }

    #[test]
    fn test_readdir_count_truncates() {
        let dir = VirtualDirectory::new("movies", "movies", store());
        assert_eq!(dir.readdir_names(Some(1)).unwrap(), ["extras"]);
        assert_eq!(dir.readdir_names(Some(2)).unwrap(), ["extras", "a.mkv"]);
        assert_eq!(dir.readdir(Some(0)).unwrap().len(), 3);
    }

    #[test]
    fn test_readdir_skips_unreadable_files() {
        let inner = MemoryMetadataStore::new();
        inner.insert_file("a.mkv", FileMetadata::new(1, vec![]));
        inner.insert_file("b.mkv", FileMetadata::new(2, vec![]));
        let store = Arc::new(Unreadable {
            inner,
            broken: "a.mkv",
        });

        let dir = VirtualDirectory::new("/", ROOT_PATH, store);
        assert_eq!(dir.readdir_names(None).unwrap(), ["b.mkv"]);
    }

    #[test]
    fn test_directory_rejects_io() {
        let dir = VirtualDirectory::new("/movies", "movies", store());
        assert!(matches!(dir.read(&mut [0u8; 4]), Err(VfsError::IsDirectory(_))));
        assert!(matches!(dir.read_at(&mut [0u8; 4], 0), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(dir.write(b"x"), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(dir.truncate(0), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(dir.seek(SeekFrom::Start(0)), Err(VfsError::InvalidOperation(_))));
        assert!(dir.sync().is_ok());
        assert!(dir.close().is_ok());
    }

    #[test]
    fn test_stat_uses_base_name() {
        let dir = VirtualDirectory::new("/movies/extras", "movies/extras", store());
        let info = dir.stat();
        assert_eq!(info.name, "extras");
        assert!(info.is_dir);
        assert_eq!(info.size, 0);

        let root = VirtualDirectory::new("/", ROOT_PATH, store());
        assert_eq!(root.stat().name, "/");
    }
}
