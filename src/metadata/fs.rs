//! Directory-backed metadata store.
//!
//! Layout under the root:
//!
//! ```text
//! root/
//! ├── movies/
//! │   ├── title.mkv.meta      JSON-encoded FileMetadata
//! │   └── extras/
//! └── shows/
//! ```

use super::{FileMetadata, MetadataStore, ROOT_PATH};
use crate::error::{Result, VfsError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const META_EXTENSION: &str = ".meta";

/// Metadata store reading `<path>.meta` JSON files beneath a root directory.
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem directory backing a virtual directory.
    pub fn directory_path(&self, virtual_path: &str) -> PathBuf {
        if virtual_path == ROOT_PATH {
            self.root.clone()
        } else {
            self.root.join(virtual_path.trim_matches('/'))
        }
    }

    fn metadata_path(&self, virtual_path: &str) -> PathBuf {
        let mut path = self.directory_path(virtual_path).into_os_string();
        path.push(META_EXTENSION);
        PathBuf::from(path)
    }

    /// Persist a record, creating parent directories as needed.
    pub fn write_file_metadata(&self, virtual_path: &str, meta: &FileMetadata) -> Result<()> {
        let path = self.metadata_path(virtual_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| VfsError::metadata(format!("encode {virtual_path}: {e}")))?;
        fs::write(&path, json)?;
        Ok(())
    }

    fn read_dir_names(&self, virtual_path: &str, want_dirs: bool) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.directory_path(virtual_path)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VfsError::metadata(format!(
                    "read directory {virtual_path}: {e}"
                )))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            let name = entry.file_name().to_string_lossy().into_owned();
            if want_dirs && is_dir {
                names.push(name);
            } else if !want_dirs && !is_dir {
                if let Some(stem) = name.strip_suffix(META_EXTENSION) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl MetadataStore for FsMetadataStore {
    fn file_exists(&self, path: &str) -> bool {
        self.metadata_path(path).is_file()
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.directory_path(path).is_dir()
    }

    fn read_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        let bytes = match fs::read(self.metadata_path(path)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| VfsError::metadata(format!("decode {path}: {e}")))
    }

    fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        self.read_dir_names(path, false)
    }

    fn list_subdirectories(&self, path: &str) -> Result<Vec<String>> {
        self.read_dir_names(path, true)
    }
}
