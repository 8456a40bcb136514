//! In-memory metadata store.

use super::{parent_path, FileMetadata, MetadataStore, ROOT_PATH};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<String, FileMetadata>,
    dirs: BTreeSet<String>,
}

/// Metadata store kept in process memory.
///
/// Inserting a file implicitly creates its parent directories.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    tree: RwLock<Tree>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&self, path: &str, meta: FileMetadata) {
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        add_ancestors(&mut tree.dirs, parent_path(path));
        tree.files.insert(path.to_string(), meta);
    }

    pub fn create_directory(&self, path: &str) {
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        add_ancestors(&mut tree.dirs, path);
    }

    pub fn remove_file(&self, path: &str) -> Option<FileMetadata> {
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.files.remove(path)
    }
}

fn add_ancestors(dirs: &mut BTreeSet<String>, mut dir: &str) {
    while dir != ROOT_PATH && !dir.is_empty() {
        if !dirs.insert(dir.to_string()) {
            break;
        }
        dir = parent_path(dir);
    }
}

fn is_direct_child(parent: &str, candidate: &str) -> Option<String> {
    if candidate == parent {
        return None;
    }
    (parent_path(candidate) == parent).then(|| {
        candidate
            .rsplit('/')
            .next()
            .unwrap_or(candidate)
            .to_string()
    })
}

impl MetadataStore for MemoryMetadataStore {
    fn file_exists(&self, path: &str) -> bool {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        tree.files.contains_key(path)
    }

    fn directory_exists(&self, path: &str) -> bool {
        if path == ROOT_PATH {
            return true;
        }
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        tree.dirs.contains(path)
    }

    fn read_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tree.files.get(path).cloned())
    }

    fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tree
            .files
            .keys()
            .filter_map(|candidate| is_direct_child(path, candidate))
            .collect())
    }

    fn list_subdirectories(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tree
            .dirs
            .iter()
            .filter_map(|candidate| is_direct_child(path, candidate))
            .collect())
    }
}
