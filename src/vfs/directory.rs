//! Directory handles with entry caching

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::fat32::FileInfo;
use crate::vfs::file::File;
use crate::vfs::FileSystemAdapter;

/// A cached child of a directory
#[derive(Clone)]
pub enum Node {
    Directory(Directory),
    File(File),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::Directory(dir) => dir.name(),
            Self::File(file) => file.name(),
        }
    }

    pub fn info(&self) -> &FileInfo {
        match self {
            Self::Directory(dir) => dir.info(),
            Self::File(file) => file.info(),
        }
    }
}

/// Lazy handle to one directory of a mounted filesystem
#[derive(Clone)]
pub struct Directory {
    adapter: Arc<dyn FileSystemAdapter>,
    info: FileInfo,
    cache: Arc<Mutex<Option<Vec<Node>>>>,
}

impl Directory {
    /// Handle to the filesystem root.
    pub fn root(adapter: Arc<dyn FileSystemAdapter>) -> Self {
        let info = adapter.root_entry();
        Self::new(adapter, info)
    }

    pub(crate) fn new(adapter: Arc<dyn FileSystemAdapter>, info: FileInfo) -> Self {
        Self {
            adapter,
            info,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Children of this directory. The first listing is cached; pass
    /// `refresh` to drop the cache and hit the filesystem again.
    pub fn list(&self, refresh: bool) -> Result<Vec<Node>> {
        if !refresh {
            if let Some(cached) = self.cache.lock().unwrap().as_ref() {
                return Ok(cached.clone());
            }
        }

        let entries = self.adapter.list_entry(&self.info)?;
        let nodes: Vec<Node> = entries
            .into_iter()
            .map(|entry| {
                if entry.is_directory {
                    Node::Directory(Directory::new(Arc::clone(&self.adapter), entry))
                } else {
                    Node::File(File::new(Arc::clone(&self.adapter), entry))
                }
            })
            .collect();

        *self.cache.lock().unwrap() = Some(nodes.clone());
        Ok(nodes)
    }

    /// Find a child file by name.
    pub fn get_file(&self, name: &str) -> Result<File> {
        for node in self.list(false)? {
            if let Node::File(file) = node {
                if self.adapter.compare_names(file.name(), name) {
                    return Ok(file);
                }
            }
        }
        Err(Error::file_not_found(name))
    }

    /// Find a child directory by name.
    pub fn get_directory(&self, name: &str) -> Result<Directory> {
        for node in self.list(false)? {
            if let Node::Directory(dir) = node {
                if self.adapter.compare_names(dir.name(), name) {
                    return Ok(dir);
                }
            }
        }
        Err(Error::directory_not_found(name))
    }
}
