//! Lazy directory/file view over a filesystem adapter

pub mod directory;
pub mod file;
pub mod watcher;

pub use directory::{Directory, Node};
pub use file::File;
pub use watcher::{DirectoryWatcher, WatchEvent, CHECK_INTERVAL};

use crate::error::Result;
use crate::fat32::FileInfo;

/// Capability set a filesystem exposes to the object model.
///
/// Small and stable on purpose; FAT32 is the first implementation.
pub trait FileSystemAdapter: Send + Sync {
    /// Synthetic entry for the filesystem root
    fn root_entry(&self) -> FileInfo;

    /// List a directory by absolute path
    fn list_path(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// List the directory an entry points at
    fn list_entry(&self, info: &FileInfo) -> Result<Vec<FileInfo>>;

    /// Fetch a file's full contents
    fn file_content(&self, info: &FileInfo) -> Result<Vec<u8>>;

    /// Name equality as this filesystem defines it
    fn compare_names(&self, a: &str, b: &str) -> bool;
}
