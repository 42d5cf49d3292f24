//! File handles

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::error::Result;
use crate::fat32::FileInfo;
use crate::vfs::FileSystemAdapter;

/// Handle to one file of a mounted filesystem
#[derive(Clone)]
pub struct File {
    adapter: Arc<dyn FileSystemAdapter>,
    info: FileInfo,
}

impl File {
    pub(crate) fn new(adapter: Arc<dyn FileSystemAdapter>, info: FileInfo) -> Self {
        Self { adapter, info }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn size(&self) -> u32 {
        self.info.size
    }

    pub fn created(&self) -> NaiveDateTime {
        self.info.created
    }

    pub fn modified(&self) -> NaiveDateTime {
        self.info.modified
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Fetch the full file contents from the card.
    pub fn read_content(&self) -> Result<Vec<u8>> {
        self.adapter.file_content(&self.info)
    }

    /// Fetch the contents and write them to a local path.
    /// Returns the number of bytes written.
    pub fn download<P: AsRef<Path>>(&self, local_path: P) -> Result<usize> {
        let content = self.read_content()?;
        std::fs::write(&local_path, &content)?;
        log::info!(
            "downloaded '{}' ({} bytes) to {}",
            self.info.name,
            content.len(),
            local_path.as_ref().display()
        );
        Ok(content.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    /// Scriptable adapter for object-model tests
    pub(crate) struct MockFs {
        listing: Mutex<Vec<FileInfo>>,
        contents: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl MockFs {
        pub fn new(listing: Vec<FileInfo>) -> Self {
            Self {
                listing: Mutex::new(listing),
                contents: Mutex::new(Vec::new()),
            }
        }

        pub fn set_listing(&self, listing: Vec<FileInfo>) {
            *self.listing.lock().unwrap() = listing;
        }

        pub fn set_content(&self, name: &str, content: Vec<u8>) {
            self.contents
                .lock()
                .unwrap()
                .push((name.to_string(), content));
        }
    }

    impl FileSystemAdapter for MockFs {
        fn root_entry(&self) -> FileInfo {
            entry("/", 0, true)
        }

        fn list_path(&self, _path: &str) -> crate::error::Result<Vec<FileInfo>> {
            Ok(self.listing.lock().unwrap().clone())
        }

        fn list_entry(&self, _info: &FileInfo) -> crate::error::Result<Vec<FileInfo>> {
            Ok(self.listing.lock().unwrap().clone())
        }

        fn file_content(&self, info: &FileInfo) -> crate::error::Result<Vec<u8>> {
            self.contents
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| name == &info.name)
                .map(|(_, content)| content.clone())
                .ok_or_else(|| Error::file_not_found(info.name.clone()))
        }

        fn compare_names(&self, a: &str, b: &str) -> bool {
            a.eq_ignore_ascii_case(b)
        }
    }

    pub(crate) fn entry(name: &str, size: u32, is_directory: bool) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size,
            is_directory,
            first_cluster: 0,
            created: NaiveDateTime::UNIX_EPOCH,
            modified: NaiveDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn read_content_delegates_to_the_adapter() {
        let fs = Arc::new(MockFs::new(vec![entry("data.bin", 4, false)]));
        fs.set_content("data.bin", vec![1, 2, 3, 4]);
        let file = File::new(Arc::clone(&fs) as Arc<dyn FileSystemAdapter>, entry("data.bin", 4, false));
        assert_eq!(file.read_content().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn download_writes_the_buffer_and_reports_length() {
        let fs = Arc::new(MockFs::new(Vec::new()));
        fs.set_content("out.bin", b"payload".to_vec());
        let file = File::new(
            Arc::clone(&fs) as Arc<dyn FileSystemAdapter>,
            entry("out.bin", 7, false),
        );

        let dir = std::env::temp_dir().join("aircard-file-test");
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("out.bin");
        let written = file.download(&target).unwrap();
        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        let _ = std::fs::remove_file(&target);
    }
}
