//! aircard: a client for WiFi@SDCF wireless SD/CF storage cards
//!
//! Cards expose their raw block device over a small UDP protocol. This
//! crate discovers cards on the broadcast domain, reads 512-byte sectors
//! with authenticated command-4 requests, and interprets the bytes as an
//! MBR-partitioned FAT32 volume: directory listing, file download, and a
//! polling directory watcher.
//!
//! The layers compose bottom-up: [`net::UdpTransport`] owns the receive
//! socket, [`net::Discovery`] finds cards, [`net::Card`] reads sectors,
//! [`mbr`] locates the partition, [`fat32::Fat32Volume`] walks the
//! filesystem, and [`vfs`] wraps it all in directory/file handles.

pub mod device;
pub mod error;
pub mod fat32;
pub mod mbr;
pub mod net;
pub mod vfs;

// Re-export the main types
pub use device::{BlockDevice, SECTOR_SIZE};
pub use error::{Error, Result};
pub use fat32::{BiosParameterBlock, Fat32Volume, FileInfo};
pub use mbr::{FileSystemKind, PartitionInfo};
pub use net::{Card, CardInfo, CardKind, CardOptions, Discovery, DiscoveryOptions, UdpTransport};
pub use vfs::{Directory, DirectoryWatcher, File, FileSystemAdapter, Node, WatchEvent};
