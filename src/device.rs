//! Sector-level read access to a block device
//!
//! The FAT32 layer is written against this trait rather than against a
//! network card directly, so a volume can be backed by anything that can
//! produce 512-byte sectors (a `Card`, or an in-memory image in tests).

use crate::error::Result;

/// Sector size of the WiFi@SDCF wire protocol
pub const SECTOR_SIZE: usize = 512;

/// Read-only access to a device addressed in 512-byte LBAs
pub trait BlockDevice: Send + Sync {
    /// Read `count` sectors starting at `lba`, returned concatenated.
    fn read_blocks(&self, lba: u32, count: u16) -> Result<Vec<u8>>;

    /// Largest `count` a single `read_blocks` call may carry.
    ///
    /// Callers with bigger reads must split them into batches of at most
    /// this many sectors.
    fn max_blocks_per_read(&self) -> u16;
}
