//! Master Boot Record partition table
//!
//! The table sits at byte 446 of sector 0: four 16-byte entries, each with
//! a type code, a start LBA and a length in sectors (both little-endian).

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::{Error, Result};

/// Byte offset of the partition table inside sector 0
const PARTITION_TABLE_OFFSET: usize = 446;

/// Filesystem tag derived from the MBR partition type code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemKind {
    Fat32,
    /// Type 0x07 is shared by NTFS and exFAT; the BPB would disambiguate
    NtfsExfat,
    Linux,
    Extended,
    Unknown,
}

impl std::fmt::Display for FileSystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fat32 => write!(f, "FAT32"),
            Self::NtfsExfat => write!(f, "NTFS/exFAT"),
            Self::Linux => write!(f, "Linux"),
            Self::Extended => write!(f, "Extended"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

impl FileSystemKind {
    fn from_type_code(code: u8) -> Self {
        match code {
            0x0B | 0x0C => Self::Fat32,
            0x07 => Self::NtfsExfat,
            0x83 => Self::Linux,
            0x05 | 0x0F => Self::Extended,
            _ => Self::Unknown,
        }
    }
}

/// One populated partition table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub start_lba: u32,
    /// Length in sectors
    pub length: u32,
    pub kind: FileSystemKind,
}

/// Read sector 0 and return the populated partitions in table order.
pub fn read_partitions(device: &dyn BlockDevice) -> Result<Vec<PartitionInfo>> {
    let sector = device.read_blocks(0, 1)?;
    parse_partition_table(&sector)
}

/// Parse the partition table out of a raw MBR sector.
pub fn parse_partition_table(sector: &[u8]) -> Result<Vec<PartitionInfo>> {
    if sector.len() < SECTOR_SIZE {
        return Err(Error::invalid_volume(format!(
            "MBR sector is {} bytes, need {}",
            sector.len(),
            SECTOR_SIZE
        )));
    }

    if sector[510] != 0x55 || sector[511] != 0xAA {
        // Some card firmwares ship images without the signature; keep
        // going but leave a trace.
        log::warn!("MBR is missing the 0x55AA boot signature");
    }

    let mut partitions = Vec::new();
    for index in 0..4 {
        let entry = &sector[PARTITION_TABLE_OFFSET + index * 16..PARTITION_TABLE_OFFSET + (index + 1) * 16];
        let type_code = entry[4];
        if type_code == 0 {
            continue;
        }
        let start_lba = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
        let length = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]);
        let kind = FileSystemKind::from_type_code(type_code);
        log::debug!(
            "partition {}: type 0x{:02X} ({}) start {} length {}",
            index,
            type_code,
            kind,
            start_lba,
            length
        );
        partitions.push(PartitionInfo {
            start_lba,
            length,
            kind,
        });
    }
    Ok(partitions)
}
