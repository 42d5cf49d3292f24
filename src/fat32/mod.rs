//! FAT32 on-disk structures and the volume reader

pub mod directory;
pub mod lfn;
pub mod timestamp;
pub mod volume;

pub use volume::Fat32Volume;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const LFN_ATTRIBUTE: u8 = 0x0F;
pub(crate) const ATTR_DIRECTORY: u8 = 0x10;

/// First FAT32 end-of-chain value; anything at or above terminates a chain
pub const FAT32_EOC: u32 = 0x0FFF_FFF8;

/// A parsed directory entry: one file or subdirectory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Long file name when LFN entries precede the record, 8.3 otherwise
    pub name: String,
    pub size: u32,
    pub is_directory: bool,
    pub first_cluster: u32,
    pub created: NaiveDateTime,
    pub modified: NaiveDateTime,
}

/// FAT32 BIOS Parameter Block, parsed from the partition's first sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    /// Non-zero only on FAT12/16 volumes
    pub root_entry_count: u16,
    pub total_sectors_32: u32,
    pub fat_size_32: u32,
    pub root_cluster: u32,
}

/// FAT family, derived from the cluster count. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl BiosParameterBlock {
    /// Parse the BPB fields out of a raw boot sector.
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < 512 {
            return Err(Error::invalid_volume(format!(
                "boot sector is {} bytes, need 512",
                sector.len()
            )));
        }

        let bpb = Self {
            bytes_per_sector: u16::from_le_bytes([sector[11], sector[12]]),
            sectors_per_cluster: sector[13],
            reserved_sectors: u16::from_le_bytes([sector[14], sector[15]]),
            num_fats: sector[16],
            root_entry_count: u16::from_le_bytes([sector[17], sector[18]]),
            total_sectors_32: u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]),
            fat_size_32: u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]),
            root_cluster: u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]),
        };

        if !matches!(bpb.bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(Error::invalid_volume(format!(
                "bytes_per_sector {} out of range",
                bpb.bytes_per_sector
            )));
        }
        if bpb.sectors_per_cluster == 0 || !bpb.sectors_per_cluster.is_power_of_two() {
            return Err(Error::invalid_volume(format!(
                "sectors_per_cluster {} out of range",
                bpb.sectors_per_cluster
            )));
        }
        if bpb.num_fats == 0 || bpb.num_fats > 4 {
            return Err(Error::invalid_volume(format!(
                "num_fats {} out of range",
                bpb.num_fats
            )));
        }
        if bpb.fat_size_32 == 0 {
            return Err(Error::invalid_volume("fat_size_32 is zero"));
        }

        let cluster_bytes = bpb.bytes_per_sector as u32 * bpb.sectors_per_cluster as u32;
        if cluster_bytes > 32768 {
            log::warn!(
                "cluster size {} bytes exceeds the 32 KiB portability limit",
                cluster_bytes
            );
        }

        Ok(bpb)
    }

    /// Sectors occupied by the FAT12/16 root directory region (0 on FAT32)
    fn root_dir_sectors(&self) -> u32 {
        let bps = self.bytes_per_sector as u32;
        (self.root_entry_count as u32 * DIR_ENTRY_SIZE as u32 + bps - 1) / bps
    }

    /// First sector of the data region, relative to the volume start
    pub fn first_data_sector(&self) -> u32 {
        self.reserved_sectors as u32
            + self.num_fats as u32 * self.fat_size_32
            + self.root_dir_sectors()
    }

    /// First sector of the FAT, relative to the volume start
    pub fn fat_start_sector(&self) -> u32 {
        self.reserved_sectors as u32
    }

    /// First sector of a cluster, relative to the volume start
    pub fn first_sector_of_cluster(&self, cluster: u32) -> u32 {
        (cluster - 2) * self.sectors_per_cluster as u32 + self.first_data_sector()
    }

    pub fn cluster_bytes(&self) -> usize {
        self.bytes_per_sector as usize * self.sectors_per_cluster as usize
    }

    /// Classify by cluster count per the FAT specification thresholds.
    pub fn fat_type(&self) -> FatType {
        let data_sectors = self.total_sectors_32.saturating_sub(self.first_data_sector());
        let count_of_clusters = data_sectors / self.sectors_per_cluster as u32;
        if count_of_clusters < 4085 {
            FatType::Fat12
        } else if count_of_clusters < 65525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }
}

/// Build a boot sector from BPB fields. Test helper shared with volume tests.
#[cfg(test)]
pub(crate) fn make_boot_sector(
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    fat_size_32: u32,
    root_cluster: u32,
    total_sectors_32: u32,
) -> Vec<u8> {
    let mut sector = vec![0u8; 512];
    sector[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
    sector[13] = sectors_per_cluster;
    sector[14..16].copy_from_slice(&reserved_sectors.to_le_bytes());
    sector[16] = num_fats;
    sector[32..36].copy_from_slice(&total_sectors_32.to_le_bytes());
    sector[36..40].copy_from_slice(&fat_size_32.to_le_bytes());
    sector[44..48].copy_from_slice(&root_cluster.to_le_bytes());
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_sector(
        bytes_per_sector: u16,
        sectors_per_cluster: u8,
        reserved_sectors: u16,
        num_fats: u8,
        fat_size_32: u32,
        root_cluster: u32,
        total_sectors_32: u32,
    ) -> Vec<u8> {
        make_boot_sector(
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            fat_size_32,
            root_cluster,
            total_sectors_32,
        )
    }

    #[test]
    fn derived_geometry() {
        let n = 100;
        let sector = boot_sector(512, 8, 32, 2, n, 2, 1_000_000);
        let bpb = BiosParameterBlock::parse(&sector).unwrap();
        assert_eq!(bpb.first_data_sector(), 32 + 2 * n);
        assert_eq!(bpb.first_sector_of_cluster(2), bpb.first_data_sector());
        assert_eq!(bpb.first_sector_of_cluster(3), bpb.first_data_sector() + 8);
        assert_eq!(bpb.fat_start_sector(), 32);
        assert_eq!(bpb.cluster_bytes(), 4096);
    }

    #[test]
    fn root_entry_count_contributes_sectors() {
        let mut sector = boot_sector(512, 8, 32, 2, 100, 2, 1_000_000);
        sector[17..19].copy_from_slice(&512u16.to_le_bytes());
        let bpb = BiosParameterBlock::parse(&sector).unwrap();
        // 512 entries * 32 bytes = 32 sectors of legacy root directory
        assert_eq!(bpb.first_data_sector(), 32 + 200 + 32);
    }

    #[test]
    fn rejects_odd_sector_size() {
        let sector = boot_sector(513, 8, 32, 2, 100, 2, 0);
        assert!(BiosParameterBlock::parse(&sector).is_err());
    }

    #[test]
    fn rejects_non_power_of_two_cluster() {
        let sector = boot_sector(512, 3, 32, 2, 100, 2, 0);
        assert!(BiosParameterBlock::parse(&sector).is_err());
    }

    #[test]
    fn rejects_zero_fat_size() {
        let sector = boot_sector(512, 8, 32, 2, 0, 2, 0);
        assert!(BiosParameterBlock::parse(&sector).is_err());
    }

    #[test]
    fn classifies_small_volumes_as_fat12() {
        let sector = boot_sector(512, 1, 1, 1, 1, 2, 100);
        let bpb = BiosParameterBlock::parse(&sector).unwrap();
        assert_eq!(bpb.fat_type(), FatType::Fat12);
    }

    #[test]
    fn classifies_large_volumes_as_fat32() {
        let sector = boot_sector(512, 8, 32, 2, 8192, 2, 8_000_000);
        let bpb = BiosParameterBlock::parse(&sector).unwrap();
        assert_eq!(bpb.fat_type(), FatType::Fat32);
    }
}
