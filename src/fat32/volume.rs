//! FAT32 volume reader over a block device
//!
//! Opening a volume reads the partition's boot sector and keeps the parsed
//! geometry; everything after that is cluster arithmetic on top of batched
//! sector reads. The FAT itself is never cached: a next-cluster lookup
//! reads the single FAT sector holding the entry, because the full FAT of
//! a large card is far bigger than one 14-sector transfer.

use std::sync::Arc;

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::fat32::directory::parse_directory_entries;
use crate::fat32::{BiosParameterBlock, FatType, FileInfo, FAT32_EOC};
use crate::mbr::PartitionInfo;
use crate::vfs::FileSystemAdapter;

pub struct Fat32Volume {
    device: Arc<dyn BlockDevice>,
    partition: PartitionInfo,
    bpb: BiosParameterBlock,
    /// Protocol LBAs per BPB sector (1 for the usual 512-byte sectors)
    lbas_per_sector: u32,
}

impl Fat32Volume {
    /// Read and validate the partition's boot sector.
    pub fn open(device: Arc<dyn BlockDevice>, partition: PartitionInfo) -> Result<Self> {
        let boot_sector = device.read_blocks(partition.start_lba, 1)?;
        let bpb = BiosParameterBlock::parse(&boot_sector)?;

        log::info!(
            "FAT32 volume at LBA {}: {} B/sector, {} sectors/cluster, {} reserved, {} FATs of {} sectors, root cluster {}",
            partition.start_lba,
            bpb.bytes_per_sector,
            bpb.sectors_per_cluster,
            bpb.reserved_sectors,
            bpb.num_fats,
            bpb.fat_size_32,
            bpb.root_cluster
        );

        if bpb.fat_type() != FatType::Fat32 {
            log::warn!(
                "cluster count classifies this volume as {:?}, treating it as FAT32 anyway",
                bpb.fat_type()
            );
        }
        if bpb.root_entry_count != 0 {
            log::warn!(
                "root_entry_count is {} on a FAT32 volume, expected 0",
                bpb.root_entry_count
            );
        }

        let lbas_per_sector = bpb.bytes_per_sector as u32 / SECTOR_SIZE as u32;
        Ok(Self {
            device,
            partition,
            bpb,
            lbas_per_sector,
        })
    }

    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    /// Synthetic entry for the root directory
    pub fn root_info(&self) -> FileInfo {
        FileInfo {
            name: "/".to_string(),
            size: 0,
            is_directory: true,
            first_cluster: self.bpb.root_cluster,
            created: chrono::NaiveDateTime::UNIX_EPOCH,
            modified: chrono::NaiveDateTime::UNIX_EPOCH,
        }
    }

    /// Read `count` BPB sectors at `rel_sector` (volume-relative),
    /// splitting into transfers the device accepts.
    fn read_sectors(&self, rel_sector: u32, count: u32) -> Result<Vec<u8>> {
        let max_lbas = self.device.max_blocks_per_read() as u32;
        let mut lba = self.partition.start_lba + rel_sector * self.lbas_per_sector;
        let mut remaining = count * self.lbas_per_sector;

        let mut data = Vec::with_capacity(remaining as usize * SECTOR_SIZE);
        while remaining > 0 {
            let batch = remaining.min(max_lbas);
            let chunk = self.device.read_blocks(lba, batch as u16)?;
            data.extend_from_slice(&chunk);
            lba += batch;
            remaining -= batch;
        }
        Ok(data)
    }

    fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>> {
        if cluster < 2 {
            return Err(Error::invalid_volume(format!(
                "cluster {} is below the first data cluster",
                cluster
            )));
        }
        self.read_sectors(
            self.bpb.first_sector_of_cluster(cluster),
            self.bpb.sectors_per_cluster as u32,
        )
    }

    /// Look up the FAT entry for `cluster` with a single-sector read.
    fn next_cluster(&self, cluster: u32) -> Result<u32> {
        let bps = self.bpb.bytes_per_sector as u32;
        let fat_offset = cluster * 4;
        let fat_sector = fat_offset / bps;
        let within = (fat_offset % bps) as usize;

        let sector = self.read_sectors(self.bpb.fat_start_sector() + fat_sector, 1)?;
        let raw = u32::from_le_bytes([
            sector[within],
            sector[within + 1],
            sector[within + 2],
            sector[within + 3],
        ]);
        Ok(raw & 0x0FFF_FFFF)
    }

    fn is_chain_end(cluster: u32) -> bool {
        cluster < 2 || cluster >= FAT32_EOC
    }

    /// List the directory at `path`, descending from the root.
    pub fn list_folder(&self, path: &str) -> Result<Vec<FileInfo>> {
        let path = path.to_uppercase();
        let mut cluster = self.bpb.root_cluster;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let entries = self.list_cluster_chain(cluster)?;
            let child = entries
                .iter()
                .find(|e| e.is_directory && self.compare_names(&e.name, segment))
                .ok_or_else(|| Error::directory_not_found(path.clone()))?;
            cluster = child.first_cluster;
        }
        self.list_cluster_chain(cluster)
    }

    /// List the directory an entry points at.
    pub fn list_entry(&self, info: &FileInfo) -> Result<Vec<FileInfo>> {
        self.list_cluster_chain(info.first_cluster)
    }

    /// Read the whole directory chain and parse its entries. Directories
    /// spanning several clusters list completely.
    fn list_cluster_chain(&self, start_cluster: u32) -> Result<Vec<FileInfo>> {
        let mut data = Vec::new();
        let mut cluster = start_cluster;
        while !Self::is_chain_end(cluster) {
            data.extend_from_slice(&self.read_cluster(cluster)?);
            cluster = self.next_cluster(cluster)?;
        }
        Ok(parse_directory_entries(&data))
    }

    /// Fetch a file's contents by walking its cluster chain.
    pub fn file_content(&self, info: &FileInfo) -> Result<Vec<u8>> {
        let mut content = Vec::with_capacity(info.size as usize);
        let mut remaining = info.size as usize;
        let mut cluster = info.first_cluster;

        while !Self::is_chain_end(cluster) && remaining > 0 {
            let data = self.read_cluster(cluster)?;
            let take = remaining.min(data.len());
            content.extend_from_slice(&data[..take]);
            remaining -= take;
            if remaining == 0 {
                break;
            }
            cluster = self.next_cluster(cluster)?;
        }

        log::debug!(
            "read {} of {} bytes for '{}'",
            content.len(),
            info.size,
            info.name
        );
        Ok(content)
    }

    /// FAT name comparison: ASCII case-insensitive.
    pub fn compare_names(&self, a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }
}

impl FileSystemAdapter for Fat32Volume {
    fn root_entry(&self) -> FileInfo {
        self.root_info()
    }

    fn list_path(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.list_folder(path)
    }

    fn list_entry(&self, info: &FileInfo) -> Result<Vec<FileInfo>> {
        Fat32Volume::list_entry(self, info)
    }

    fn file_content(&self, info: &FileInfo) -> Result<Vec<u8>> {
        Fat32Volume::file_content(self, info)
    }

    fn compare_names(&self, a: &str, b: &str) -> bool {
        Fat32Volume::compare_names(self, a, b)
    }
}
