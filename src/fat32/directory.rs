//! Directory entry stream parsing
//!
//! A directory is a flat run of 32-byte records: LFN fragments collect
//! in front of the short entry they name, 0xE5 marks a free slot, and the
//! first 0x00 lead byte ends the directory.

use super::lfn::parse_lfn_entry;
use super::{timestamp, FileInfo, ATTR_DIRECTORY, DIR_ENTRY_SIZE, LFN_ATTRIBUTE};

/// Parse every entry in a directory's cluster data.
pub fn parse_directory_entries(data: &[u8]) -> Vec<FileInfo> {
    let mut results = Vec::new();
    let mut lfn_parts: Vec<String> = Vec::new();

    for entry in data.chunks_exact(DIR_ENTRY_SIZE) {
        if entry[0] == 0x00 {
            break;
        }
        if entry[0] == 0xE5 {
            // Free slot; any collected fragments belonged to it
            lfn_parts.clear();
            continue;
        }
        if entry[11] == LFN_ATTRIBUTE {
            if let Some(fragment) = parse_lfn_entry(entry) {
                // Fragments arrive highest-order first; keep the buffer in
                // name order by prepending
                lfn_parts.insert(0, fragment.text());
            }
            continue;
        }

        let name = if lfn_parts.is_empty() {
            short_name(entry)
        } else {
            let long = lfn_parts.join("");
            lfn_parts.clear();
            long
        };

        let size = u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]);
        let is_directory = entry[11] & ATTR_DIRECTORY != 0;
        let cluster_high = u16::from_le_bytes([entry[20], entry[21]]) as u32;
        let cluster_low = u16::from_le_bytes([entry[26], entry[27]]) as u32;
        let created = timestamp::decode(
            u16::from_le_bytes([entry[16], entry[17]]),
            u16::from_le_bytes([entry[14], entry[15]]),
        );
        let modified = timestamp::decode(
            u16::from_le_bytes([entry[24], entry[25]]),
            u16::from_le_bytes([entry[22], entry[23]]),
        );

        results.push(FileInfo {
            name,
            size,
            is_directory,
            first_cluster: (cluster_high << 16) | cluster_low,
            created,
            modified,
        });
    }
    results
}

/// Build a name from the 8.3 fields of a short entry.
fn short_name(entry: &[u8]) -> String {
    let mut base_bytes = [0u8; 8];
    base_bytes.copy_from_slice(&entry[0..8]);
    if base_bytes[0] == 0x05 {
        // KANJI escape: 0x05 stands in for a leading 0xE5
        base_bytes[0] = 0xE5;
    }

    let base: String = base_bytes.iter().map(|&b| b as char).collect();
    let ext: String = entry[8..11].iter().map(|&b| b as char).collect();
    let base = base.trim_end().to_string();
    let ext = ext.trim_end();

    if ext.is_empty() {
        base
    } else {
        format!("{}.{}", base, ext)
    }
}

/// Build a short directory entry. Test helper shared with volume tests.
#[cfg(test)]
pub(crate) fn make_short_entry(
    name83: &[u8; 11],
    attr: u8,
    first_cluster: u32,
    size: u32,
) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[0..11].copy_from_slice(name83);
    entry[11] = attr;
    entry[20..22].copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
    entry[26..28].copy_from_slice(&(first_cluster as u16).to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}
