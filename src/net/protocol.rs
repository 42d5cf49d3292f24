//! WiFi@SDCF wire protocol
//!
//! Every datagram starts with the ASCII tag `FC1307`, a direction byte
//! (1 host-to-card, 2 card-to-host) and a command byte. Multi-byte fields
//! are big-endian. Frame building and parsing live here and stay free of
//! socket concerns so they can be tested against byte vectors.

use std::net::Ipv4Addr;

use regex::Regex;

use crate::error::{Error, Result};

/// Protocol tag opening every datagram
pub const HEADER: &[u8; 6] = b"FC1307";

/// UDP port the card listens on for probes and read requests
pub const CARD_PORT: u16 = 24387;

/// UDP port the host binds for all card-to-host traffic
pub const LOCAL_PORT: u16 = 24388;

/// Discovery probe payload, broadcast to [`CARD_PORT`]
pub const PROBE_PAYLOAD: &[u8; 3] = b"KTC";

/// Direction byte: host to card
pub const DIRECTION_REQUEST: u8 = 1;
/// Direction byte: card to host
pub const DIRECTION_RESPONSE: u8 = 2;

/// Command byte: card info (discovery response)
pub const CMD_CARD_INFO: u8 = 1;
/// Command byte: block read
pub const CMD_READ_DATA: u8 = 4;

/// Most sectors a single read request may ask for
pub const MAX_TRANSFER_SECTORS: u16 = 14;

/// First transfer id a fresh card handle uses
pub const FIRST_TRANSFER_ID: u32 = 93;

/// Fixed length of a block-read request datagram
pub const READ_REQUEST_LEN: usize = 52;

/// Offset of the data payload in a block-read response
const READ_RESPONSE_DATA_OFFSET: usize = 24;

/// Shortest card-info response: fixed fields up to and including subverLen
const CARD_INFO_MIN_LEN: usize = 43;

pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

/// Card media type reported during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Sd,
    Cf,
}

impl std::fmt::Display for CardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sd => write!(f, "SD"),
            Self::Cf => write!(f, "CF"),
        }
    }
}

/// Identity of a discovered card, parsed from a card-info response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
    pub kind: CardKind,
    /// Firmware version, `"X.Y.Z"` or `"Unknown"`
    pub version: String,
    /// Advisory block count; wraps for cards of 2 TiB and above
    pub capacity_blocks: u32,
    pub ap_mode: bool,
    pub subver: String,
}

impl CardInfo {
    /// MAC in the conventional `aa:bb:cc:dd:ee:ff` form
    pub fn mac_string(&self) -> String {
        let m = &self.mac;
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// One block-read response datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub lba: u32,
    pub lba_offset: u16,
    pub flags: u16,
    pub transfer_id: u32,
    pub data: Vec<u8>,
}

fn check_frame(payload: &[u8], direction: u8, cmd: u8) -> Result<()> {
    if payload.len() < 8 {
        return Err(Error::malformed(format!(
            "datagram too short ({} bytes)",
            payload.len()
        )));
    }
    if &payload[0..6] != HEADER {
        return Err(Error::malformed("bad header tag"));
    }
    if payload[6] != direction {
        return Err(Error::malformed(format!(
            "unexpected direction {}",
            payload[6]
        )));
    }
    if payload[7] != cmd {
        return Err(Error::malformed(format!("unexpected command {}", payload[7])));
    }
    Ok(())
}

/// Parse a command-1 card-info response
pub fn parse_card_info(payload: &[u8]) -> Result<CardInfo> {
    check_frame(payload, DIRECTION_RESPONSE, CMD_CARD_INFO)?;
    if payload.len() < CARD_INFO_MIN_LEN {
        return Err(Error::malformed(format!(
            "card info too short ({} bytes)",
            payload.len()
        )));
    }

    let ip = Ipv4Addr::new(payload[14], payload[15], payload[16], payload[17]);
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&payload[18..24]);

    let kind = match &payload[24..26] {
        b"SD" => CardKind::Sd,
        b"CF" => CardKind::Cf,
        other => {
            return Err(Error::malformed(format!(
                "unknown card type {:?}",
                String::from_utf8_lossy(other)
            )))
        }
    };

    let version = parse_version(&payload[26..37]);

    let capacity_blocks = u32::from_be_bytes([payload[37], payload[38], payload[39], payload[40]]);
    let ap_mode = payload[41] == 1;

    let subver_len = payload[42] as usize;
    if payload.len() < CARD_INFO_MIN_LEN + subver_len {
        return Err(Error::malformed("subver field truncated"));
    }
    let subver = String::from_utf8_lossy(&payload[43..43 + subver_len]).to_string();

    Ok(CardInfo {
        ip,
        mac,
        kind,
        version,
        capacity_blocks,
        ap_mode,
        subver,
    })
}

/// Extract `X.Y.Z` from a zero-padded `Ver X.Y.Z` field
fn parse_version(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let pattern = Regex::new(r"Ver (\d+\.\d+\.\d+)").expect("version pattern compiles");
    match pattern.captures(&text) {
        Some(caps) => caps[1].to_string(),
        None => "Unknown".to_string(),
    }
}

/// Build a command-4 block-read request
pub fn encode_read_request(
    lba_start: u32,
    count: u16,
    username: &str,
    password: &str,
    transfer_id: u32,
) -> Vec<u8> {
    let mut frame = vec![0u8; READ_REQUEST_LEN];
    frame[0..6].copy_from_slice(HEADER);
    frame[6] = DIRECTION_REQUEST;
    frame[7] = CMD_READ_DATA;
    frame[8..12].copy_from_slice(&lba_start.to_be_bytes());
    frame[12..14].copy_from_slice(&count.to_be_bytes());

    let user = username.as_bytes();
    let pass = password.as_bytes();
    let user_len = user.len().min(16);
    let pass_len = pass.len().min(16);
    frame[14] = user_len as u8;
    frame[15] = pass_len as u8;
    frame[16..16 + user_len].copy_from_slice(&user[..user_len]);
    frame[32..32 + pass_len].copy_from_slice(&pass[..pass_len]);

    frame[48..52].copy_from_slice(&transfer_id.to_be_bytes());
    frame
}

/// Parse a command-4 block-read response
pub fn parse_read_response(payload: &[u8]) -> Result<ReadResponse> {
    check_frame(payload, DIRECTION_RESPONSE, CMD_READ_DATA)?;
    if payload.len() < READ_RESPONSE_DATA_OFFSET {
        return Err(Error::malformed(format!(
            "read response too short ({} bytes)",
            payload.len()
        )));
    }

    let lba = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
    let lba_offset = u16::from_be_bytes([payload[12], payload[13]]);
    let flags = u16::from_be_bytes([payload[14], payload[15]]);
    let n_bytes = u16::from_be_bytes([payload[16], payload[17]]) as usize;
    let transfer_id = u32::from_be_bytes([payload[18], payload[19], payload[20], payload[21]]);

    if payload.len() < READ_RESPONSE_DATA_OFFSET + n_bytes {
        return Err(Error::malformed(format!(
            "read response claims {} data bytes, {} present",
            n_bytes,
            payload.len() - READ_RESPONSE_DATA_OFFSET
        )));
    }
    let data = payload[READ_RESPONSE_DATA_OFFSET..READ_RESPONSE_DATA_OFFSET + n_bytes].to_vec();

    Ok(ReadResponse {
        lba,
        lba_offset,
        flags,
        transfer_id,
        data,
    })
}

/// Build a command-4 response datagram. Test helper for fake cards.
pub fn encode_read_response(
    lba: u32,
    lba_offset: u16,
    flags: u16,
    transfer_id: u32,
    data: &[u8],
) -> Vec<u8> {
    let mut frame = vec![0u8; READ_RESPONSE_DATA_OFFSET + data.len()];
    frame[0..6].copy_from_slice(HEADER);
    frame[6] = DIRECTION_RESPONSE;
    frame[7] = CMD_READ_DATA;
    frame[8..12].copy_from_slice(&lba.to_be_bytes());
    frame[12..14].copy_from_slice(&lba_offset.to_be_bytes());
    frame[14..16].copy_from_slice(&flags.to_be_bytes());
    frame[16..18].copy_from_slice(&(data.len() as u16).to_be_bytes());
    frame[18..22].copy_from_slice(&transfer_id.to_be_bytes());
    frame[READ_RESPONSE_DATA_OFFSET..].copy_from_slice(data);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 48-byte card-info vector: 192.168.0.123, aa:bb:cc:dd:ee:ff, SD,
    /// Ver 1.2.3, 32768 blocks, AP mode on, subver "abc"
    pub(crate) fn sample_card_info() -> Vec<u8> {
        let mut frame = vec![0u8; 48];
        frame[0..6].copy_from_slice(HEADER);
        frame[6] = DIRECTION_RESPONSE;
        frame[7] = CMD_CARD_INFO;
        frame[14..18].copy_from_slice(&[0xC0, 0xA8, 0x00, 0x7B]);
        frame[18..24].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        frame[24..26].copy_from_slice(b"SD");
        frame[26..35].copy_from_slice(b"Ver 1.2.3");
        frame[37..41].copy_from_slice(&[0x00, 0x00, 0x80, 0x00]);
        frame[41] = 0x01;
        frame[42] = 0x03;
        frame[43..46].copy_from_slice(b"abc");
        frame
    }

    #[test]
    fn card_info_parses_all_fields() {
        let info = parse_card_info(&sample_card_info()).unwrap();
        assert_eq!(info.ip, Ipv4Addr::new(192, 168, 0, 123));
        assert_eq!(info.mac_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(info.kind, CardKind::Sd);
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.capacity_blocks, 32768);
        assert!(info.ap_mode);
        assert_eq!(info.subver, "abc");
    }

    #[test]
    fn card_info_without_version_marker_is_unknown() {
        let mut frame = sample_card_info();
        frame[26..35].copy_from_slice(b"v1.2.3\0\0\0");
        let info = parse_card_info(&frame).unwrap();
        assert_eq!(info.version, "Unknown");
    }

    #[test]
    fn card_info_rejects_bad_header() {
        let mut frame = sample_card_info();
        frame[0] = b'X';
        assert!(parse_card_info(&frame).is_err());
    }

    #[test]
    fn card_info_rejects_wrong_command() {
        let mut frame = sample_card_info();
        frame[7] = CMD_READ_DATA;
        assert!(parse_card_info(&frame).is_err());
    }

    #[test]
    fn card_info_rejects_truncated_subver() {
        let mut frame = sample_card_info();
        frame[42] = 0x20;
        assert!(parse_card_info(&frame).is_err());
    }

    #[test]
    fn read_request_layout() {
        let frame = encode_read_request(0, 1, "admin", "admin", 93);
        assert_eq!(frame.len(), READ_REQUEST_LEN);
        assert_eq!(&frame[0..6], HEADER);
        assert_eq!(frame[6], DIRECTION_REQUEST);
        assert_eq!(frame[7], CMD_READ_DATA);
        assert_eq!(&frame[8..12], &[0, 0, 0, 0]);
        assert_eq!(&frame[12..14], &[0, 1]);
        assert_eq!(frame[14], 5);
        assert_eq!(frame[15], 5);
        assert_eq!(&frame[16..21], b"admin");
        assert_eq!(&frame[21..32], &[0u8; 11]);
        assert_eq!(&frame[32..37], b"admin");
        assert_eq!(&frame[48..52], &[0, 0, 0, 93]);
    }

    #[test]
    fn read_request_clips_long_credentials() {
        let frame = encode_read_request(9, 14, "averylongusername!", "p", 1);
        assert_eq!(frame[14], 16);
        assert_eq!(&frame[16..32], b"averylongusernam");
        assert_eq!(frame[15], 1);
    }

    #[test]
    fn read_response_roundtrip() {
        let data = [0x55u8; 512];
        let frame = encode_read_response(2048, 3, 0x18, 1234, &data);
        let parsed = parse_read_response(&frame).unwrap();
        assert_eq!(parsed.lba, 2048);
        assert_eq!(parsed.lba_offset, 3);
        assert_eq!(parsed.flags, 0x18);
        assert_eq!(parsed.transfer_id, 1234);
        assert_eq!(parsed.data, data);
    }

    #[test]
    fn read_response_rejects_short_data() {
        let mut frame = encode_read_response(0, 0, 0x18, 7, &[1, 2, 3, 4]);
        frame.truncate(frame.len() - 2);
        assert!(parse_read_response(&frame).is_err());
    }
}
