//! Connected card handle and the block-read protocol
//!
//! A `Card` issues command-4 read requests and waits for the matching
//! response on the shared transport. Correlation is by transfer id only;
//! responses may arrive out of order. Each outstanding read owns a
//! capacity-1 completion slot that is resolved exactly once, either by the
//! dispatcher or by the timeout.

use std::collections::HashMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::fat32::volume::Fat32Volume;
use crate::mbr::{self, FileSystemKind, PartitionInfo};
use crate::net::protocol::{
    self, CardInfo, CMD_READ_DATA, DEFAULT_PASSWORD, DEFAULT_USERNAME, FIRST_TRANSFER_ID,
    MAX_TRANSFER_SECTORS,
};
use crate::net::transport::UdpTransport;

/// Default deadline for a single block read
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-card connection settings
#[derive(Debug, Clone)]
pub struct CardOptions {
    pub username: String,
    pub password: String,
    /// UDP port the card listens on
    pub command_port: u16,
    pub read_timeout: Duration,
}

impl Default for CardOptions {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            command_port: protocol::CARD_PORT,
            read_timeout: READ_TIMEOUT,
        }
    }
}

type PendingReads = Arc<Mutex<HashMap<u32, SyncSender<Vec<u8>>>>>;

/// Live handle to one card on the network
pub struct Card {
    ip: Ipv4Addr,
    info: Option<CardInfo>,
    options: CardOptions,
    transport: Arc<UdpTransport>,
    next_transfer_id: AtomicU32,
    pending: PendingReads,
}

impl Card {
    /// Connect to a card by address.
    pub fn connect(
        ip: Ipv4Addr,
        transport: Arc<UdpTransport>,
        options: CardOptions,
    ) -> Arc<Self> {
        Self::new(ip, None, transport, options)
    }

    /// Connect to a card discovered on the broadcast domain.
    pub fn from_info(
        info: CardInfo,
        transport: Arc<UdpTransport>,
        options: CardOptions,
    ) -> Arc<Self> {
        Self::new(info.ip, Some(info), transport, options)
    }

    fn new(
        ip: Ipv4Addr,
        info: Option<CardInfo>,
        transport: Arc<UdpTransport>,
        options: CardOptions,
    ) -> Arc<Self> {
        let pending: PendingReads = Arc::new(Mutex::new(HashMap::new()));

        let dispatch_pending = Arc::clone(&pending);
        transport.subscribe(
            ip,
            Arc::new(move |payload, _remote| {
                dispatch_read_response(&dispatch_pending, payload);
            }),
        );

        Arc::new(Self {
            ip,
            info,
            options,
            transport,
            next_transfer_id: AtomicU32::new(FIRST_TRANSFER_ID),
            pending,
        })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Discovery identity, when this handle came from a card-info response
    pub fn info(&self) -> Option<&CardInfo> {
        self.info.as_ref()
    }

    /// Read `count` sectors starting at `lba_start`.
    ///
    /// Blocks until the matching response arrives or the configured
    /// timeout expires; a timeout carries the unanswered request bytes.
    pub fn read_binary_data(&self, lba_start: u32, count: u16) -> Result<Vec<u8>> {
        if count < 1 || count > MAX_TRANSFER_SECTORS {
            log::warn!(
                "read of {} sectors is outside the card limit of {}, attempting anyway",
                count,
                MAX_TRANSFER_SECTORS
            );
        }

        let transfer_id = self.next_transfer_id.fetch_add(1, Ordering::SeqCst);
        let request = protocol::encode_read_request(
            lba_start,
            count,
            &self.options.username,
            &self.options.password,
            transfer_id,
        );

        let (slot, completion) = mpsc::sync_channel::<Vec<u8>>(1);
        self.pending.lock().unwrap().insert(transfer_id, slot);

        // Requests go out on a transient socket; the card answers to the
        // well-known local port the transport owns.
        let send_result = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
            socket.send_to(&request, (self.ip, self.options.command_port))
        });
        if let Err(err) = send_result {
            self.pending.lock().unwrap().remove(&transfer_id);
            return Err(err.into());
        }

        match completion.recv_timeout(self.options.read_timeout) {
            Ok(data) => Ok(data),
            Err(_) => {
                self.pending.lock().unwrap().remove(&transfer_id);
                log::warn!(
                    "read tid={} lba={} count={} timed out after {:?}",
                    transfer_id,
                    lba_start,
                    count,
                    self.options.read_timeout
                );
                Err(Error::timeout(request))
            }
        }
    }

    /// Parse the card's MBR partition table.
    pub fn partitions(&self) -> Result<Vec<PartitionInfo>> {
        mbr::read_partitions(self)
    }

    /// Open the FAT32 volume on the given partition.
    pub fn filesystem(self: &Arc<Self>, partition_index: usize) -> Result<Fat32Volume> {
        let partitions = self.partitions()?;
        if partition_index >= partitions.len() {
            return Err(Error::PartitionOutOfRange {
                index: partition_index,
                count: partitions.len(),
            });
        }
        let partition = partitions[partition_index].clone();
        if partition.kind != FileSystemKind::Fat32 {
            return Err(Error::UnsupportedFileSystem {
                detected: partition.kind,
            });
        }
        Fat32Volume::open(Arc::clone(self) as Arc<dyn BlockDevice>, partition)
    }

    /// Detach from the transport and drop any outstanding completion slots.
    pub fn shutdown(&self) {
        self.transport.unsubscribe(self.ip);
        self.pending.lock().unwrap().clear();
    }
}

impl Drop for Card {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BlockDevice for Card {
    fn read_blocks(&self, lba: u32, count: u16) -> Result<Vec<u8>> {
        self.read_binary_data(lba, count)
    }

    fn max_blocks_per_read(&self) -> u16 {
        MAX_TRANSFER_SECTORS
    }
}

/// Complete the pending slot matching an inbound command-4 datagram.
fn dispatch_read_response(pending: &Mutex<HashMap<u32, SyncSender<Vec<u8>>>>, payload: &[u8]) {
    if payload.len() < 8 || payload[7] != CMD_READ_DATA {
        return;
    }
    let response = match protocol::parse_read_response(payload) {
        Ok(response) => response,
        Err(err) => {
            log::warn!("dropping bad read response: {}", err);
            return;
        }
    };

    // Remove-then-send keeps completion single-shot: a duplicate datagram
    // finds no slot and falls through to the log below.
    let slot = pending.lock().unwrap().remove(&response.transfer_id);
    match slot {
        Some(slot) => {
            if slot.try_send(response.data).is_err() {
                log::debug!(
                    "reader for tid={} already gone, dropping response",
                    response.transfer_id
                );
            }
        }
        None => log::debug!(
            "no pending read for tid={}, dropping response",
            response.transfer_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::thread;
    use std::time::Instant;

    fn test_transport() -> Arc<UdpTransport> {
        UdpTransport::bind_addr((Ipv4Addr::LOCALHOST, 0)).unwrap()
    }

    fn short_timeout_options(command_port: u16) -> CardOptions {
        CardOptions {
            command_port,
            read_timeout: Duration::from_millis(200),
            ..CardOptions::default()
        }
    }

    /// Answer each read request with `data`, returning observed tids.
    fn spawn_fake_card(reply_port: u16, data: Vec<u8>, answers: usize) -> (u16, thread::JoinHandle<Vec<u32>>) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 128];
            let mut tids = Vec::new();
            for _ in 0..answers {
                let (len, _) = socket.recv_from(&mut buf).unwrap();
                let request = &buf[..len];
                let lba = u32::from_be_bytes([request[8], request[9], request[10], request[11]]);
                let tid =
                    u32::from_be_bytes([request[48], request[49], request[50], request[51]]);
                tids.push(tid);
                let response = protocol::encode_read_response(lba, 0, 0x18, tid, &data);
                let reply: SocketAddr = (Ipv4Addr::LOCALHOST, reply_port).into();
                socket.send_to(&response, reply).unwrap();
            }
            tids
        });
        (port, handle)
    }

    #[test]
    fn unanswered_read_times_out_with_request_bytes() {
        let transport = test_transport();
        // A socket that never answers
        let sink = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let card = Card::connect(
            Ipv4Addr::LOCALHOST,
            transport,
            short_timeout_options(sink.local_addr().unwrap().port()),
        );

        let started = Instant::now();
        let err = card.read_binary_data(0, 1).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(200));

        match err {
            Error::Timeout { request } => {
                let expected = protocol::encode_read_request(0, 1, "admin", "admin", 93);
                assert_eq!(request, expected);
            }
            other => panic!("expected timeout, got {}", other),
        }
    }

    #[test]
    fn read_completes_with_response_payload() {
        let transport = test_transport();
        let sector = vec![0xA5u8; 512];
        let (port, fake) = spawn_fake_card(transport.local_port(), sector.clone(), 1);
        let card = Card::connect(Ipv4Addr::LOCALHOST, transport, short_timeout_options(port));

        let data = card.read_binary_data(7, 1).unwrap();
        assert_eq!(data, sector);
        assert_eq!(fake.join().unwrap(), vec![93]);
    }

    #[test]
    fn transfer_ids_increase_per_read() {
        let transport = test_transport();
        let (port, fake) = spawn_fake_card(transport.local_port(), vec![0u8; 512], 3);
        let card = Card::connect(Ipv4Addr::LOCALHOST, transport, short_timeout_options(port));

        for _ in 0..3 {
            card.read_binary_data(0, 1).unwrap();
        }
        assert_eq!(fake.join().unwrap(), vec![93, 94, 95]);
    }

    #[test]
    fn response_with_unknown_tid_is_ignored() {
        let transport = test_transport();
        let reply_port = transport.local_port();

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        let fake = thread::spawn(move || {
            let mut buf = [0u8; 128];
            let (len, _) = socket.recv_from(&mut buf).unwrap();
            let request = &buf[..len];
            let tid = u32::from_be_bytes([request[48], request[49], request[50], request[51]]);
            let reply: SocketAddr = (Ipv4Addr::LOCALHOST, reply_port).into();
            // A stale response first, then the real one
            let stale = protocol::encode_read_response(0, 0, 0x18, tid + 1000, &[0xEE; 512]);
            socket.send_to(&stale, reply).unwrap();
            let good = protocol::encode_read_response(0, 0, 0x18, tid, &[0x11; 512]);
            socket.send_to(&good, reply).unwrap();
        });

        let card = Card::connect(Ipv4Addr::LOCALHOST, transport, short_timeout_options(port));
        let data = card.read_binary_data(0, 1).unwrap();
        assert_eq!(data, vec![0x11; 512]);
        fake.join().unwrap();
    }
}
