//! UDP receive socket and datagram dispatch
//!
//! One socket bound to the well-known local port carries every
//! card-to-host datagram. A background thread receives and hands each
//! datagram to the broadcast handlers (in registration order) and then to
//! the per-peer handler matching the source address. The transport knows
//! nothing about frame contents.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;
use crate::net::protocol::LOCAL_PORT;

/// How long the receive thread blocks before re-checking the stop flag
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Largest datagram the receive loop accepts (IP reassembles up to 64 KiB)
const RECV_BUF_LEN: usize = 65536;

/// Callback invoked on the receive thread. Must not block.
pub type DatagramHandler = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

#[derive(Default)]
struct HandlerTable {
    peers: HashMap<Ipv4Addr, DatagramHandler>,
    broadcast: Vec<DatagramHandler>,
}

/// Shared receive socket for all cards on this host
pub struct UdpTransport {
    socket: UdpSocket,
    handlers: Arc<Mutex<HandlerTable>>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Bind the well-known local port 24388 on all interfaces.
    pub fn bind() -> Result<Arc<Self>> {
        Self::bind_addr((Ipv4Addr::UNSPECIFIED, LOCAL_PORT))
    }

    /// Bind an explicit address. Tests bind port 0 for an ephemeral port.
    pub fn bind_addr<A: ToSocketAddrs>(addr: A) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;

        let handlers = Arc::new(Mutex::new(HandlerTable::default()));
        let running = Arc::new(AtomicBool::new(true));

        let recv_socket = socket.try_clone()?;
        let recv_handlers = Arc::clone(&handlers);
        let recv_running = Arc::clone(&running);
        let receiver = thread::Builder::new()
            .name("aircard-udp-recv".into())
            .spawn(move || receive_loop(recv_socket, recv_handlers, recv_running))?;

        Ok(Arc::new(Self {
            socket,
            handlers,
            running,
            receiver: Mutex::new(Some(receiver)),
        }))
    }

    /// Port the receive socket is bound to
    pub fn local_port(&self) -> u16 {
        self.socket
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(LOCAL_PORT)
    }

    /// Install the handler for one peer, replacing any existing one.
    pub fn subscribe(&self, ip: Ipv4Addr, handler: DatagramHandler) {
        let mut table = self.handlers.lock().unwrap();
        table.peers.insert(ip, handler);
    }

    /// Append a handler that sees every inbound datagram.
    pub fn subscribe_all(&self, handler: DatagramHandler) {
        let mut table = self.handlers.lock().unwrap();
        table.broadcast.push(handler);
    }

    pub fn unsubscribe(&self, ip: Ipv4Addr) {
        let mut table = self.handlers.lock().unwrap();
        table.peers.remove(&ip);
    }

    /// Stop the receive thread and drop every handler.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.lock().unwrap().take() {
            let _ = handle.join();
        }
        let mut table = self.handlers.lock().unwrap();
        table.peers.clear();
        table.broadcast.clear();
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(socket: UdpSocket, handlers: Arc<Mutex<HandlerTable>>, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    while running.load(Ordering::SeqCst) {
        let (len, remote) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                continue
            }
            Err(err) => {
                log::warn!("receive error on local socket: {}", err);
                continue;
            }
        };
        dispatch(&handlers, &buf[..len], remote);
    }
}

fn dispatch(handlers: &Mutex<HandlerTable>, payload: &[u8], remote: SocketAddr) {
    // Snapshot under the lock; handlers may re-enter subscribe/unsubscribe.
    let (broadcast, peer) = {
        let table = handlers.lock().unwrap();
        let peer = match remote.ip() {
            IpAddr::V4(ip) => table.peers.get(&ip).cloned(),
            IpAddr::V6(_) => None,
        };
        (table.broadcast.clone(), peer)
    };

    for handler in &broadcast {
        handler(payload, remote);
    }
    if let Some(handler) = peer {
        handler(payload, remote);
    } else if broadcast.is_empty() {
        log::debug!("dropping datagram from unsubscribed peer {}", remote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn loopback_transport() -> Arc<UdpTransport> {
        UdpTransport::bind_addr((Ipv4Addr::LOCALHOST, 0)).unwrap()
    }

    fn send_to(port: u16, payload: &[u8]) -> UdpSocket {
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender
            .send_to(payload, (Ipv4Addr::LOCALHOST, port))
            .unwrap();
        sender
    }

    fn wait_for<T>(rx: &mpsc::Receiver<T>) -> T {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn broadcast_handlers_run_before_peer_handler() {
        let transport = loopback_transport();
        let (tx, rx) = mpsc::channel();

        let tx_a = tx.clone();
        transport.subscribe_all(Arc::new(move |_, _| tx_a.send("first").unwrap()));
        let tx_b = tx.clone();
        transport.subscribe_all(Arc::new(move |_, _| tx_b.send("second").unwrap()));
        let tx_peer = tx.clone();
        transport.subscribe(
            Ipv4Addr::LOCALHOST,
            Arc::new(move |_, _| tx_peer.send("peer").unwrap()),
        );

        send_to(transport.local_port(), b"hello");
        assert_eq!(wait_for(&rx), "first");
        assert_eq!(wait_for(&rx), "second");
        assert_eq!(wait_for(&rx), "peer");
    }

    #[test]
    fn subscribe_replaces_previous_peer_handler() {
        let transport = loopback_transport();
        let (tx, rx) = mpsc::channel();

        let tx_old = tx.clone();
        transport.subscribe(
            Ipv4Addr::LOCALHOST,
            Arc::new(move |_, _| tx_old.send("old").unwrap()),
        );
        let tx_new = tx.clone();
        transport.subscribe(
            Ipv4Addr::LOCALHOST,
            Arc::new(move |_, _| tx_new.send("new").unwrap()),
        );

        send_to(transport.local_port(), b"x");
        assert_eq!(wait_for(&rx), "new");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn unsubscribed_peer_gets_nothing() {
        let transport = loopback_transport();
        let (tx, rx) = mpsc::channel::<()>();

        let tx_peer = tx.clone();
        transport.subscribe(
            Ipv4Addr::LOCALHOST,
            Arc::new(move |_, _| tx_peer.send(()).unwrap()),
        );
        transport.unsubscribe(Ipv4Addr::LOCALHOST);

        send_to(transport.local_port(), b"x");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn handler_sees_payload_and_remote() {
        let transport = loopback_transport();
        let (tx, rx) = mpsc::channel();

        transport.subscribe(
            Ipv4Addr::LOCALHOST,
            Arc::new(move |payload, remote| tx.send((payload.to_vec(), remote)).unwrap()),
        );

        let sender = send_to(transport.local_port(), b"payload");
        let (payload, remote) = wait_for(&rx);
        assert_eq!(payload, b"payload");
        assert_eq!(remote, sender.local_addr().unwrap());
    }

    #[test]
    fn shutdown_stops_dispatch_promptly() {
        let transport = loopback_transport();
        let (tx, rx) = mpsc::channel::<()>();
        transport.subscribe(Ipv4Addr::LOCALHOST, Arc::new(move |_, _| {
            let _ = tx.send(());
        }));

        let started = Instant::now();
        transport.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));

        send_to(transport.local_port(), b"late");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }
}
