//! Card discovery over UDP broadcast
//!
//! Cards answer the ASCII probe `KTC` with a command-1 card-info datagram.
//! Discovery sends the probe on a fixed interval, watches the transport's
//! broadcast stream, and reports each `(ip, mac)` pair exactly once.

use std::collections::HashSet;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;
use crate::net::card::{Card, CardOptions};
use crate::net::protocol::{self, CMD_CARD_INFO, DIRECTION_RESPONSE, HEADER, PROBE_PAYLOAD};
use crate::net::transport::UdpTransport;

/// Default delay between discovery probes
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

/// Default broadcast address of the card's own access-point network
pub const DEFAULT_BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 255);

/// Callback invoked once per newly discovered card
pub type CardCallback = Box<dyn FnMut(Arc<Card>) + Send>;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub broadcast_addr: Ipv4Addr,
    pub probe_interval: Duration,
    /// Options handed to every card connected by this discovery
    pub card_options: CardOptions,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            broadcast_addr: DEFAULT_BROADCAST_ADDR,
            probe_interval: BROADCAST_INTERVAL,
            card_options: CardOptions::default(),
        }
    }
}

#[derive(Default)]
struct Roster {
    seen: HashSet<(Ipv4Addr, [u8; 6])>,
    cards: Vec<Arc<Card>>,
}

/// Finds cards on the local broadcast domain
pub struct Discovery {
    transport: Arc<UdpTransport>,
    options: DiscoveryOptions,
    roster: Arc<Mutex<Roster>>,
    callback: Arc<Mutex<Option<CardCallback>>>,
    active: Arc<AtomicBool>,
    // stop flag + wakeup for the probe loop
    probe_gate: Arc<(Mutex<bool>, Condvar)>,
    probe_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(transport: Arc<UdpTransport>, options: DiscoveryOptions) -> Self {
        Self {
            transport,
            options,
            roster: Arc::new(Mutex::new(Roster::default())),
            callback: Arc::new(Mutex::new(None)),
            active: Arc::new(AtomicBool::new(false)),
            probe_gate: Arc::new((Mutex::new(false), Condvar::new())),
            probe_thread: Mutex::new(None),
        }
    }

    /// Register the handler fired once per new card.
    pub fn on_card_discovered(&self, callback: impl FnMut(Arc<Card>) + Send + 'static) {
        *self.callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Begin probing and listening for card-info responses.
    pub fn start(&self) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.probe_gate.0.lock().unwrap() = false;

        let roster = Arc::clone(&self.roster);
        let callback = Arc::clone(&self.callback);
        let active = Arc::clone(&self.active);
        let transport = Arc::clone(&self.transport);
        let card_options = self.options.card_options.clone();
        self.transport.subscribe_all(Arc::new(move |payload, _remote| {
            if !active.load(Ordering::SeqCst) {
                return;
            }
            handle_card_info(&roster, &callback, &transport, &card_options, payload);
        }));

        let gate = Arc::clone(&self.probe_gate);
        let broadcast_addr = self.options.broadcast_addr;
        let probe_port = self.options.card_options.command_port;
        let interval = self.options.probe_interval;
        let handle = thread::Builder::new()
            .name("aircard-discovery".into())
            .spawn(move || probe_loop(gate, broadcast_addr, probe_port, interval))?;
        *self.probe_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Cancel the periodic probe. Already-connected cards stay alive.
    pub fn stop(&self) {
        {
            let (stopped, wakeup) = &*self.probe_gate;
            *stopped.lock().unwrap() = true;
            wakeup.notify_all();
        }
        if let Some(handle) = self.probe_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Stop probing, shut down every discovered card, drop the callback.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.stop();
        let mut roster = self.roster.lock().unwrap();
        for card in roster.cards.drain(..) {
            card.shutdown();
        }
        roster.seen.clear();
        *self.callback.lock().unwrap() = None;
    }

    /// Cards discovered so far
    pub fn cards(&self) -> Vec<Arc<Card>> {
        self.roster.lock().unwrap().cards.clone()
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn probe_loop(
    gate: Arc<(Mutex<bool>, Condvar)>,
    broadcast_addr: Ipv4Addr,
    probe_port: u16,
    interval: Duration,
) {
    let (stopped, wakeup) = &*gate;
    loop {
        if let Err(err) = send_probe(broadcast_addr, probe_port) {
            log::warn!("discovery probe failed: {}", err);
        }

        let guard = stopped.lock().unwrap();
        let (guard, _timeout) = wakeup
            .wait_timeout_while(guard, interval, |stop| !*stop)
            .unwrap();
        if *guard {
            return;
        }
    }
}

fn send_probe(broadcast_addr: Ipv4Addr, probe_port: u16) -> std::io::Result<()> {
    // A throwaway socket per probe; the card answers to the fixed local
    // port, not to this one.
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_broadcast(true)?;
    socket.send_to(PROBE_PAYLOAD, (broadcast_addr, probe_port))?;
    log::debug!("sent discovery probe to {}:{}", broadcast_addr, probe_port);
    Ok(())
}

fn handle_card_info(
    roster: &Mutex<Roster>,
    callback: &Mutex<Option<CardCallback>>,
    transport: &Arc<UdpTransport>,
    card_options: &CardOptions,
    payload: &[u8],
) {
    // Other traffic shares the broadcast stream; only card-info frames
    // matter here.
    if payload.len() < 8
        || &payload[0..6] != HEADER
        || payload[6] != DIRECTION_RESPONSE
        || payload[7] != CMD_CARD_INFO
    {
        return;
    }

    let info = match protocol::parse_card_info(payload) {
        Ok(info) => info,
        Err(err) => {
            log::debug!("ignoring unparsable card info: {}", err);
            return;
        }
    };

    let card = {
        let mut roster = roster.lock().unwrap();
        if !roster.seen.insert((info.ip, info.mac)) {
            return;
        }
        log::info!(
            "discovered {} card at {} (mac {}, fw {})",
            info.kind,
            info.ip,
            info.mac_string(),
            info.version
        );
        let card = Card::from_info(info, Arc::clone(transport), card_options.clone());
        roster.cards.push(Arc::clone(&card));
        card
    };

    if let Some(cb) = callback.lock().unwrap().as_mut() {
        cb(card);
    }
}
