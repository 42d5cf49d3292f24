//! UDP side of the client: transport, discovery, and the card handle

pub mod card;
pub mod discovery;
pub mod protocol;
pub mod transport;

pub use card::{Card, CardOptions, READ_TIMEOUT};
pub use discovery::{Discovery, DiscoveryOptions, BROADCAST_INTERVAL, DEFAULT_BROADCAST_ADDR};
pub use protocol::{CardInfo, CardKind, CARD_PORT, LOCAL_PORT};
pub use transport::{DatagramHandler, UdpTransport};
