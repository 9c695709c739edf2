//! blockmesh P2P layer
//!
//! The `Coordinator` owns peer discovery, block-hash flooding and periodic
//! reconnects. Connection workers, the inbound listener and the tick source
//! run as independent tasks and reach it through its control channel.

pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod expiring_set;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod tick;

pub use config::NetworkConfig;
pub use connection::{start_peer, OutboundQueue, PeerConnection};
pub use context::{HashAnnouncement, NetworkContext};
pub use coordinator::{ControlMessage, Coordinator};
pub use discovery::{canonical_address, dial};
pub use error::NetworkError;
pub use expiring_set::ExpiringSet;
pub use listener::PeerListener;
pub use protocol::{MessageHeader, NetworkMessage, VERSION};
pub use registry::{PeerRegistry, PeerSnapshot};
pub use tick::spawn_tick_source;
