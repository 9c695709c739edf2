//! Tunables for the P2P layer
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the inbound listener binds to. Also never dialed by discovery.
    pub listen_addr: Option<SocketAddr>,
    /// Overrides the network's default peer port
    pub default_port: Option<u16>,
    /// Addresses handed to discovery at startup
    pub seed_peers: Vec<String>,
    pub tick_interval_ms: u64,
    pub reconnect_interval_secs: u64,
    pub bad_peer_ttl_secs: u64,
    pub recently_requested_ttl_secs: u64,
    /// Capacity of each peer's inbound and outbound queue
    pub queue_capacity: usize,
    pub send_timeout_ms: u64,
    pub dial_timeout_ms: u64,
    pub max_hashes_per_reply: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            default_port: None,
            seed_peers: Vec::new(),
            tick_interval_ms: 1000,
            reconnect_interval_secs: 600,
            bad_peer_ttl_secs: 900,
            recently_requested_ttl_secs: 5,
            queue_capacity: 5,
            send_timeout_ms: 2000,
            dial_timeout_ms: 5000,
            max_hashes_per_reply: 500,
        }
    }
}

impl NetworkConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn bad_peer_ttl(&self) -> Duration {
        Duration::from_secs(self.bad_peer_ttl_secs)
    }

    pub fn recently_requested_ttl(&self) -> Duration {
        Duration::from_secs(self.recently_requested_ttl_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}
