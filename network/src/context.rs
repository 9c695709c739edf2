//! Handles shared between the coordinator and the connection workers
use crate::config::NetworkConfig;
use crate::connection::PeerConnection;
use crate::coordinator::ControlMessage;
use crate::error::NetworkError;
use crate::expiring_set::ExpiringSet;
use crate::protocol::MessageHeader;
use crate::registry::PeerRegistry;
use blockmesh_core::{BlockHash, ChainParams};
use blockmesh_storage::ChainStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Hashes a peer told us about that were not requested in the last few seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashAnnouncement {
    pub peer: String,
    pub hashes: Vec<BlockHash>,
}

pub struct NetworkContext {
    pub params: ChainParams,
    pub config: NetworkConfig,
    pub store: Arc<dyn ChainStore>,
    pub registry: Arc<PeerRegistry>,
    /// Producer side of the coordinator's control channel
    pub control: mpsc::UnboundedSender<ControlMessage>,
    pub recently_requested_blocks: Arc<ExpiringSet>,
    pub bad_peers: Arc<ExpiringSet>,
    /// Ephemeral identity of this node, used to detect self-connections
    pub p2p_id: u64,
    /// Where fresh block hashes are handed to the block layer, if any
    pub announcements: Option<mpsc::UnboundedSender<HashAnnouncement>>,
}

impl NetworkContext {
    /// Build a context and the consumer side of its control channel.
    ///
    /// A `default_port` in `config` overrides the one in `params`.
    pub fn new(
        params: ChainParams,
        config: NetworkConfig,
        store: Arc<dyn ChainStore>,
        registry: Arc<PeerRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let params = match config.default_port {
            Some(port) => params.with_default_port(port),
            None => params,
        };
        let ctx = NetworkContext {
            recently_requested_blocks: Arc::new(ExpiringSet::new(config.recently_requested_ttl())),
            bad_peers: Arc::new(ExpiringSet::new(config.bad_peer_ttl())),
            p2p_id: rand::random(),
            announcements: None,
            params,
            config,
            store,
            registry,
            control,
        };
        (ctx, control_rx)
    }

    pub fn with_announcements(mut self, sink: mpsc::UnboundedSender<HashAnnouncement>) -> Self {
        self.announcements = Some(sink);
        self
    }

    pub fn header(&self) -> MessageHeader {
        MessageHeader::new(self.p2p_id, self.params.genesis_hash)
    }

    pub fn local_height(&self) -> Result<u64, NetworkError> {
        Ok(self.store.current_height()?)
    }

    /// True if `address` is registered or quarantined
    pub fn is_known_or_bad(&self, address: &str) -> bool {
        self.registry.contains(address) || self.bad_peers.contains(address)
    }

    pub fn quarantine(&self, address: &str, reason: &str) {
        self.bad_peers.insert(address);
        warn!(peer = %address, reason, "🚫 peer quarantined");
    }

    /// Tear down a peer that failed us: stop its worker, deregister it and
    /// keep discovery away from it for the quarantine window.
    pub fn evict(&self, conn: &Arc<PeerConnection>, reason: &str) {
        conn.close();
        self.registry.remove_if_same(conn);
        self.quarantine(conn.address(), reason);
    }
}
