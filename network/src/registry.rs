//! Registry of live peer connections, keyed by canonical address
use crate::connection::PeerConnection;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Point-in-time view of one registered peer
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub address: String,
    pub chain_height: u64,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Arc<PeerConnection>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.read().contains_key(address)
    }

    /// Register a connection. Returns false, leaving the registry untouched,
    /// when the address already has a connection.
    pub fn add(&self, conn: Arc<PeerConnection>) -> bool {
        let mut peers = self.peers.write();
        if peers.contains_key(conn.address()) {
            return false;
        }
        peers.insert(conn.address().to_string(), conn);
        true
    }

    /// Remove `conn` only if it is still the registered connection for its
    /// address; a replacement registered after it stays.
    pub fn remove_if_same(&self, conn: &Arc<PeerConnection>) -> bool {
        let mut peers = self.peers.write();
        match peers.get(conn.address()) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                peers.remove(conn.address());
                true
            }
            _ => false,
        }
    }

    /// Run `f` on every registered peer while holding the read lock.
    /// `f` must not block or call back into the registry for writing.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<PeerConnection>),
    {
        for conn in self.peers.read().values() {
            f(conn);
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers
            .read()
            .values()
            .map(|conn| PeerSnapshot {
                address: conn.address().to_string(),
                chain_height: conn.chain_height(),
                connected_at: conn.connected_at(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
