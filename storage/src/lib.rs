//! blockmesh storage layer
//!
//! The P2P layer only needs a narrow view of persistence:
//! - current chain height
//! - height -> hash lookups for a range
//! - the list of peer addresses we have connected to before
//!
//! Two implementations are provided: a sled database for the daemon and an
//! in-memory store for tests and throwaway nodes.

pub mod memory;
pub mod sled_store;

use blockmesh_core::BlockHash;
use std::collections::BTreeSet;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Synchronous, thread-safe persistence contract used by the P2P coordinator
pub trait ChainStore: Send + Sync {
    /// Height of the highest stored block, 0 for an empty chain
    fn current_height(&self) -> Result<u64, StorageError>;

    /// Hashes for heights in `(min_exclusive, max_inclusive]`, ordered by height.
    /// Heights with no stored hash are skipped.
    fn hashes_in_range(
        &self,
        min_exclusive: u64,
        max_inclusive: u64,
    ) -> Result<Vec<BlockHash>, StorageError>;

    fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, StorageError>;

    fn append_block_hash(&self, height: u64, hash: BlockHash) -> Result<(), StorageError>;

    /// Remember a peer address; saving the same address twice is a no-op
    fn save_peer_address(&self, address: &str) -> Result<(), StorageError>;

    fn saved_peer_addresses(&self) -> Result<BTreeSet<String>, StorageError>;
}
