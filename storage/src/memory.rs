//! In-memory store for tests and ephemeral nodes
use crate::{ChainStore, StorageError};
use blockmesh_core::BlockHash;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct MemoryStore {
    heights: RwLock<BTreeMap<u64, BlockHash>>,
    peers: RwLock<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with hashes for heights `1..=height`
    pub fn with_chain(height: u64) -> Self {
        let store = Self::new();
        {
            let mut heights = store.heights.write();
            for h in 1..=height {
                heights.insert(h, BlockHash::digest(h.to_be_bytes()));
            }
        }
        store
    }
}

impl ChainStore for MemoryStore {
    fn current_height(&self) -> Result<u64, StorageError> {
        Ok(self
            .heights
            .read()
            .last_key_value()
            .map(|(h, _)| *h)
            .unwrap_or(0))
    }

    fn hashes_in_range(
        &self,
        min_exclusive: u64,
        max_inclusive: u64,
    ) -> Result<Vec<BlockHash>, StorageError> {
        if max_inclusive <= min_exclusive {
            return Ok(Vec::new());
        }
        Ok(self
            .heights
            .read()
            .range(min_exclusive + 1..=max_inclusive)
            .map(|(_, hash)| *hash)
            .collect())
    }

    fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, StorageError> {
        Ok(self.heights.read().get(&height).copied())
    }

    fn append_block_hash(&self, height: u64, hash: BlockHash) -> Result<(), StorageError> {
        self.heights.write().insert(height, hash);
        Ok(())
    }

    fn save_peer_address(&self, address: &str) -> Result<(), StorageError> {
        self.peers.write().insert(address.to_string());
        Ok(())
    }

    fn saved_peer_addresses(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.peers.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_chain_seeds_heights() {
        let store = MemoryStore::with_chain(100);
        assert_eq!(store.current_height().unwrap(), 100);
        assert_eq!(store.hashes_in_range(97, 100).unwrap().len(), 3);
        assert_eq!(
            store.block_hash(1).unwrap(),
            Some(BlockHash::digest(1u64.to_be_bytes()))
        );
    }

    #[test]
    fn test_range_skips_missing_heights() {
        let store = MemoryStore::new();
        let a = BlockHash::digest(b"a");
        let c = BlockHash::digest(b"c");
        store.append_block_hash(1, a).unwrap();
        store.append_block_hash(3, c).unwrap();

        assert_eq!(store.hashes_in_range(0, 3).unwrap(), vec![a, c]);
    }
}
