//! Sled-based persistence for chain heights and saved peers
use crate::{ChainStore, StorageError};
use blockmesh_core::BlockHash;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

const HEIGHTS_TREE: &str = "heights";
const PEERS_TREE: &str = "peers";

#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    heights: sled::Tree,
    peers: sled::Tree,
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    /// Database that lives only as long as this handle
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let heights = db.open_tree(HEIGHTS_TREE)?;
        let peers = db.open_tree(PEERS_TREE)?;
        Ok(SledStore { db, heights, peers })
    }

    fn decode_height(key: &[u8]) -> Result<u64, StorageError> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| StorageError::Corrupt(format!("height key of {} bytes", key.len())))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn decode_hash(value: &[u8]) -> Result<BlockHash, StorageError> {
        BlockHash::from_slice(value).map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}

impl ChainStore for SledStore {
    fn current_height(&self) -> Result<u64, StorageError> {
        match self.heights.last()? {
            Some((key, _)) => Self::decode_height(&key),
            None => Ok(0),
        }
    }

    fn hashes_in_range(
        &self,
        min_exclusive: u64,
        max_inclusive: u64,
    ) -> Result<Vec<BlockHash>, StorageError> {
        if max_inclusive <= min_exclusive {
            return Ok(Vec::new());
        }
        let start = (min_exclusive + 1).to_be_bytes();
        let end = max_inclusive.to_be_bytes();

        let mut hashes = Vec::new();
        for entry in self.heights.range(start..=end) {
            let (_, value) = entry?;
            hashes.push(Self::decode_hash(&value)?);
        }
        Ok(hashes)
    }

    fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, StorageError> {
        match self.heights.get(height.to_be_bytes())? {
            Some(value) => Ok(Some(Self::decode_hash(&value)?)),
            None => Ok(None),
        }
    }

    fn append_block_hash(&self, height: u64, hash: BlockHash) -> Result<(), StorageError> {
        self.heights
            .insert(height.to_be_bytes(), hash.as_bytes().to_vec())?;
        // Flush so the height survives a restart
        self.db.flush()?;
        debug!(height, hash = %hash.short(), "stored block hash");
        Ok(())
    }

    fn save_peer_address(&self, address: &str) -> Result<(), StorageError> {
        if self.peers.insert(address.as_bytes(), Vec::<u8>::new())?.is_none() {
            self.db.flush()?;
            debug!(peer = %address, "saved peer address");
        }
        Ok(())
    }

    fn saved_peer_addresses(&self) -> Result<BTreeSet<String>, StorageError> {
        let mut addresses = BTreeSet::new();
        for key in self.peers.iter().keys() {
            let key = key?;
            let address = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::Corrupt(format!("peer address: {}", e)))?;
            addresses.insert(address);
        }
        Ok(addresses)
    }
}
