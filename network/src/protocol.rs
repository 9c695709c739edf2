//! Message roles exchanged between peers
//!
//! Only what the coordinator and the connection worker need is modelled:
//! a hello carrying chain height, hash range requests/replies, height
//! announcements and address gossip.

use blockmesh_core::BlockHash;
use serde::{Deserialize, Serialize};

/// Current blockmesh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit the binary was built from (set at build time)
pub const GIT_HASH: &str = env!("BLOCKMESH_GIT_HASH");
pub const BUILD_DATE: &str = env!("BLOCKMESH_BUILD_DATE");

/// Version string advertised in every message header
pub fn full_version() -> String {
    format!("{}-{}", VERSION, GIT_HASH)
}

/// Attached to every outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Ephemeral identity of the sending node, regenerated on each start
    pub p2p_id: u64,
    /// Genesis hash of the sender's chain
    pub root: BlockHash,
    #[serde(default)]
    pub version: String,
}

impl MessageHeader {
    pub fn new(p2p_id: u64, root: BlockHash) -> Self {
        Self {
            p2p_id,
            root,
            version: full_version(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum NetworkMessage {
    Hello {
        header: MessageHeader,
        chain_height: u64,
    },
    /// Ask for the hashes in `[min_block_height, max_block_height]`
    GetBlockHashes {
        header: MessageHeader,
        min_block_height: u64,
        max_block_height: u64,
    },
    /// Reply to `GetBlockHashes`, and the payload of a new-block flood
    BlockHashes {
        header: MessageHeader,
        hashes: Vec<BlockHash>,
    },
    ChainHeight {
        header: MessageHeader,
        height: u64,
    },
    GetPeers {
        header: MessageHeader,
    },
    Peers {
        header: MessageHeader,
        addresses: Vec<String>,
    },
}

impl NetworkMessage {
    pub fn header(&self) -> &MessageHeader {
        match self {
            NetworkMessage::Hello { header, .. }
            | NetworkMessage::GetBlockHashes { header, .. }
            | NetworkMessage::BlockHashes { header, .. }
            | NetworkMessage::ChainHeight { header, .. }
            | NetworkMessage::GetPeers { header }
            | NetworkMessage::Peers { header, .. } => header,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NetworkMessage::Hello { .. } => "hello",
            NetworkMessage::GetBlockHashes { .. } => "get_block_hashes",
            NetworkMessage::BlockHashes { .. } => "block_hashes",
            NetworkMessage::ChainHeight { .. } => "chain_height",
            NetworkMessage::GetPeers { .. } => "get_peers",
            NetworkMessage::Peers { .. } => "peers",
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_tagged_by_role() {
        let msg = NetworkMessage::GetBlockHashes {
            header: MessageHeader::new(7, BlockHash::digest(b"genesis")),
            min_block_height: 100,
            max_block_height: 120,
        };
        let json: serde_json::Value = serde_json::from_slice(&msg.serialize().unwrap()).unwrap();

        assert_eq!(json["msg"], "get_block_hashes");
        assert_eq!(json["min_block_height"], 100);
        assert_eq!(json["header"]["p2p_id"], 7);
    }

    #[test]
    fn test_header_version_defaults_when_missing() {
        let root = BlockHash::digest(b"genesis");
        let raw = format!(
            r#"{{"msg":"get_peers","header":{{"p2p_id":1,"root":"{}"}}}}"#,
            root
        );
        let msg = NetworkMessage::deserialize(raw.as_bytes()).unwrap();
        assert_eq!(msg.header().root, root);
        assert_eq!(msg.header().version, "");
        assert_eq!(msg.kind(), "get_peers");
    }
}
