//! Fixed chain identity and network constants

use crate::hash::BlockHash;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

impl NetworkType {
    pub fn default_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => 2016,
            NetworkType::Testnet => 12016,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
        }
    }
}

/// Constants the P2P layer consumes but does not own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub network: NetworkType,
    /// Port every canonical peer address is rewritten to
    pub default_port: u16,
    /// Chain identity marker attached to every outbound message
    pub genesis_hash: BlockHash,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        Self::for_network(NetworkType::Mainnet)
    }

    pub fn testnet() -> Self {
        Self::for_network(NetworkType::Testnet)
    }

    pub fn for_network(network: NetworkType) -> Self {
        ChainParams {
            network,
            default_port: network.default_port(),
            genesis_hash: BlockHash::digest(format!("blockmesh-genesis-{}", network.name())),
        }
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_networks_have_distinct_identity() {
        let main = ChainParams::mainnet();
        let test = ChainParams::testnet();
        assert_ne!(main.genesis_hash, test.genesis_hash);
        assert_ne!(main.default_port, test.default_port);
    }

    #[test]
    fn test_port_override_keeps_genesis() {
        let params = ChainParams::testnet().with_default_port(40000);
        assert_eq!(params.default_port, 40000);
        assert_eq!(params.genesis_hash, ChainParams::testnet().genesis_hash);
    }
}
