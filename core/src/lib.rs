//! blockmesh core types
//!
//! Domain types shared by the storage and network layers.

pub mod hash;
pub mod params;

pub use hash::{BlockHash, HashParseError};
pub use params::{ChainParams, NetworkType};
