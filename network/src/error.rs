//! Network error types
use blockmesh_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("failed to resolve {address}: {reason}")]
    Resolve { address: String, reason: String },

    #[error("failed to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("outbound queue for {0} stayed full past the send timeout")]
    Backpressure(String),

    #[error("connection to {0} is closed")]
    ConnectionClosed(String),

    #[error("peer {0} is already connected")]
    AlreadyConnected(String),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
