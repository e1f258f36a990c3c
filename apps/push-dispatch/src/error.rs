//! Error types for the dispatch pipeline.

use thiserror::Error;

/// Failure of one RPC exchange with a gateway backend.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("dial timed out")]
    DialTimeout,
    #[error("call timed out")]
    CallTimeout,
    #[error("endpoint is cancelled")]
    Cancelled,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] plume_proto::Error),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

/// Failure of one dispatch call. Propagates to the queue intake, which
/// decides whether the record is redelivered.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The envelope carried a kind this tier does not understand.
    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),
    /// A direct-key push to a known backend failed.
    #[error("push to backend {backend} failed: {source}")]
    Push {
        backend: String,
        #[source]
        source: RpcError,
    },
}

pub type Result<T> = std::result::Result<T, DispatchError>;
