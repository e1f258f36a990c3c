//! Wire-level types shared by the push-dispatch tier and the gateway fleet:
//! the fixed binary frame, the reserved operation codes, and the JSON
//! envelopes carried by gateway RPC frames.

pub mod frame;
pub mod ops;
pub mod rpc;

pub use frame::Frame;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while encoding or decoding wire data.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("incomplete frame")]
    Incomplete,
    #[error("frame body too large: {0} bytes")]
    BodyTooLarge(usize),
    #[error("failed to serialize rpc envelope: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize rpc envelope: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("unexpected operation: expected {expected}, got {got}")]
    UnexpectedOp { expected: i32, got: i32 },
}
