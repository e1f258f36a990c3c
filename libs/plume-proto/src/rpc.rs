//! JSON envelopes carried by gateway RPC frames.
//!
//! Each RPC is one frame: the frame op identifies the request type and the
//! body is the serialized envelope. The gateway answers every request with a
//! single [`Ack`] frame. Pre-framed payloads travel as base64 inside the
//! envelope so the gateway can forward them verbatim.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::ops::{OP_ACK, OP_BROADCAST, OP_BROADCAST_ROOM, OP_PUSH_KEYS};
use crate::{Error, Result};

/// An envelope that maps to exactly one frame operation code.
pub trait RpcMessage: Serialize + DeserializeOwned {
    /// Frame operation code identifying this envelope on the wire.
    const OP: i32;

    /// Encode into a complete frame.
    fn to_frame(&self) -> Result<Frame> {
        let body = serde_json::to_vec(self).map_err(Error::Serialize)?;
        Ok(Frame::new(Self::OP, body))
    }

    /// Decode from a frame, validating the operation code.
    fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.op != Self::OP {
            return Err(Error::UnexpectedOp {
                expected: Self::OP,
                got: frame.op,
            });
        }
        serde_json::from_slice(&frame.body).map_err(Error::Deserialize)
    }
}

/// Push a pre-framed message to a batch of subscriber keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushKeysReq {
    pub keys: Vec<String>,
    /// Inner operation code, preserved for the eventual client delivery.
    pub proto_op: i32,
    /// Encoded outer raw frame, forwarded verbatim by the gateway.
    #[serde(with = "base64_bytes")]
    pub frame: Vec<u8>,
}

impl RpcMessage for PushKeysReq {
    const OP: i32 = OP_PUSH_KEYS;
}

/// Broadcast a pre-framed message to every connection on the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastReq {
    pub proto_op: i32,
    #[serde(with = "base64_bytes")]
    pub frame: Vec<u8>,
    /// Per-gateway delivery budget, messages per second.
    pub speed: i32,
}

impl RpcMessage for BroadcastReq {
    const OP: i32 = OP_BROADCAST;
}

/// Broadcast a pre-framed (possibly aggregated) message to one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastRoomReq {
    pub room_id: String,
    #[serde(with = "base64_bytes")]
    pub frame: Vec<u8>,
}

impl RpcMessage for BroadcastRoomReq {
    const OP: i32 = OP_BROADCAST_ROOM;
}

/// Gateway acknowledgement of a request frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

impl RpcMessage for Ack {
    const OP: i32 = OP_ACK;
}

/// Serde adapter: `Vec<u8>` as a standard base64 string in JSON.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
