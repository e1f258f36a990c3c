//! Top-level routing of inbound push records.
//!
//! One entry point, [`Dispatcher::dispatch`], classifies a record by kind
//! and drives the backend set or the room registry. The payload is framed
//! once with its client operation, then wrapped as an outer raw frame so
//! gateways forward it without re-parsing.

use serde::{Deserialize, Serialize};

use plume_proto::frame::Frame;
use plume_proto::rpc::base64_bytes;

use crate::backend::BackendSet;
use crate::error::{DispatchError, Result};
use crate::room::RoomRegistry;

pub const KIND_PUSH: &str = "push";
pub const KIND_ROOM: &str = "room";
pub const KIND_BROADCAST: &str = "broadcast";

/// Inbound unit of work, deserialized from one queue record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushMessage {
    /// `"push"`, `"room"` or `"broadcast"`.
    pub kind: String,
    /// Client-protocol operation carried by the payload.
    pub operation: i32,
    /// Target gateway hostname (push only).
    #[serde(default)]
    pub server: String,
    /// Subscriber keys on that gateway (push only).
    #[serde(default)]
    pub keys: Vec<String>,
    /// Room identifier (room only).
    #[serde(default)]
    pub room: String,
    /// Fleet-wide messages/sec budget (broadcast only).
    #[serde(default)]
    pub speed: i32,
    /// Opaque payload bytes.
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
}

pub struct Dispatcher {
    backends: BackendSet,
    rooms: RoomRegistry,
}

impl Dispatcher {
    pub fn new(backends: BackendSet, rooms: RoomRegistry) -> Self {
        Self { backends, rooms }
    }

    /// Route one record. Errors propagate to the queue intake, which leaves
    /// the record unacknowledged for redelivery.
    pub async fn dispatch(&self, msg: &PushMessage) -> Result<()> {
        match msg.kind.as_str() {
            KIND_PUSH => self.push_keys(msg).await,
            KIND_ROOM => {
                self.rooms.push(&msg.room, msg.operation, &msg.body).await;
                Ok(())
            }
            KIND_BROADCAST => self.broadcast(msg).await,
            _ => Err(DispatchError::UnknownKind(msg.kind.clone())),
        }
    }

    async fn push_keys(&self, msg: &PushMessage) -> Result<()> {
        let Some(endpoint) = self.backends.get(&msg.server) else {
            // Expected churn: the named gateway is simply not known right
            // now. Its sessions will re-register elsewhere.
            tracing::debug!(backend = %msg.server, "push target not in current membership");
            return Ok(());
        };
        endpoint
            .push_keys(msg.keys.clone(), msg.operation, raw_frame(msg))
            .await
            .map_err(|source| DispatchError::Push {
                backend: msg.server.clone(),
                source,
            })
    }

    async fn broadcast(&self, msg: &PushMessage) -> Result<()> {
        let snapshot = self.backends.snapshot();
        if snapshot.is_empty() {
            tracing::warn!(op = msg.operation, "broadcast with no live backends, dropping");
            return Ok(());
        }
        let speed = msg.speed / snapshot.len() as i32;
        let frame = raw_frame(msg);
        for endpoint in snapshot.values() {
            // Partial success is the normal case; the endpoint logs its own
            // failures and the remaining backends still get the message.
            let _ = endpoint.broadcast(msg.operation, frame.clone(), speed).await;
        }
        tracing::debug!(
            op = msg.operation,
            backends = snapshot.len(),
            speed,
            "broadcast fanned out"
        );
        Ok(())
    }
}

/// Frame the payload with its client operation, then wrap it as the opaque
/// outer raw frame gateways forward verbatim.
fn raw_frame(msg: &PushMessage) -> Vec<u8> {
    Frame::new(msg.operation, msg.body.clone())
        .into_raw()
        .encode_to_bytes()
        .to_vec()
}
