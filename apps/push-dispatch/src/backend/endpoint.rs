//! One gateway endpoint: identity plus RPC passthrough with an explicit
//! ready → cancelled lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use plume_proto::rpc::{BroadcastReq, BroadcastRoomReq, PushKeysReq};

use crate::discovery::Instance;
use crate::error::RpcError;
use crate::rpc::GatewayRpc;

/// A live RPC channel to one gateway process. Created only by the membership
/// reconciler; cancelled only when the host leaves discovery.
pub struct Endpoint {
    hostname: String,
    addr: String,
    rpc: Arc<dyn GatewayRpc>,
    cancelled: AtomicBool,
}

impl Endpoint {
    pub fn new(instance: &Instance, rpc: Arc<dyn GatewayRpc>) -> Self {
        Self {
            hostname: instance.hostname.clone(),
            addr: instance.addr.clone(),
            rpc,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Tear the endpoint down. One-way: no operation succeeds afterwards.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!(backend = %self.hostname, "endpoint cancelled");
        }
    }

    fn ensure_live(&self) -> Result<(), RpcError> {
        if self.is_cancelled() {
            Err(RpcError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Push a pre-framed message to a batch of subscriber keys.
    pub async fn push_keys(
        &self,
        keys: Vec<String>,
        proto_op: i32,
        frame: Vec<u8>,
    ) -> Result<(), RpcError> {
        self.ensure_live()?;
        let key_count = keys.len();
        self.rpc
            .push_keys(PushKeysReq {
                keys,
                proto_op,
                frame,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    backend = %self.hostname,
                    keys = key_count,
                    op = proto_op,
                    ?e,
                    "push failed"
                );
                e
            })
    }

    /// Broadcast a pre-framed message to every connection on the gateway.
    pub async fn broadcast(
        &self,
        proto_op: i32,
        frame: Vec<u8>,
        speed: i32,
    ) -> Result<(), RpcError> {
        self.ensure_live()?;
        self.rpc
            .broadcast(BroadcastReq {
                proto_op,
                frame,
                speed,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    backend = %self.hostname,
                    op = proto_op,
                    speed,
                    ?e,
                    "broadcast failed"
                );
                e
            })
    }

    /// Broadcast a pre-framed (possibly aggregated) message to one room.
    pub async fn broadcast_room(&self, room_id: &str, frame: Vec<u8>) -> Result<(), RpcError> {
        self.ensure_live()?;
        self.rpc
            .broadcast_room(BroadcastRoomReq {
                room_id: room_id.to_string(),
                frame,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    backend = %self.hostname,
                    room = %room_id,
                    ?e,
                    "room broadcast failed"
                );
                e
            })
    }
}
