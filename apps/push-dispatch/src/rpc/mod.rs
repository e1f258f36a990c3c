//! Client surface for the gateway RPC boundary.
//!
//! Membership and dispatch logic talk to gateways only through
//! [`GatewayRpc`]; the framed-TCP transport in [`tcp`] is the production
//! implementation, and tests substitute recording fakes.

pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use plume_proto::rpc::{BroadcastReq, BroadcastRoomReq, PushKeysReq};

use crate::config::RpcConfig;
use crate::discovery::Instance;
use crate::error::RpcError;

/// One gateway's RPC operations. All three are fire-and-forget beyond the
/// returned result; retry policy belongs to the caller.
#[async_trait]
pub trait GatewayRpc: Send + Sync {
    async fn push_keys(&self, req: PushKeysReq) -> Result<(), RpcError>;
    async fn broadcast(&self, req: BroadcastReq) -> Result<(), RpcError>;
    async fn broadcast_room(&self, req: BroadcastRoomReq) -> Result<(), RpcError>;
}

/// Builds an RPC client for a freshly discovered gateway instance.
pub trait GatewayConnector: Send + Sync {
    fn connect(&self, instance: &Instance) -> Result<Arc<dyn GatewayRpc>, RpcError>;
}

/// Production connector: framed TCP with a fixed connection pool.
pub struct TcpConnector {
    config: RpcConfig,
}

impl TcpConnector {
    pub fn new(config: RpcConfig) -> Self {
        Self { config }
    }
}

impl GatewayConnector for TcpConnector {
    fn connect(&self, instance: &Instance) -> Result<Arc<dyn GatewayRpc>, RpcError> {
        // Dialing is lazy; construction cannot fail here.
        Ok(Arc::new(tcp::TcpGateway::new(
            instance.addr.clone(),
            self.config,
        )))
    }
}
