//! Framed-TCP gateway transport.
//!
//! Each request is one frame (op = request type, body = JSON envelope); the
//! gateway answers with one ack frame. A fixed pool of connections is dialed
//! lazily and picked round-robin; any error on a connection drops it so the
//! next call re-dials.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use plume_proto::frame::{Frame, HEADER_LEN, MAX_BODY_LEN};
use plume_proto::rpc::{Ack, BroadcastReq, BroadcastRoomReq, PushKeysReq, RpcMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time;

use crate::config::RpcConfig;
use crate::error::RpcError;

use super::GatewayRpc;

pub struct TcpGateway {
    addr: String,
    config: RpcConfig,
    slots: Vec<Mutex<Option<TcpStream>>>,
    next: AtomicUsize,
}

impl TcpGateway {
    pub fn new(addr: String, config: RpcConfig) -> Self {
        let slots = (0..config.pool_size.max(1)).map(|_| Mutex::new(None)).collect();
        Self {
            addr,
            config,
            slots,
            next: AtomicUsize::new(0),
        }
    }

    async fn call<M: RpcMessage>(&self, req: &M) -> Result<(), RpcError> {
        let frame = req.to_frame()?;

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[idx].lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.dial().await?,
        };

        match time::timeout(self.config.call_timeout, exchange(&mut stream, &frame)).await {
            Ok(Ok(ack)) => {
                // Only a clean exchange returns the connection to the pool.
                *slot = Some(stream);
                if ack.ok {
                    Ok(())
                } else {
                    Err(RpcError::Rejected(ack.error.unwrap_or_default()))
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RpcError::CallTimeout),
        }
    }

    async fn dial(&self) -> Result<TcpStream, RpcError> {
        let stream = time::timeout(self.config.dial_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| RpcError::DialTimeout)??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

async fn exchange(stream: &mut TcpStream, frame: &Frame) -> Result<Ack, RpcError> {
    let mut out = BytesMut::with_capacity(frame.encoded_len());
    frame.encode(&mut out);
    stream.write_all(&out).await?;

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let body_len = u32::from_be_bytes([header[6], header[7], header[8], header[9]]) as usize;
    if body_len > MAX_BODY_LEN {
        return Err(plume_proto::Error::BodyTooLarge(body_len).into());
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    buf.extend_from_slice(&header);
    buf.resize(HEADER_LEN + body_len, 0);
    stream.read_exact(&mut buf[HEADER_LEN..]).await?;

    let ack_frame = Frame::decode(&mut buf)?.ok_or(plume_proto::Error::Incomplete)?;
    Ok(Ack::from_frame(&ack_frame)?)
}

#[async_trait]
impl GatewayRpc for TcpGateway {
    async fn push_keys(&self, req: PushKeysReq) -> Result<(), RpcError> {
        self.call(&req).await
    }

    async fn broadcast(&self, req: BroadcastReq) -> Result<(), RpcError> {
        self.call(&req).await
    }

    async fn broadcast_room(&self, req: BroadcastRoomReq) -> Result<(), RpcError> {
        self.call(&req).await
    }
}
