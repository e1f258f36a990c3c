//! End-to-end flow: discovery-driven membership feeding dispatch fan-out,
//! over recording transports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time;

use plume_proto::frame::Frame;
use plume_proto::ops::OP_RAW;
use plume_proto::rpc::{BroadcastReq, BroadcastRoomReq, PushKeysReq};

use push_dispatch::backend::{BackendSet, Reconciler};
use push_dispatch::config::RoomConfig;
use push_dispatch::discovery::{DiscoveryFeed, Instance, ZoneMap};
use push_dispatch::dispatch::{Dispatcher, PushMessage, KIND_BROADCAST, KIND_PUSH, KIND_ROOM};
use push_dispatch::error::RpcError;
use push_dispatch::room::RoomRegistry;
use push_dispatch::rpc::{GatewayConnector, GatewayRpc};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    PushKeys(PushKeysReq),
    Broadcast(BroadcastReq),
    BroadcastRoom(BroadcastRoomReq),
}

#[derive(Default)]
struct RecordingRpc {
    calls: Mutex<Vec<Call>>,
}

impl RecordingRpc {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GatewayRpc for RecordingRpc {
    async fn push_keys(&self, req: PushKeysReq) -> Result<(), RpcError> {
        self.calls.lock().push(Call::PushKeys(req));
        Ok(())
    }

    async fn broadcast(&self, req: BroadcastReq) -> Result<(), RpcError> {
        self.calls.lock().push(Call::Broadcast(req));
        Ok(())
    }

    async fn broadcast_room(&self, req: BroadcastRoomReq) -> Result<(), RpcError> {
        self.calls.lock().push(Call::BroadcastRoom(req));
        Ok(())
    }
}

/// Hands each hostname a stable recording client, so tests can inspect what
/// any gateway received across membership generations.
#[derive(Default)]
struct Fleet {
    rpcs: Mutex<HashMap<String, Arc<RecordingRpc>>>,
}

impl Fleet {
    fn rpc(&self, hostname: &str) -> Arc<RecordingRpc> {
        self.rpcs
            .lock()
            .entry(hostname.to_string())
            .or_default()
            .clone()
    }
}

impl GatewayConnector for Fleet {
    fn connect(&self, instance: &Instance) -> Result<Arc<dyn GatewayRpc>, RpcError> {
        Ok(self.rpc(&instance.hostname))
    }
}

/// Feed driven by a channel of snapshots; closes when the sender drops.
struct ScriptedFeed {
    events: mpsc::Receiver<ZoneMap>,
    current: Option<ZoneMap>,
}

fn scripted_feed() -> (mpsc::Sender<ZoneMap>, ScriptedFeed) {
    let (tx, rx) = mpsc::channel(8);
    (
        tx,
        ScriptedFeed {
            events: rx,
            current: None,
        },
    )
}

#[async_trait]
impl DiscoveryFeed for ScriptedFeed {
    async fn changed(&mut self) -> bool {
        match self.events.recv().await {
            Some(zones) => {
                self.current = Some(zones);
                true
            }
            None => false,
        }
    }

    async fn fetch(&self) -> Option<ZoneMap> {
        self.current.clone()
    }
}

fn zone(hosts: &[&str]) -> ZoneMap {
    let mut zones = ZoneMap::new();
    zones.insert(
        "z1".to_string(),
        hosts
            .iter()
            .map(|h| Instance {
                hostname: h.to_string(),
                addr: format!("{h}.gateway.internal:7020"),
            })
            .collect(),
    );
    zones
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn envelope(kind: &str) -> PushMessage {
    PushMessage {
        kind: kind.to_string(),
        operation: 5,
        server: String::new(),
        keys: vec![],
        room: String::new(),
        speed: 0,
        body: b"hello".to_vec(),
    }
}

#[tokio::test]
async fn membership_changes_drive_fanout() {
    let backends = BackendSet::new();
    let fleet = Arc::new(Fleet::default());
    let reconciler = Reconciler::new(
        backends.clone(),
        fleet.clone(),
        "z1".to_string(),
        Duration::from_secs(1),
    );
    let (tx, feed) = scripted_feed();
    let watch_task = tokio::spawn(reconciler.run(feed));

    tx.send(zone(&["gw-a", "gw-b"])).await.unwrap();
    wait_for(|| backends.len() == 2).await;
    let first_a = backends.get("gw-a").unwrap();
    let b = backends.get("gw-b").unwrap();

    let rooms = RoomRegistry::new(
        backends.clone(),
        RoomConfig {
            batch: 5,
            signal: Duration::from_millis(100),
            idle: Duration::from_secs(60),
        },
    );
    let dispatcher = Dispatcher::new(backends.clone(), rooms);

    // Direct push targets exactly the named gateway, with the payload framed
    // and raw-wrapped.
    let mut push = envelope(KIND_PUSH);
    push.server = "gw-a".to_string();
    push.keys = vec!["k1".to_string(), "k2".to_string()];
    dispatcher.dispatch(&push).await.unwrap();

    let calls = fleet.rpc("gw-a").calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        Call::PushKeys(req) => {
            assert_eq!(req.keys, ["k1", "k2"]);
            assert_eq!(req.proto_op, 5);
            let outer = Frame::decode_exact(&req.frame).unwrap();
            assert_eq!(outer.op, OP_RAW);
            let inner = Frame::decode_exact(&outer.body).unwrap();
            assert_eq!(inner.op, 5);
            assert_eq!(&inner.body[..], b"hello");
        }
        other => panic!("unexpected call {other:?}"),
    }
    assert!(fleet.rpc("gw-b").calls().is_empty());

    // Membership moves to {A, C}: B is cancelled, A keeps its endpoint.
    tx.send(zone(&["gw-a", "gw-c"])).await.unwrap();
    wait_for(|| backends.get("gw-c").is_some()).await;
    assert!(b.is_cancelled());
    assert!(backends.get("gw-b").is_none());
    let second_a = backends.get("gw-a").unwrap();
    assert!(Arc::ptr_eq(&first_a, &second_a));

    // Broadcast splits the speed budget across the current generation only.
    let mut broadcast = envelope(KIND_BROADCAST);
    broadcast.speed = 100;
    dispatcher.dispatch(&broadcast).await.unwrap();

    for host in ["gw-a", "gw-c"] {
        let calls = fleet.rpc(host).calls();
        match calls.last() {
            Some(Call::Broadcast(req)) => assert_eq!(req.speed, 50, "{host}"),
            other => panic!("{host}: expected a broadcast, got {other:?}"),
        }
    }
    assert!(fleet.rpc("gw-b").calls().is_empty());

    // Closing the feed ends the watch loop.
    drop(tx);
    time::timeout(Duration::from_secs(1), watch_task)
        .await
        .expect("watch loop should exit when the feed closes")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn room_traffic_below_threshold_flushes_on_the_timer() {
    let backends = BackendSet::new();
    let fleet = Arc::new(Fleet::default());
    let reconciler = Reconciler::new(
        backends.clone(),
        fleet.clone(),
        "z1".to_string(),
        Duration::from_secs(1),
    );
    let (tx, feed) = scripted_feed();
    tokio::spawn(reconciler.run(feed));
    tx.send(zone(&["gw-a"])).await.unwrap();
    wait_for(|| backends.len() == 1).await;

    let rooms = RoomRegistry::new(
        backends.clone(),
        RoomConfig {
            batch: 5,
            signal: Duration::from_millis(100),
            idle: Duration::from_secs(60),
        },
    );
    let dispatcher = Dispatcher::new(backends.clone(), rooms);

    for body in [&b"one"[..], b"two", b"three"] {
        let mut msg = envelope(KIND_ROOM);
        msg.room = "r1".to_string();
        msg.body = body.to_vec();
        dispatcher.dispatch(&msg).await.unwrap();
    }

    // Three of five buffered: nothing on the wire yet.
    let room_calls = |rpc: &RecordingRpc| {
        rpc.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::BroadcastRoom(_)))
            .collect::<Vec<_>>()
    };
    assert!(room_calls(&fleet.rpc("gw-a")).is_empty());

    wait_for(|| !room_calls(&fleet.rpc("gw-a")).is_empty()).await;

    let calls = room_calls(&fleet.rpc("gw-a"));
    assert_eq!(calls.len(), 1);
    let Call::BroadcastRoom(req) = &calls[0] else {
        unreachable!();
    };
    assert_eq!(req.room_id, "r1");

    let outer = Frame::decode_exact(&req.frame).unwrap();
    assert_eq!(outer.op, OP_RAW);
    let mut expected = Vec::new();
    for body in [&b"one"[..], b"two", b"three"] {
        expected.extend_from_slice(&Frame::new(5, body.to_vec()).encode_to_bytes());
    }
    assert_eq!(&outer.body[..], expected.as_slice());
}
