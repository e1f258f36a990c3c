//! Per-room message aggregation.
//!
//! Every active room owns an independent buffer plus a timer pair (flush
//! signal, idle eviction). Rooms are created lazily on first push and remove
//! themselves once idle. Existence changes (create/evict) go through one
//! coarse guard on the room mapping; buffer mutation uses each room's own
//! lock, so traffic to different rooms never contends.
//!
//! A buffered room message is one encoded inner frame; a flush concatenates
//! everything buffered since the last flush, wraps it in a single outer raw
//! frame, and broadcasts it to every backend in the current snapshot. At most
//! one flush per room is in flight at a time, which keeps per-room delivery
//! in arrival order without holding any lock across the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use plume_proto::frame::Frame;
use plume_proto::ops::OP_RAW;
use tokio::time;

use crate::backend::BackendSet;
use crate::config::RoomConfig;

/// Outcome of appending one frame to a room buffer.
enum Append {
    /// Buffered; the signal timer will pick it up.
    Buffered,
    /// Batch threshold reached; the caller flushes these bytes before
    /// returning.
    Flush(Bytes),
    /// The room lost a race with eviction; look up a fresh one.
    Evicted,
}

struct RoomState {
    buf: BytesMut,
    count: usize,
    last_activity: Instant,
    /// Cleared by each idle check, set by pushes and completed flushes.
    active: bool,
    /// True while one flush owns bytes taken from the buffer.
    flushing: bool,
    /// Set under the registry guard when the room leaves the mapping.
    evicted: bool,
}

struct Room {
    id: String,
    batch: usize,
    backends: BackendSet,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(id: String, batch: usize, backends: BackendSet) -> Self {
        Self {
            id,
            batch,
            backends,
            state: Mutex::new(RoomState {
                buf: BytesMut::new(),
                count: 0,
                last_activity: Instant::now(),
                active: true,
                flushing: false,
                evicted: false,
            }),
        }
    }

    fn append(&self, frame: &[u8]) -> Append {
        let mut state = self.state.lock();
        if state.evicted {
            return Append::Evicted;
        }
        state.buf.extend_from_slice(frame);
        state.count += 1;
        state.last_activity = Instant::now();
        state.active = true;
        if state.count >= self.batch && !state.flushing {
            state.flushing = true;
            state.count = 0;
            return Append::Flush(state.buf.split().freeze());
        }
        Append::Buffered
    }

    /// Timer path: take the buffer if it has traffic and no flush is running.
    fn take_pending(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        if state.count == 0 || state.flushing {
            return None;
        }
        state.flushing = true;
        state.count = 0;
        Some(state.buf.split().freeze())
    }

    /// Broadcast taken bytes, then release the flush slot. If the batch
    /// threshold was crossed again while broadcasting, keep going so the
    /// backlog drains in order.
    async fn flush(&self, bytes: Bytes) {
        let mut pending = bytes;
        loop {
            self.broadcast_batch(pending).await;
            let mut state = self.state.lock();
            state.active = true;
            state.last_activity = Instant::now();
            if state.count >= self.batch {
                state.count = 0;
                pending = state.buf.split().freeze();
                continue;
            }
            state.flushing = false;
            return;
        }
    }

    async fn broadcast_batch(&self, bytes: Bytes) {
        let snapshot = self.backends.snapshot();
        if snapshot.is_empty() {
            tracing::warn!(room = %self.id, "no live backends for room flush, dropping batch");
            return;
        }
        let frame = Frame::new(OP_RAW, bytes).encode_to_bytes();
        tracing::debug!(
            room = %self.id,
            backends = snapshot.len(),
            bytes = frame.len(),
            "room flush"
        );
        for endpoint in snapshot.values() {
            // The endpoint logs its own failures; the next flush carries
            // only new traffic.
            let _ = endpoint.broadcast_room(&self.id, frame.to_vec()).await;
        }
    }
}

struct Shared {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    backends: BackendSet,
    config: RoomConfig,
}

impl Shared {
    /// Idle check. Evicts only when the buffer is drained, no flush is in
    /// flight, and nothing touched the room since the previous check.
    fn try_evict(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.lock();
        let mut state = room.state.lock();
        if state.evicted {
            return true;
        }
        if state.count == 0 && !state.flushing && !state.active {
            state.evicted = true;
            // The mapping may already hold a successor under this id; only
            // ever remove our own entry.
            if rooms.get(&room.id).is_some_and(|entry| Arc::ptr_eq(entry, room)) {
                rooms.remove(&room.id);
            }
            tracing::debug!(
                room = %room.id,
                idle_for = ?state.last_activity.elapsed(),
                "room aggregator evicted"
            );
            return true;
        }
        state.active = false;
        false
    }
}

/// Lazily populated mapping of room id to its live aggregator.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Shared>,
}

impl RoomRegistry {
    pub fn new(backends: BackendSet, config: RoomConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                rooms: Mutex::new(HashMap::new()),
                backends,
                config,
            }),
        }
    }

    /// Frame the payload and buffer it on the room's aggregator. Reaches the
    /// network only when this push crosses the batch threshold, in which
    /// case the flush completes before returning.
    pub async fn push(&self, room_id: &str, operation: i32, payload: &[u8]) {
        let frame = Frame::new(operation, payload.to_vec()).encode_to_bytes();
        loop {
            let room = self.lookup_or_create(room_id);
            match room.append(&frame) {
                Append::Buffered => return,
                Append::Flush(bytes) => {
                    room.flush(bytes).await;
                    return;
                }
                // Raced an eviction; the next lookup creates a fresh room.
                Append::Evicted => continue,
            }
        }
    }

    /// Number of live aggregators.
    pub fn active_rooms(&self) -> usize {
        self.inner.rooms.lock().len()
    }

    fn lookup_or_create(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.inner.rooms.lock();
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }
        let room = Arc::new(Room::new(
            room_id.to_string(),
            self.inner.config.batch,
            self.inner.backends.clone(),
        ));
        rooms.insert(room_id.to_string(), room.clone());
        tokio::spawn(run_timers(room.clone(), self.inner.clone()));
        tracing::debug!(room = %room_id, "room aggregator created");
        room
    }
}

/// Per-room timer pair: signal-interval flush and idle eviction. Exits when
/// the room evicts itself.
async fn run_timers(room: Arc<Room>, shared: Arc<Shared>) {
    let mut flush_tick = time::interval(shared.config.signal);
    let mut idle_tick = time::interval(shared.config.idle);
    // The first tick of an interval fires immediately; skip both.
    flush_tick.tick().await;
    idle_tick.tick().await;

    loop {
        tokio::select! {
            _ = flush_tick.tick() => {
                if let Some(bytes) = room.take_pending() {
                    room.flush(bytes).await;
                }
            }
            _ = idle_tick.tick() => {
                if shared.try_evict(&room) {
                    break;
                }
            }
        }
    }
}
