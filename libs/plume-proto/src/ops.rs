//! Operation codes.
//!
//! Codes below 100 are client-protocol operations carried end-to-end to the
//! connected client; the dispatcher treats them as opaque except for
//! [`OP_RAW`]. Codes from 100 up identify gateway RPC envelopes and never
//! leave the backend network.

/// Reserved outer operation: "forward this body unparsed". The body of a raw
/// frame is a fully encoded inner frame (or a concatenation of them, for
/// aggregated room traffic).
pub const OP_RAW: i32 = 9;

/// Push a pre-framed message to a set of subscriber keys on one gateway.
pub const OP_PUSH_KEYS: i32 = 101;

/// Broadcast a pre-framed message to every connection on one gateway.
pub const OP_BROADCAST: i32 = 102;

/// Broadcast a pre-framed message to one room's connections on one gateway.
pub const OP_BROADCAST_ROOM: i32 = 103;

/// Gateway acknowledgement of an RPC frame.
pub const OP_ACK: i32 = 104;
