//! Push-dispatch tier: consumes outbound messages from the durable queue and
//! fans them out to the gateway fleet discovered for the local zone.

pub mod backend;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod room;
pub mod rpc;
