//! Wire protocol types: the client WebSocket schema (§3, §6) and the
//! downstream agent runtime protocol.

mod client;
mod runtime_protocol;

pub use client::*;
pub use runtime_protocol::*;
