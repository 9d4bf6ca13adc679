//! The SwarmManager core: supervisor, fan-out, and control-plane RPC.

mod manager;
mod rpc;
mod subscriber_hub;

pub use manager::{StopAllResult, SwarmManager, SwarmManagerHandle};
pub use rpc::RpcTracker;
pub use subscriber_hub::{SubscriberHandle, SubscriberHub};
