//! blockwatch-ws — WebSocket JSON-RPC node client for BlockWatch.
//!
//! # Features
//! - Eager dial: a node that cannot be reached fails `connect`
//! - `eth_subscribe("newHeads")` / `eth_unsubscribe`
//! - `eth_getLogs` over the same socket
//! - Subscriptions are failed (not silently dropped) when the socket dies
//! - Subscribing on a dead socket redials once first

pub mod client;
pub mod request;
pub mod subscriptions;

pub use client::WsNodeClient;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use subscriptions::{SubscriptionId, SubscriptionManager};
