//! Error types for the watch loop.

use thiserror::Error;

/// Errors that can occur while watching the chain.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Subscription closed by the node")]
    SubscriptionClosed,

    #[error("No new heads for {ms}ms")]
    Idle { ms: u64 },

    #[error("Checkpoint I/O error: {0}")]
    Checkpoint(#[from] std::io::Error),

    #[error("Malformed node payload: {0}")]
    Malformed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
