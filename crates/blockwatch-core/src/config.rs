//! Watcher configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::types::TargetAddress;

/// Everything the watcher needs, passed in at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// WebSocket RPC endpoint, e.g. `"wss://mainnet.infura.io/ws/v3/<key>"`.
    pub node_endpoint: String,
    /// Address whose logs are reported.
    pub target_address: TargetAddress,
    /// File holding the last processed block height.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    /// Upper bound on a single `eth_getLogs` call (milliseconds).
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Pause before the single resubscribe attempt (milliseconds).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Treat this much silence on the subscription as an error.
    /// `None` waits forever.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("last_block.txt")
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

impl WatcherConfig {
    /// Config with default timings for one endpoint and address.
    pub fn new(node_endpoint: impl Into<String>, target_address: TargetAddress) -> Self {
        Self {
            node_endpoint: node_endpoint.into(),
            target_address,
            checkpoint_path: default_checkpoint_path(),
            query_timeout_ms: default_query_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            idle_timeout_ms: None,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Reject configurations the watcher cannot start with.
    pub fn validate(&self) -> Result<(), WatchError> {
        let endpoint = self.node_endpoint.trim();
        if endpoint.is_empty() {
            return Err(WatchError::Config("node endpoint is empty".into()));
        }
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(WatchError::Config(format!(
                "node endpoint '{endpoint}' must be a ws:// or wss:// URL"
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WatchError::Config("query timeout must be non-zero".into()));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(WatchError::Config("idle timeout must be non-zero".into()));
        }
        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(WatchError::Config("checkpoint path is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x00000000219ab540356cbb839cbe05303d7705fa";

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: WatcherConfig = serde_json::from_value(serde_json::json!({
            "node_endpoint": "wss://node.example/ws",
            "target_address": ADDR,
        }))
        .unwrap();
        assert_eq!(cfg.query_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.retry_delay(), Duration::from_secs(5));
        assert_eq!(cfg.checkpoint_path, PathBuf::from("last_block.txt"));
        assert!(cfg.idle_timeout().is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn invalid_address_fails_deserialization() {
        let res: Result<WatcherConfig, _> = serde_json::from_value(serde_json::json!({
            "node_endpoint": "wss://node.example/ws",
            "target_address": "0xYourWalletAddress",
        }));
        assert!(res.is_err());
    }

    #[test]
    fn validate_rejects_http_endpoint_and_zero_timeout() {
        let mut cfg = WatcherConfig::new("https://node.example", ADDR.parse().unwrap());
        assert!(cfg.validate().is_err());

        cfg.node_endpoint = "ws://127.0.0.1:8546".into();
        cfg.validate().unwrap();

        cfg.query_timeout_ms = 0;
        assert!(matches!(cfg.validate(), Err(WatchError::Config(_))));
    }
}
