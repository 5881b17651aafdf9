//! Effective configuration: YAML file, then environment, then flags.
//!
//! Environment variables are read by clap into the same fields as the
//! flags, so a flag given on the command line beats its variable and both
//! beat the file.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Deserialize;

use blockwatch_core::{TargetAddress, WatcherConfig};

use crate::logging::LogConfig;

const DEFAULT_CHECKPOINT_PATH: &str = "last_block.txt";

/// Contents of the `--config` YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub node_endpoint: Option<String>,
    pub target_address: Option<String>,
    pub checkpoint_path: Option<PathBuf>,
    pub query_timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    #[serde(default)]
    pub log: LogConfig,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file '{}'", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("invalid config file '{}'", path.display()))
    }
}

/// Watcher flags shared by every subcommand.
#[derive(Debug, Default, Clone, Args)]
pub struct WatchArgs {
    /// WebSocket RPC endpoint (ws:// or wss://)
    #[arg(long, global = true, env = "BLOCKWATCH_NODE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Contract address whose logs are reported
    #[arg(long, global = true, env = "BLOCKWATCH_TARGET_ADDRESS")]
    pub address: Option<String>,

    /// Checkpoint file (default: last_block.txt)
    #[arg(long, global = true, env = "BLOCKWATCH_CHECKPOINT_PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Timeout for one eth_getLogs call, in milliseconds
    #[arg(long, global = true)]
    pub query_timeout_ms: Option<u64>,

    /// Delay before the single resubscribe attempt, in milliseconds
    #[arg(long, global = true)]
    pub retry_delay_ms: Option<u64>,

    /// Treat this much silence on the subscription as an error
    #[arg(long, global = true)]
    pub idle_timeout_ms: Option<u64>,
}

/// Checkpoint file from the flags, then the file, then the default.
pub fn checkpoint_path(file: &FileSettings, args: &WatchArgs) -> PathBuf {
    args.checkpoint
        .clone()
        .or_else(|| file.checkpoint_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH))
}

/// Merge the file with the flags and validate the result.
pub fn resolve(file: &FileSettings, args: &WatchArgs) -> Result<WatcherConfig> {
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| file.node_endpoint.clone())
        .ok_or_else(|| {
            anyhow!("no node endpoint configured (--endpoint, BLOCKWATCH_NODE_ENDPOINT or node_endpoint)")
        })?;

    let address = args
        .address
        .as_deref()
        .or(file.target_address.as_deref())
        .ok_or_else(|| {
            anyhow!("no target address configured (--address, BLOCKWATCH_TARGET_ADDRESS or target_address)")
        })?;
    let address: TargetAddress = address.parse()?;

    let mut config = WatcherConfig::new(endpoint, address);
    config.checkpoint_path = checkpoint_path(file, args);
    if let Some(ms) = args.query_timeout_ms.or(file.query_timeout_ms) {
        config.query_timeout_ms = ms;
    }
    if let Some(ms) = args.retry_delay_ms.or(file.retry_delay_ms) {
        config.retry_delay_ms = ms;
    }
    config.idle_timeout_ms = args.idle_timeout_ms.or(file.idle_timeout_ms);

    config.validate()?;
    Ok(config)
}
