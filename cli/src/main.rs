//! BlockWatch CLI — watch new blocks for logs emitted by one address.
//!
//! # Commands
//! ```text
//! blockwatch [run]            --endpoint <wss://...> --address <0x...>
//! blockwatch checkpoint show
//! blockwatch checkpoint set <height>
//! blockwatch config
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;

use blockwatch_core::{
    CheckpointStore, FileCheckpointStore, HeadWatcher, MemoryCheckpointStore, WatcherConfig,
};
use blockwatch_ws::WsNodeClient;

mod logging;
mod settings;

use logging::{init_tracing, LogConfig};
use settings::{FileSettings, WatchArgs};

#[derive(Parser)]
#[command(
    name = "blockwatch",
    about = "Watch new blocks for logs emitted by one address",
    long_about = "
BlockWatch: subscribes to new block headers over WebSocket, queries each new
block for logs from the target address and prints one line per match:

  New TX: <tx hash> | Block: <height>

The last processed height is kept in a checkpoint file so restarts skip
blocks that were already handled.

ENVIRONMENT VARIABLES:
  BLOCKWATCH_NODE_ENDPOINT    WebSocket RPC endpoint
  BLOCKWATCH_TARGET_ADDRESS   Address to watch
  BLOCKWATCH_CHECKPOINT_PATH  Checkpoint file
  RUST_LOG                    Log filter (overrides --log-level)
",
    version
)]
struct Cli {
    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    watch: WatchArgs,

    /// Keep the checkpoint in memory only
    #[arg(long, global = true)]
    no_persist: bool,

    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the chain (default)
    Run,

    /// Inspect or reset the checkpoint file
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the stored height
    Show,
    /// Overwrite the stored height
    Set {
        /// New last-processed height
        height: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => FileSettings::load(path)?,
        None => FileSettings::default(),
    };

    init_tracing(&log_config(&file, &cli));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = settings::resolve(&file, &cli.watch)?;
            cmd_run(config, cli.no_persist).await
        }
        Commands::Checkpoint { action } => {
            let store = FileCheckpointStore::new(settings::checkpoint_path(&file, &cli.watch));
            cmd_checkpoint(&store, action).await
        }
        Commands::Config => cmd_config(&settings::resolve(&file, &cli.watch)?),
    }
}

fn log_config(file: &FileSettings, cli: &Cli) -> LogConfig {
    let mut log = file.log.clone();
    if let Some(level) = &cli.log_level {
        log.level = level.clone();
    }
    log.json |= cli.log_json;
    log
}

async fn cmd_run(config: WatcherConfig, no_persist: bool) -> Result<()> {
    let client = WsNodeClient::connect(&config.node_endpoint)
        .await
        .context("cannot start watcher")?;
    let client = Arc::new(client);

    let store: Box<dyn CheckpointStore> = if no_persist {
        tracing::info!("checkpoint persistence disabled");
        Box::new(MemoryCheckpointStore::new())
    } else {
        Box::new(FileCheckpointStore::new(&config.checkpoint_path))
    };

    let mut watcher = HeadWatcher::new(&config, Arc::clone(&client), client, store);
    let stats = watcher.stats_handle();

    tokio::select! {
        res = watcher.run() => res.context("cannot start watcher")?,
        _ = signal::ctrl_c() => {
            let stats = stats.lock().unwrap().clone();
            tracing::info!(
                blocks = stats.blocks_processed,
                matches = stats.matches_reported,
                query_failures = stats.query_failures,
                resubscribes = stats.resubscribe_attempts,
                "shutting down"
            );
        }
    }
    Ok(())
}

async fn cmd_checkpoint(store: &FileCheckpointStore, action: CheckpointAction) -> Result<()> {
    match action {
        CheckpointAction::Show => match store.load().await {
            Some(height) => println!("{height}"),
            None => println!("no checkpoint at {}", store.path().display()),
        },
        CheckpointAction::Set { height } => {
            let previous = store.load().await;
            store
                .save(height)
                .await
                .with_context(|| format!("cannot write {}", store.path().display()))?;
            tracing::info!(previous = ?previous, height, "checkpoint overwritten");
            println!("checkpoint set to {height}");
        }
    }
    Ok(())
}

fn cmd_config(config: &WatcherConfig) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
