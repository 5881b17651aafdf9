//! blockwatch-core — watch new block heads for logs emitted by one address.
//!
//! # Architecture
//!
//! ```text
//! HeadWatcher::run  (tokio::select! over headers / errors)
//!      ├── HeadSubscriber   (node push subscription: newHeads)
//!      ├── Resubscriber     (fixed delay, exactly one resubscribe per error)
//!      ├── LogMatcher       (time-bounded eth_getLogs over [h, h])
//!      ├── CheckpointStore  (last processed height, file / memory)
//!      └── MatchReporter    (console notification per match)
//! ```
//!
//! The crate is transport-agnostic; `blockwatch-ws` provides the WebSocket
//! implementation of [`HeadSubscriber`] and [`LogSource`].

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod matcher;
pub mod resilience;
pub mod types;
pub mod watcher;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::WatcherConfig;
pub use error::WatchError;
pub use matcher::{LogMatcher, LogSource};
pub use resilience::Resubscriber;
pub use types::{BlockHeader, LogFilter, LogMatch, RawLog, TargetAddress};
pub use watcher::{
    ConsoleReporter, HeadSubscriber, HeadSubscription, HeadWatcher, MatchReporter, WatchStats,
    WatcherState,
};
