//! The head watcher — one control loop over a new-heads subscription.
//!
//! # Loop
//! Wait on the header channel and the error channel at once; whichever fires
//! first is handled (no priority between the two).
//!
//! On a header with height `h`:
//!   - `h <= checkpoint`: discard, no query and no write
//!   - otherwise query logs for `[h, h]`, report every match
//!   - save `h` whether or not the query succeeded (save failures are logged)
//!   - advance the in-memory checkpoint to `h`
//!
//! On an error: hand off to [`Resubscriber`] (fixed delay, one attempt).
//! A transport failure usually arrives as an error followed by a closed
//! header channel; the pair counts as one error signal.
//!
//! Only one block is processed at a time, so the checkpoint needs no locking.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::checkpoint::CheckpointStore;
use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::matcher::{LogMatcher, LogSource};
use crate::resilience::Resubscriber;
use crate::types::{BlockHeader, LogFilter, LogMatch, RawLog};

// ─── Subscription seam ────────────────────────────────────────────────────────

/// A live new-heads subscription: one channel of headers, one of errors.
pub struct HeadSubscription {
    /// Subscription id assigned by the node.
    pub id: String,
    pub headers: mpsc::UnboundedReceiver<BlockHeader>,
    pub errors: mpsc::UnboundedReceiver<WatchError>,
}

impl std::fmt::Debug for HeadSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadSubscription").field("id", &self.id).finish()
    }
}

/// Push side of the node connection (`eth_subscribe("newHeads")`).
#[async_trait]
pub trait HeadSubscriber: Send + Sync {
    async fn subscribe_heads(&self) -> Result<HeadSubscription, WatchError>;

    /// Drop a subscription that has been replaced. Best-effort.
    async fn unsubscribe(&self, _id: &str) -> Result<(), WatchError> {
        Ok(())
    }
}

#[async_trait]
impl<T: HeadSubscriber + ?Sized> HeadSubscriber for Arc<T> {
    async fn subscribe_heads(&self) -> Result<HeadSubscription, WatchError> {
        (**self).subscribe_heads().await
    }

    async fn unsubscribe(&self, id: &str) -> Result<(), WatchError> {
        (**self).unsubscribe(id).await
    }
}

#[async_trait]
impl<T: LogSource + ?Sized> LogSource for Arc<T> {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, WatchError> {
        (**self).get_logs(filter).await
    }
}

// ─── Reporting ────────────────────────────────────────────────────────────────

/// Receives every match found by the watcher.
pub trait MatchReporter: Send + Sync {
    fn report(&self, m: &LogMatch);
}

/// Prints `New TX: <hash> | Block: <height>` on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl MatchReporter for ConsoleReporter {
    fn report(&self, m: &LogMatch) {
        tracing::info!(tx = %m.tx_hash, block = m.block_number, log_index = m.log_index, "match");
        println!("{m}");
    }
}

// ─── State & stats ────────────────────────────────────────────────────────────

/// Runtime state of the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Not yet started.
    Idle,
    /// Consuming a healthy subscription.
    Subscribed,
    /// Waiting out the retry delay before resubscribing.
    Resubscribing,
    /// The last resubscribe attempt failed; listening on the old handle.
    Degraded,
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Resubscribing => write!(f, "resubscribing"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Counters for the watch loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub headers_seen: u64,
    pub headers_skipped: u64,
    pub blocks_processed: u64,
    pub matches_reported: u64,
    pub query_failures: u64,
    pub checkpoint_failures: u64,
    pub resubscribe_attempts: u64,
    pub resubscribe_failures: u64,
}

// ─── Watcher ──────────────────────────────────────────────────────────────────

/// What woke the loop up.
enum LoopEvent {
    Header(BlockHeader),
    Error(WatchError),
    /// Header channel closed after this subscription already signalled.
    HeadersClosed,
    ErrorsClosed,
    Exhausted,
}

/// Subscribes to new heads and reports logs from the target address.
pub struct HeadWatcher<H, L> {
    subscriber: H,
    matcher: LogMatcher<L>,
    store: Box<dyn CheckpointStore>,
    reporter: Box<dyn MatchReporter>,
    resubscriber: Resubscriber,
    idle_timeout: Option<Duration>,
    subscription: Option<HeadSubscription>,
    headers_open: bool,
    errors_open: bool,
    error_seen: bool,
    checkpoint: u64,
    state: WatcherState,
    stats: Arc<Mutex<WatchStats>>,
}

impl<H, L> HeadWatcher<H, L>
where
    H: HeadSubscriber,
    L: LogSource,
{
    pub fn new(
        config: &WatcherConfig,
        subscriber: H,
        logs: L,
        store: Box<dyn CheckpointStore>,
    ) -> Self {
        Self {
            subscriber,
            matcher: LogMatcher::new(logs, config.target_address.clone(), config.query_timeout()),
            store,
            reporter: Box::new(ConsoleReporter),
            resubscriber: Resubscriber::new(config.retry_delay()),
            idle_timeout: config.idle_timeout(),
            subscription: None,
            headers_open: false,
            errors_open: false,
            error_seen: false,
            checkpoint: 0,
            state: WatcherState::Idle,
            stats: Arc::new(Mutex::new(WatchStats::default())),
        }
    }

    /// Replace the console reporter.
    pub fn with_reporter(mut self, reporter: Box<dyn MatchReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Height of the last processed block.
    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Snapshot of the loop counters.
    pub fn stats(&self) -> WatchStats {
        self.stats.lock().unwrap().clone()
    }

    /// Shared handle to the counters, readable while `run` is in progress.
    pub fn stats_handle(&self) -> Arc<Mutex<WatchStats>> {
        Arc::clone(&self.stats)
    }

    /// Load the checkpoint and make the initial subscription.
    ///
    /// Errors here are startup errors; the caller should exit.
    pub async fn start(&mut self) -> Result<(), WatchError> {
        self.checkpoint = match self.store.load().await {
            Some(height) => {
                tracing::info!(checkpoint = height, "resuming from checkpoint");
                height
            }
            None => {
                tracing::info!("no checkpoint, starting from height 0");
                0
            }
        };

        let sub = self.subscriber.subscribe_heads().await?;
        tracing::info!(
            subscription = %sub.id,
            target = %self.matcher.target(),
            "monitoring for new transactions"
        );
        self.install(sub);
        Ok(())
    }

    /// Start (if needed) and run the loop. Only returns on a startup error.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        if self.state == WatcherState::Idle {
            self.start().await?;
        }

        loop {
            match self.next_event().await {
                LoopEvent::Header(header) => {
                    self.process_header(&header).await;
                }
                LoopEvent::Error(err) => self.handle_subscription_error(err).await,
                LoopEvent::HeadersClosed => {
                    tracing::debug!("header channel closed after subscription error");
                }
                LoopEvent::ErrorsClosed => {
                    tracing::debug!("subscription error channel closed");
                }
                LoopEvent::Exhausted => {
                    // Neither source can fire again and no idle timeout is
                    // configured: nothing will ever wake this loop.
                    tracing::error!(
                        state = %self.state,
                        "subscription is defunct and nothing is left to wait on; watcher stalled"
                    );
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Handle one header. Returns `true` if the block was processed (not
    /// discarded as stale).
    pub async fn process_header(&mut self, header: &BlockHeader) -> bool {
        let height = header.number;
        self.stats.lock().unwrap().headers_seen += 1;

        if height <= self.checkpoint {
            tracing::debug!(block = height, checkpoint = self.checkpoint, "stale head, skipping");
            self.stats.lock().unwrap().headers_skipped += 1;
            return false;
        }

        match self.matcher.matches_in_block(height).await {
            Ok(matches) => {
                for m in &matches {
                    self.reporter.report(m);
                }
                self.stats.lock().unwrap().matches_reported += matches.len() as u64;
            }
            Err(e) => {
                tracing::error!(block = height, error = %e, "error fetching logs");
                self.stats.lock().unwrap().query_failures += 1;
            }
        }

        if let Err(e) = self.store.save(height).await {
            tracing::error!(block = height, error = %e, "failed to save checkpoint");
            self.stats.lock().unwrap().checkpoint_failures += 1;
        }

        self.checkpoint = height;
        self.stats.lock().unwrap().blocks_processed += 1;
        true
    }

    /// Wait out the retry delay and resubscribe once.
    pub async fn handle_subscription_error(&mut self, err: WatchError) {
        self.state = WatcherState::Resubscribing;
        self.stats.lock().unwrap().resubscribe_attempts += 1;

        match self.resubscriber.recover(&self.subscriber, &err).await {
            Ok(sub) => {
                if let Some(old) = self.subscription.take() {
                    if let Err(e) = self.subscriber.unsubscribe(&old.id).await {
                        tracing::debug!(subscription = %old.id, error = %e, "unsubscribe failed");
                    }
                }
                self.install(sub);
            }
            Err(_) => {
                self.stats.lock().unwrap().resubscribe_failures += 1;
                self.state = WatcherState::Degraded;
            }
        }
    }

    fn install(&mut self, sub: HeadSubscription) {
        self.subscription = Some(sub);
        self.headers_open = true;
        self.errors_open = true;
        self.error_seen = false;
        self.state = WatcherState::Subscribed;
    }

    async fn next_event(&mut self) -> LoopEvent {
        let headers_open = self.headers_open;
        let errors_open = self.errors_open;
        let idle = self.idle_timeout;

        let Some(sub) = self.subscription.as_mut() else {
            return LoopEvent::Exhausted;
        };

        tokio::select! {
            header = sub.headers.recv(), if headers_open => match header {
                Some(h) => LoopEvent::Header(h),
                None => {
                    // Stop polling the closed stream. It is an error signal
                    // only if the subscription has not reported one already.
                    self.headers_open = false;
                    if let Ok(e) = sub.errors.try_recv() {
                        self.error_seen = true;
                        LoopEvent::Error(e)
                    } else if self.error_seen {
                        LoopEvent::HeadersClosed
                    } else {
                        self.error_seen = true;
                        LoopEvent::Error(WatchError::SubscriptionClosed)
                    }
                }
            },
            err = sub.errors.recv(), if errors_open => match err {
                Some(e) => {
                    self.error_seen = true;
                    LoopEvent::Error(e)
                }
                None => {
                    self.errors_open = false;
                    LoopEvent::ErrorsClosed
                }
            },
            _ = tokio::time::sleep(idle.unwrap_or_default()), if idle.is_some() => {
                LoopEvent::Error(WatchError::Idle {
                    ms: idle.unwrap_or_default().as_millis() as u64,
                })
            }
            else => LoopEvent::Exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(WatcherState::Subscribed.to_string(), "subscribed");
        assert_eq!(WatcherState::Degraded.to_string(), "degraded");
    }
}
