//! Log matcher — finds logs emitted by the target address in one block.
//!
//! Each query covers the inclusive range `[h, h]` and is bounded by the
//! configured timeout. A timed-out or failed query is not retried here; the
//! caller decides what to do with the error. Every log the node returns is a
//! match, reported at the queried height.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::WatchError;
use crate::types::{LogFilter, LogMatch, RawLog, TargetAddress};

/// Pull side of the node connection (`eth_getLogs`).
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, WatchError>;
}

/// Time-bounded, address-filtered log query over a single block.
pub struct LogMatcher<S> {
    source: S,
    target: TargetAddress,
    timeout: Duration,
}

impl<S: LogSource> LogMatcher<S> {
    pub fn new(source: S, target: TargetAddress, timeout: Duration) -> Self {
        Self {
            source,
            target,
            timeout,
        }
    }

    pub fn target(&self) -> &TargetAddress {
        &self.target
    }

    /// Matches for block `number`, in the order the node returned them.
    pub async fn matches_in_block(&self, number: u64) -> Result<Vec<LogMatch>, WatchError> {
        let filter = LogFilter::single_block(self.target.clone(), number);

        let logs = tokio::time::timeout(self.timeout, self.source.get_logs(&filter))
            .await
            .map_err(|_| WatchError::Timeout {
                ms: self.timeout.as_millis() as u64,
            })??;

        let matches = logs
            .iter()
            .map(|log| LogMatch::from_raw(log, number))
            .collect::<Vec<_>>();

        tracing::debug!(
            block = number,
            logs = logs.len(),
            matches = matches.len(),
            "log query complete"
        );
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const ADDR: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

    fn raw(tx: &str, block: &str, removed: Option<bool>) -> RawLog {
        RawLog {
            address: ADDR.into(),
            topics: vec![],
            data: "0x".into(),
            block_number: block.into(),
            block_hash: "0x0".into(),
            tx_hash: tx.into(),
            log_index: "0x0".into(),
            removed,
        }
    }

    struct FixedSource {
        logs: Vec<RawLog>,
        seen: Mutex<Vec<LogFilter>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl LogSource for FixedSource {
        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, WatchError> {
            self.seen.lock().unwrap().push(filter.clone());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            Ok(self.logs.clone())
        }
    }

    #[tokio::test]
    async fn queries_single_block_range() {
        let source = FixedSource {
            logs: vec![raw("0xa", "0x4d", None), raw("0xb", "0x4d", Some(false))],
            seen: Mutex::new(vec![]),
            delay: None,
        };
        let matcher = LogMatcher::new(source, ADDR.parse().unwrap(), Duration::from_secs(10));

        let found = matcher.matches_in_block(77).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].tx_hash, "0xa");
        assert_eq!(found[1].block_number, 77);

        let seen = matcher.source.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from_block, 77);
        assert_eq!(seen[0].to_block, 77);
    }

    #[tokio::test]
    async fn every_log_is_reported_at_queried_height() {
        // Node-side block numbers and reorg flags do not change what is reported.
        let source = FixedSource {
            logs: vec![raw("0xa", "0x1", Some(true)), raw("0xb", "0x2", None)],
            seen: Mutex::new(vec![]),
            delay: None,
        };
        let matcher = LogMatcher::new(source, ADDR.parse().unwrap(), Duration::from_secs(1));
        let found = matcher.matches_in_block(5).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].tx_hash, "0xa");
        assert_eq!(found[0].block_number, 5);
        assert_eq!(found[1].block_number, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_query_times_out() {
        let source = FixedSource {
            logs: vec![raw("0xa", "0x1", None)],
            seen: Mutex::new(vec![]),
            delay: Some(Duration::from_secs(30)),
        };
        let matcher = LogMatcher::new(source, ADDR.parse().unwrap(), Duration::from_secs(10));
        let err = matcher.matches_in_block(1).await.unwrap_err();
        assert!(matches!(err, WatchError::Timeout { ms: 10_000 }));
    }
}
