//! Resubscription after a subscription error.
//!
//! One error signal buys exactly one resubscribe attempt after a fixed
//! delay. There is no retry loop and no backoff growth; if the attempt fails
//! the watcher keeps listening on whatever it still has.

use std::time::Duration;

use crate::error::WatchError;
use crate::watcher::{HeadSubscriber, HeadSubscription};

/// Fixed-delay, single-attempt resubscription.
#[derive(Debug, Clone)]
pub struct Resubscriber {
    delay: Duration,
}

impl Resubscriber {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Log `cause`, wait the fixed delay, then try to subscribe once.
    pub async fn recover<S>(
        &self,
        subscriber: &S,
        cause: &WatchError,
    ) -> Result<HeadSubscription, WatchError>
    where
        S: HeadSubscriber + ?Sized,
    {
        tracing::warn!(
            error = %cause,
            delay_ms = self.delay.as_millis() as u64,
            "subscription error, resubscribing after delay"
        );
        tokio::time::sleep(self.delay).await;

        match subscriber.subscribe_heads().await {
            Ok(sub) => {
                tracing::info!(subscription = %sub.id, "resubscribed to new heads");
                Ok(sub)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to resubscribe");
                Err(e)
            }
        }
    }
}
