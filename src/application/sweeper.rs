use super::lifecycle::SubscriptionLifecycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Runs the expiry sweep every `period` until the handle is aborted.
///
/// A failing sweep is logged and retried on the next tick.
pub fn spawn(lifecycle: Arc<SubscriptionLifecycle>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match lifecycle.sweep_expired().await {
                Ok(expired) => debug!(expired, "Expiry sweep finished"),
                Err(e) => error!(error = %e, "Expiry sweep failed"),
            }
        }
    })
}
