use chrono::{DateTime, Utc};
use mariner_order::{ExpirySummary, OrderManager};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

/// Periodically moves stale pending and paid orders to `expired`.
pub async fn start_expiry_worker(orders: Arc<OrderManager>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Expiry worker started, sweeping every {:?}", every);

    loop {
        ticker.tick().await;
        sweep(&orders, Utc::now()).await;
    }
}

/// One sweep. Failures are logged and retried on the next tick.
pub async fn sweep(orders: &OrderManager, now: DateTime<Utc>) -> Option<ExpirySummary> {
    match orders.expire_stale(now).await {
        Ok(summary) => {
            debug!(expired = summary.total(), "Expiry sweep done");
            Some(summary)
        }
        Err(e) => {
            error!("Expiry sweep failed: {}", e);
            None
        }
    }
}
