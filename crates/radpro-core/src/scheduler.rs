use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::poller::Poller;
use crate::transport::Transport;

/// Poll every `period` until `shutdown` resolves, then close the poller.
///
/// Each cycle is awaited before the next tick, and shutdown is checked before
/// every tick so no new cycle starts once it has been requested. Failed cycles
/// are logged and polling carries on.
pub async fn run_until<T, F>(poller: &mut Poller<T>, period: Duration, shutdown: F)
where
    T: Transport,
    F: Future<Output = ()>,
{
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown requested, stopping poller");
                break;
            }
            _ = ticker.tick() => {
                match poller.poll_once().await {
                    Ok(snapshot) => {
                        debug!(cycle = snapshot.cycle, cps = ?snapshot.cps, usvh = ?snapshot.usvh, "tick");
                    }
                    Err(err) => {
                        warn!(failures = poller.stats().consecutive_failures, "{err}");
                    }
                }
            }
        }
    }

    poller.close().await;
}
