// Idle Reaper
// Background task that closes pooled connections left unused past the idle timeout

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::pool::ConnectionPool;

/// Tick period for a given idle timeout (a third of it, never zero)
pub fn reap_interval(idle_timeout: Duration) -> Duration {
    (idle_timeout / 3).max(Duration::from_millis(1))
}

/// Spawn the reaper. It runs until the returned handle is aborted.
pub fn spawn_idle_reaper(pool: Arc<ConnectionPool>) -> JoinHandle<()> {
    let period = reap_interval(pool.settings().idle_timeout);

    tokio::spawn(async move {
        info!("[Reaper] Started, checking every {:?}", period);
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            let reaped = pool.reap_idle().await;
            if reaped > 0 {
                info!("[Reaper] Closed {} idle connection(s)", reaped);
            } else {
                debug!("[Reaper] Nothing to close");
            }
        }
    })
}
