use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use keyrelay_pool::KeyPool;

pub const RELOAD_INTERVAL: Duration = Duration::from_secs(300);

/// Background task: re-read the key files every five minutes so keys
/// emitted by the external billing checker get picked up without a restart.
/// Abort the handle at shutdown, before the listener closes.
pub fn spawn_reloader(pool: Arc<KeyPool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RELOAD_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate tick; the pool was loaded at bootstrap.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match pool.reload() {
                Ok(count) => info!(event = "periodic_reload", keys = count),
                Err(err) => warn!(event = "periodic_reload_failed", error = %err),
            }
        }
    })
}
