//! Periodic blacklist sweep
//!
//! Spawns one task per pool that purges expired bans on a fixed timer. The
//! task runs until the shared shutdown signal fires.

use std::sync::Arc;
use std::time::Duration;

use common::ShutdownSignal;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::pool::RotationPool;

/// Spawn a background task that sweeps expired bans every `interval`.
///
/// Returns a `JoinHandle` that completes after shutdown fires.
pub fn spawn_sweep_task(
    pool: Arc<RotationPool>,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick is immediate and the blacklist starts empty
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    debug!(pool = pool.name(), "sweep task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = pool.sweep(Instant::now());
                    if removed > 0 {
                        info!(pool = pool.name(), removed, "expired bans swept");
                    }
                }
            }
        }
    })
}
