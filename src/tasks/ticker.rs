//! Expiry Ticker Task
//!
//! Background task that fires once per precision interval and drives the
//! aging sweep of every folder registered with a strategy.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::strategy::StrategyInner;

/// Spawns the periodic ticking task for a strategy.
///
/// The task fires every `precision` and calls the strategy's sweep, which
/// ticks each live folder and prunes slots whose folder has been dropped.
/// Missed ticks are fired back-to-back (burst) rather than being skipped,
/// so a delayed task catches up instead of drifting.
///
/// The task holds a strong reference to the strategy state and only exits
/// when the stop flag is observed; the returned handle is aborted by
/// [`ExpiryStrategy::stop`](crate::ExpiryStrategy::stop) to cut the sleep
/// short.
pub(crate) fn spawn_ticker(strategy: Arc<StrategyInner>) -> tokio::task::JoinHandle<()> {
    let precision = strategy.precision();

    tokio::spawn(async move {
        debug!("expiry ticker started, precision {:?}", precision);

        let mut interval = tokio::time::interval(precision);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        // The first tick of a tokio interval completes immediately; the
        // aging sweep must not run before one full precision has elapsed.
        interval.tick().await;

        loop {
            interval.tick().await;
            if strategy.is_stopped() {
                break;
            }

            let expired = strategy.on_tick();
            if expired > 0 {
                info!("expiry sweep: removed {} expired entries", expired);
            } else {
                debug!("expiry sweep: no expired entries");
            }
        }

        debug!("expiry ticker stopped");
    })
}
