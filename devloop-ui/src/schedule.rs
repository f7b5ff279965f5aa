//! Interval timers: periodic cycle triggers and status reports.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, warn};

use crate::state::AppState;

/// Spawn both timers. The first cycle fires immediately; the first status
/// report waits one full interval.
pub fn start(state: AppState, cycle_every: Duration, status_every: Duration) {
    let cycles = state.clone();
    tokio::spawn(async move {
        let mut tick = interval(cycle_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if !cycles.trigger_cycle() {
                debug!("scheduled cycle skipped: already running");
            }
        }
    });

    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + status_every, status_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let engine = Arc::clone(&state.engine);
            match tokio::task::spawn_blocking(move || engine.send_status_report()).await {
                Ok(Ok(())) => debug!("status report sent"),
                Ok(Err(err)) => warn!(error = %format!("{err:#}"), "status report failed"),
                Err(err) => warn!(error = %err, "status report task failed"),
            }
        }
    });
}
