//! Async loop around a [`FragmentScheduler`].

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, MissedTickBehavior};

use super::FragmentScheduler;
use crate::events::{route, Event};

/// Ticks `scheduler` every `tick_interval_ms` and routes the events it
/// subscribed to until the bus closes. Returns the scheduler for inspection.
pub async fn drive(
    mut scheduler: FragmentScheduler,
    mut events: broadcast::Receiver<Event>,
) -> FragmentScheduler {
    let period = Duration::from_millis(scheduler.config().tick_interval_ms.max(1));
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            received = events.recv() => match received {
                Ok(event) => {
                    route(&mut scheduler, event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("scheduler fell behind, {} events dropped", skipped);
                    scheduler.resync();
                }
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => scheduler.tick(),
        }
    }
    debug!("event bus closed, scheduler stopped in {}", scheduler.state());
    scheduler
}
