use crate::coordinator::Coordinator;
use crate::session::ChatSurface;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Fixed-period poll loop. At most one cycle is ever in flight: the interval
/// skips ticks that fall due while a cycle runs, and the engine drops any
/// tick that still manages to overlap. Runs until the task is aborted.
pub async fn run<S: ChatSurface>(coordinator: Arc<Coordinator<S>>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(period_ms = period.as_millis() as u64, "poll loop started");
    loop {
        ticker.tick().await;
        let report = coordinator.poll_once().await;
        if report.skipped {
            debug!("poll tick dropped, previous cycle still running");
        } else if report.new_messages > 0 {
            info!(
                contacts = report.contacts,
                new_messages = report.new_messages,
                "poll cycle complete"
            );
        }
    }
}
