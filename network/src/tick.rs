//! Periodic tick source for the coordinator
//!
//! Ticks are produced by their own task so a slow coordinator never holds
//! up the timer. The channel holds a single tick; ticks that arrive while
//! one is still pending are dropped, so a busy coordinator sees one tick
//! rather than a backlog.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub type TickReceiver = mpsc::Receiver<()>;

pub fn spawn_tick_source(period: Duration) -> (TickReceiver, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of an interval completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match tx.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                Err(mpsc::error::TrySendError::Closed(())) => break,
            }
        }
    });
    (rx, handle)
}
