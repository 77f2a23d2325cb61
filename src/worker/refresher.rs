use std::time::Duration;

use tokio::sync::mpsc;

/// Floor for the refresh interval so a tiny freshness window cannot turn
/// the heartbeat into a busy loop.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Paces the owner's mtime heartbeats.
///
/// The cadence is a third of the freshness window, so two consecutive
/// refreshes can be lost before the lease is even eligible to expire.
pub struct RefreshCadence {
    interval: Duration,
}

impl RefreshCadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_REFRESH_INTERVAL),
        }
    }

    pub fn for_window(freshness_window: Duration) -> Self {
        Self::new(freshness_window / 3)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the pacer, sending a unit on each beat until the receiver drops.
    pub async fn run(&self, tx: mpsc::Sender<()>) {
        let mut interval = tokio::time::interval(self.interval);
        // The immediate first tick would refresh a lease acquired
        // microseconds ago; skip it.
        interval.tick().await;

        loop {
            interval.tick().await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
