use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::raft::event::Event;

/// Generates a random election timeout within the configured range
pub fn random_election_timeout(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(timeout_ms as u64)
}

/// Restartable countdown that posts [`Event::ElectionTimeout`] whenever a
/// randomized interval passes without a reset.
///
/// Every reset or cancellation bumps a shared epoch. Timeout events carry the
/// epoch they fired under, so one that was already queued when the timer was
/// reset is recognised as stale by [`ElectionTimer::is_current`].
pub struct ElectionTimer {
    epoch: Arc<AtomicU64>,
    reset_tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

impl ElectionTimer {
    pub fn spawn(
        min: Duration,
        max: Duration,
        epoch: Arc<AtomicU64>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        epoch.fetch_add(1, Ordering::SeqCst);
        let (reset_tx, mut reset_rx) = mpsc::unbounded_channel::<()>();
        let task_epoch = Arc::clone(&epoch);

        let handle = tokio::spawn(async move {
            loop {
                let timeout = random_election_timeout(min, max);
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        let epoch = task_epoch.load(Ordering::SeqCst);
                        if events.send(Event::ElectionTimeout { epoch }).is_err() {
                            break;
                        }
                    }
                    reset = reset_rx.recv() => {
                        if reset.is_none() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            epoch,
            reset_tx,
            handle,
        }
    }

    /// Restarts the countdown with a fresh random timeout.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let _ = self.reset_tx.send(());
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}

impl Drop for ElectionTimer {
    fn drop(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.handle.abort();
    }
}

/// Fixed-interval ticker a leader uses to drive heartbeats. The first tick
/// fires immediately.
pub struct HeartbeatTicker {
    handle: JoinHandle<()>,
}

impl HeartbeatTicker {
    pub fn spawn(interval: Duration, events: mpsc::UnboundedSender<Event>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(Event::Heartbeat).is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for HeartbeatTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
