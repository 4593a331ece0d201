//! Time broadcast channel
//!
//! Fans playback time out to every time-synchronized consumer at a bounded
//! rate. The audio engine reports position far more often than consumers can
//! usefully redraw, so updates land in a latest-value slot and a flush task
//! forwards at most one value per frame. Intermediate values are dropped by
//! design; only the most recent position matters.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// One flush per frame at roughly 60 Hz
pub const DEFAULT_FRAME: Duration = Duration::from_millis(16);

const CHANNEL_CAPACITY: usize = 64;

/// Frame-coalesced fan-out of playback time
///
/// `update_time` is cheap and lossy; subscribers see the latest value at most
/// once per frame. A new subscriber receives the current time synchronously
/// on its first `recv`, so late-mounting consumers render the right position
/// without waiting for the next flush.
pub struct TimeBroadcaster {
    latest: watch::Sender<f64>,
    // Taken on shutdown so subscriptions drain instead of hanging
    tx: Mutex<Option<broadcast::Sender<f64>>>,
    dirty: Arc<Notify>,
    flush: JoinHandle<()>,
}

impl TimeBroadcaster {
    pub fn new(frame: Duration) -> Self {
        let (latest, latest_rx) = watch::channel(0.0_f64);
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let dirty = Arc::new(Notify::new());

        let flush = tokio::spawn(Self::flush_loop(
            frame,
            latest_rx,
            tx.clone(),
            dirty.clone(),
        ));

        Self { latest, tx: Mutex::new(Some(tx)), dirty, flush }
    }

    fn sender(&self) -> Option<broadcast::Sender<f64>> {
        match self.tx.lock() {
            Ok(guard) => (*guard).clone(),
            Err(_) => None,
        }
    }

    async fn flush_loop(
        frame: Duration,
        latest: watch::Receiver<f64>,
        tx: broadcast::Sender<f64>,
        dirty: Arc<Notify>,
    ) {
        loop {
            dirty.notified().await;
            let time = *latest.borrow();
            // Err means no subscribers right now, which is fine
            if tx.send(time).is_ok() {
                trace!(time, "Flushed playback time");
            }
            tokio::time::sleep(frame).await;
        }
    }

    /// Record the newest playback position. Overwrites any value not yet
    /// flushed.
    pub fn update_time(&self, time: f64) {
        self.latest.send_replace(time);
        self.dirty.notify_one();
    }

    /// Subscribe to time updates.
    ///
    /// The first `recv` on the returned subscription yields the current time
    /// immediately; subsequent calls yield flushed frames.
    pub fn subscribe(&self) -> TimeSubscription {
        match self.sender() {
            Some(tx) => TimeSubscription {
                first: Some(*self.latest.subscribe().borrow()),
                rx: tx.subscribe(),
            },
            None => {
                // Already shut down; hand back a subscription that drains
                // at once
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                TimeSubscription { first: None, rx }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender().map_or(0, |tx| tx.receiver_count())
    }

    /// Stop the flush task and close the channel. Subscribers drain to
    /// `None` and no further updates are delivered, even if `update_time`
    /// races with teardown.
    pub fn shutdown(&self) {
        debug!("Shutting down time broadcaster");
        self.flush.abort();
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}

impl Drop for TimeBroadcaster {
    fn drop(&mut self) {
        self.flush.abort();
    }
}

/// Receiving side of the time channel
pub struct TimeSubscription {
    first: Option<f64>,
    rx: broadcast::Receiver<f64>,
}

impl TimeSubscription {
    /// Next time value, or `None` once the broadcaster is gone.
    ///
    /// A slow consumer that falls behind skips ahead to the newest frame
    /// rather than erroring; stale times are worthless.
    pub async fn recv(&mut self) -> Option<f64> {
        if let Some(time) = self.first.take() {
            return Some(time);
        }
        loop {
            match self.rx.recv().await {
                Ok(time) => return Some(time),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Time subscriber lagged, skipping to newest");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
