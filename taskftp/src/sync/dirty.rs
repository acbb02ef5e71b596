//! Debounced upload scheduling.
//!
//! Local mutations only set the [`DirtyFlag`]. The [`UploadPoller`] looks at
//! it once per interval and turns a set flag into a single
//! [`Command::Upload`], so a burst of edits costs one remote store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::queue::{Command, CommandQueue};

/// Shared "there are unuploaded local changes" signal.
#[derive(Debug, Default)]
pub struct DirtyFlag {
    set: AtomicBool,
    notify: Notify,
}

impl DirtyFlag {
    /// A cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the local state as changed and wake any [`wait_set`](Self::wait_set) callers.
    pub fn set(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.set.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    ///
    /// A `set` racing with `take` is never lost: it either lands before the
    /// swap (and is returned) or after it (and stays set).
    pub fn take(&self) -> bool {
        self.set.swap(false, Ordering::SeqCst)
    }

    /// Wait until the flag is set. Returns immediately if it already is.
    pub async fn wait_set(&self) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Timer loop converting a set [`DirtyFlag`] into queued uploads.
pub struct UploadPoller;

impl UploadPoller {
    /// Start polling `dirty` every `interval`.
    ///
    /// The first check happens one interval after the call. Must be called
    /// from within a tokio runtime.
    #[must_use]
    pub fn spawn(dirty: Arc<DirtyFlag>, queue: CommandQueue, interval: Duration) -> PollerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(dirty, queue, interval, stop_rx));
        PollerHandle {
            stop: stop_tx,
            task,
        }
    }
}

async fn poll_loop(
    dirty: Arc<DirtyFlag>,
    queue: CommandQueue,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(?interval, "upload poller started");

    loop {
        tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            _ = ticker.tick() => {
                if dirty.take() {
                    tracing::debug!("local changes pending, queueing upload");
                    queue.enqueue(Command::Upload);
                }
            }
        }
    }

    tracing::debug!("upload poller stopped");
}

/// Control handle for a running [`UploadPoller`].
#[derive(Debug)]
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Ask the poller to exit. Takes effect immediately, even mid-interval.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop the poller and wait for it to exit.
    pub async fn join(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "upload poller task failed");
        }
    }
}
