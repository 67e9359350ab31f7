//! Background TTL reaper.
//!
//! Lazy expiry only removes a dead entry when someone reads it. A key
//! that expires and is never touched again would stay resident forever,
//! so a background task sweeps the whole store on a fixed period and
//! removes every dead entry it finds. The sweep uses the same store lock
//! as every other mutation.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How often the reaper scans the store unless configured otherwise.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Handle to the running reaper task.
///
/// Stopping consumes the handle, so a reaper cannot be stopped twice.
/// Dropping the handle without calling [`stop`](Reaper::stop) also
/// terminates the task: the closed channel wakes its wait loop.
#[derive(Debug)]
pub struct Reaper {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Spawns the reaper over `store`, sweeping every `period`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use emberkv::storage::{Reaper, Store, DEFAULT_SWEEP_PERIOD};
    /// use std::sync::Arc;
    ///
    /// # async fn run() {
    /// let store = Arc::new(Store::new());
    /// let reaper = Reaper::start(Arc::clone(&store), DEFAULT_SWEEP_PERIOD);
    ///
    /// // ... serve traffic ...
    ///
    /// reaper.stop().await;
    /// # }
    /// ```
    pub fn start(store: Arc<Store>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(reap_loop(store, period, shutdown_rx));

        debug!(period_ms = period.as_millis() as u64, "ttl reaper started");

        Self { shutdown_tx, task }
    }

    /// Signals the reaper to stop and waits until its task has exited.
    ///
    /// The signal is observed ahead of the next tick: once `stop` has
    /// been called, no further sweep begins.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
        info!("ttl reaper stopped");
    }
}

async fn reap_loop(store: Arc<Store>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        // Biased toward the stop signal: when both the timer and the
        // signal are ready, the signal wins and the tick never starts.
        tokio::select! {
            biased;

            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("ttl reaper received stop signal");
                    return;
                }
            }
            _ = tokio::time::sleep(period) => {}
        }

        let removed = store.sweep_expired();
        if removed > 0 {
            debug!(removed, resident = store.len(), "swept expired keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_reaper_removes_expired_keys() {
        let store = Arc::new(Store::new());

        for i in 0..10 {
            store.set_with_ttl(
                Bytes::from(format!("key{}", i)),
                Bytes::from("value"),
                Duration::from_millis(30),
            );
        }
        store.set(Bytes::from("persistent"), Bytes::from("value"));
        assert_eq!(store.len(), 11);

        let reaper = Reaper::start(Arc::clone(&store), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&Bytes::from("persistent")),
            Some(Bytes::from("value"))
        );

        reaper.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_sweeping() {
        let store = Arc::new(Store::new());

        let reaper = Reaper::start(Arc::clone(&store), Duration::from_millis(10));
        reaper.stop().await;

        // Anything expiring after the stop stays resident: no sweep runs.
        store.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_terminates_task() {
        let store = Arc::new(Store::new());

        {
            let _reaper = Reaper::start(Arc::clone(&store), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // Give the task time to observe the closed channel, then verify
        // sweeping has ceased.
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.len(), 1);
    }
}
