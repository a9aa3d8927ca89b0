//! Cooperative shutdown primitives
//!
//! A single process-wide [`AbortSource`] is observed by every suspension
//! point in the membership subsystem: queue operations, retry sleeps and
//! outbound RPC loops. The [`Gate`] tracks background tasks so `stop()` can
//! wait for them to drain.

use crate::error::{ClusterError, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Broadcast abort signal.
///
/// Cloning shares the same underlying signal; firing is idempotent.
#[derive(Debug, Clone)]
pub struct AbortSource {
    tx: watch::Sender<bool>,
}

impl AbortSource {
    /// Create a new, unfired abort source
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Fire the abort signal, waking every subscriber
    pub fn abort(&self) {
        // send_replace keeps working even with no live receivers
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to the signal
    pub fn watch(&self) -> AbortWatch {
        AbortWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for AbortSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber handle to an [`AbortSource`]
#[derive(Debug, Clone)]
pub struct AbortWatch {
    rx: watch::Receiver<bool>,
}

impl AbortWatch {
    /// Whether the source has fired
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Suspend until the source fires
    pub async fn fired(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // source dropped without firing; treat as aborted
                return;
            }
        }
    }

    /// Sleep for `duration`, waking early if the source fires.
    ///
    /// Returns `Err(ClusterError::Aborted)` when woken by the signal.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.fired() => Err(ClusterError::Aborted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Tracks background tasks spawned by the membership manager.
///
/// Once closed, new work is rejected and `close()` waits for every in-flight
/// task to finish.
#[derive(Debug)]
pub struct Gate {
    closed: Mutex<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gate {
    /// Create an open gate
    pub fn new() -> Self {
        Self {
            closed: Mutex::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Whether the gate has been closed
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Spawn a background task through the gate.
    ///
    /// Work submitted after the gate closed is dropped.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let closed = self.closed.lock();
        if *closed {
            debug!("gate closed, dropping background task");
            return;
        }
        self.tasks.lock().push(tokio::spawn(future));
    }

    /// Close the gate and wait for all in-flight tasks to drain
    pub async fn close(&self) {
        *self.closed.lock() = true;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            // a panicked background task has already been reported
            let _ = task.await;
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_abort_wakes_subscribers() {
        let source = AbortSource::new();
        let watch = source.watch();
        assert!(!watch.is_aborted());

        let waiter = tokio::spawn({
            let watch = watch.clone();
            async move {
                watch.fired().await;
            }
        });

        source.abort();
        waiter.await.unwrap();
        assert!(watch.is_aborted());
    }

    #[tokio::test]
    async fn test_sleep_aborted() {
        let source = AbortSource::new();
        let watch = source.watch();
        source.abort();

        let result = watch.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(ClusterError::Aborted)));
    }

    #[tokio::test]
    async fn test_sleep_completes_without_abort() {
        let source = AbortSource::new();
        let watch = source.watch();
        watch.sleep(Duration::from_millis(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_gate_drains_tasks() {
        let gate = Gate::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = counter.clone();
            gate.spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        gate.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(gate.is_closed());
    }

    #[tokio::test]
    async fn test_gate_rejects_after_close() {
        let gate = Gate::new();
        gate.close().await;

        let counter = Arc::new(AtomicUsize::new(0));
        let inner = counter.clone();
        gate.spawn(async move {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
