//! Bounded ordered queue of node lifecycle events
//!
//! The command applier produces [`NodeUpdate`]s in log order; the downstream
//! node-update backend consumes them in batches. The queue observes the
//! process-wide abort source: once it fires, pending producers and consumers
//! fail with [`ClusterError::Aborted`].

use crate::commands::NodeUpdate;
use crate::error::{ClusterError, Result};
use crate::shutdown::AbortWatch;
use tokio::sync::{mpsc, Mutex};

/// Bounded, ordered node-update queue
#[derive(Debug)]
pub struct UpdateChannel {
    tx: mpsc::Sender<NodeUpdate>,
    rx: Mutex<mpsc::Receiver<NodeUpdate>>,
    abort: AbortWatch,
}

impl UpdateChannel {
    /// Create a queue with the given capacity, wired to the abort source
    pub fn new(capacity: usize, abort: AbortWatch) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            abort,
        }
    }

    /// Push an update, suspending while the queue is full.
    ///
    /// Fails with [`ClusterError::Aborted`] if the abort source fires before
    /// space becomes available.
    pub async fn push_eventually(&self, update: NodeUpdate) -> Result<()> {
        if self.abort.is_aborted() {
            return Err(ClusterError::Aborted);
        }
        tokio::select! {
            _ = self.abort.fired() => Err(ClusterError::Aborted),
            sent = self.tx.send(update) => sent.map_err(|_| ClusterError::Aborted),
        }
    }

    /// Consume buffered updates.
    ///
    /// Returns every currently buffered element as one batch; if the queue
    /// is empty, suspends until a single element arrives and returns it
    /// alone. Fails with [`ClusterError::Aborted`] once the abort source
    /// fires.
    pub async fn get_node_updates(&self) -> Result<Vec<NodeUpdate>> {
        let mut rx = self.rx.lock().await;

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        if !updates.is_empty() {
            return Ok(updates);
        }

        if self.abort.is_aborted() {
            return Err(ClusterError::Aborted);
        }
        tokio::select! {
            _ = self.abort.fired() => Err(ClusterError::Aborted),
            received = rx.recv() => match received {
                Some(update) => Ok(vec![update]),
                None => Err(ClusterError::Aborted),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::NodeUpdateType;
    use crate::shutdown::AbortSource;
    use std::time::Duration;

    fn update(id: i32, offset: i64) -> NodeUpdate {
        NodeUpdate {
            id,
            update_type: NodeUpdateType::Added,
            offset,
        }
    }

    #[tokio::test]
    async fn test_drains_buffered_updates_in_order() {
        let abort = AbortSource::new();
        let queue = UpdateChannel::new(8, abort.watch());

        for i in 0..3 {
            queue.push_eventually(update(i, i as i64)).await.unwrap();
        }

        let batch = queue.get_node_updates().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.iter().map(|u| u.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_empty_queue_waits_for_one_element() {
        let abort = AbortSource::new();
        let queue = std::sync::Arc::new(UpdateChannel::new(8, abort.watch()));

        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get_node_updates().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push_eventually(update(7, 42)).await.unwrap();

        let batch = consumer.await.unwrap().unwrap();
        assert_eq!(batch, vec![update(7, 42)]);
    }

    #[tokio::test]
    async fn test_full_queue_suspends_producer_until_consumed() {
        let abort = AbortSource::new();
        let queue = std::sync::Arc::new(UpdateChannel::new(1, abort.watch()));

        queue.push_eventually(update(1, 1)).await.unwrap();

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.push_eventually(update(2, 2)).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());

        let first = queue.get_node_updates().await.unwrap();
        assert_eq!(first[0].id, 1);
        producer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_abort_fails_pending_consumer() {
        let abort = AbortSource::new();
        let queue = std::sync::Arc::new(UpdateChannel::new(4, abort.watch()));

        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get_node_updates().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        abort.abort();

        let result = consumer.await.unwrap();
        assert!(matches!(result, Err(ClusterError::Aborted)));
    }

    #[tokio::test]
    async fn test_abort_fails_pending_producer() {
        let abort = AbortSource::new();
        let queue = std::sync::Arc::new(UpdateChannel::new(1, abort.watch()));
        queue.push_eventually(update(1, 1)).await.unwrap();

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.push_eventually(update(2, 2)).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        abort.abort();

        let result = producer.await.unwrap();
        assert!(matches!(result, Err(ClusterError::Aborted)));
    }
}
