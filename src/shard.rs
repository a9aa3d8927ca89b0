//! Share-nothing shard pool
//!
//! Each shard is a tokio task that exclusively owns its state; cross-shard
//! communication is by dispatching a closure to the target shard's mailbox
//! and suspending until it has run. This mirrors a shard-per-core runtime
//! closely enough for the membership manager's `invoke_on_all` fan-out and
//! its cross-shard agreement checks.

use tokio::sync::{mpsc, oneshot};

/// The shard hosting singleton state (partition allocator, controller-side
/// replicas)
pub const CONTROLLER_SHARD: usize = 0;

type ShardTask<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A pool of shards, each owning one instance of `S`
pub struct Sharded<S> {
    shards: Vec<mpsc::UnboundedSender<ShardTask<S>>>,
}

impl<S: Send + 'static> Sharded<S> {
    /// Spawn `count` shards, building each shard's state with `init`
    pub fn new<F>(count: usize, mut init: F) -> Self
    where
        F: FnMut(usize) -> S,
    {
        assert!(count > 0, "shard pool requires at least one shard");
        let mut shards = Vec::with_capacity(count);
        for shard_id in 0..count {
            let mut state = init(shard_id);
            let (tx, mut rx) = mpsc::unbounded_channel::<ShardTask<S>>();
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    task(&mut state);
                }
            });
            shards.push(tx);
        }
        Self { shards }
    }

    /// Number of shards in the pool
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Run `f` on the given shard and return its result
    pub async fn invoke_on<F, R>(&self, shard: usize, f: F) -> R
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: ShardTask<S> = Box::new(move |state| {
            let _ = tx.send(f(state));
        });
        self.shards[shard]
            .send(task)
            .unwrap_or_else(|_| panic!("shard {} stopped", shard));
        rx.await
            .unwrap_or_else(|_| panic!("shard {} dropped invocation", shard))
    }

    /// Run `f` on every shard; results are returned in shard order.
    ///
    /// All shards receive the task before any result is awaited, so the
    /// fan-out executes concurrently.
    pub async fn invoke_on_all<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(&mut S) -> R + Clone + Send + 'static,
        R: Send + 'static,
    {
        let mut pending = Vec::with_capacity(self.shards.len());
        for (shard, sender) in self.shards.iter().enumerate() {
            let f = f.clone();
            let (tx, rx) = oneshot::channel();
            let task: ShardTask<S> = Box::new(move |state| {
                let _ = tx.send(f(state));
            });
            sender
                .send(task)
                .unwrap_or_else(|_| panic!("shard {} stopped", shard));
            pending.push(rx);
        }

        let mut results = Vec::with_capacity(pending.len());
        for (shard, rx) in pending.into_iter().enumerate() {
            results.push(
                rx.await
                    .unwrap_or_else(|_| panic!("shard {} dropped invocation", shard)),
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_on_returns_result() {
        let shards = Sharded::new(4, |shard| shard * 10);
        let value = shards.invoke_on(2, |state| *state).await;
        assert_eq!(value, 20);
    }

    #[tokio::test]
    async fn test_invoke_on_mutates_only_target_shard() {
        let shards = Sharded::new(3, |_| 0u64);
        shards.invoke_on(1, |state| *state += 5).await;

        let values = shards.invoke_on_all(|state| *state).await;
        assert_eq!(values, vec![0, 5, 0]);
    }

    #[tokio::test]
    async fn test_invoke_on_all_runs_in_shard_order() {
        let shards = Sharded::new(4, |shard| shard);
        let values = shards.invoke_on_all(|state| *state * 2).await;
        assert_eq!(values, vec![0, 2, 4, 6]);
    }

    #[tokio::test]
    async fn test_serialized_within_shard() {
        let shards = Sharded::new(1, |_| Vec::<u32>::new());
        for i in 0..100 {
            shards.invoke_on(0, move |state| state.push(i)).await;
        }
        let seen = shards.invoke_on(0, |state| state.clone()).await;
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "at least one shard")]
    fn test_zero_shards_rejected() {
        // constructing the pool panics before any task is spawned
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let _ = Sharded::new(0, |_| ());
    }
}
