//! Deduplicating work queues with per-key exponential backoff
//!
//! Queue items are resource keys (`namespace/name`), never full objects:
//! handlers re-read the authoritative object at dequeue time, so staleness
//! between enqueue and processing is harmless. Re-adding a key that is
//! already pending collapses to one entry, which coalesces rapid successive
//! updates to the same object.
//!
//! Failure handling is the queue's only retry mechanism: a handler error
//! re-enqueues the key after an exponentially growing, jittered, bounded
//! delay. The async-operation poller leans on this deliberately - returning
//! an error for `in progress` responses is what produces the polling cadence.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tracing::debug;

/// Default initial delay for a failed key
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default cap on the per-key delay
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// A FIFO queue of resource keys, deduplicated while pending
pub struct WorkQueue {
    name: String,
    base_delay: Duration,
    max_delay: Duration,
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<String>,
    members: HashSet<String>,
    retries: HashMap<String, u32>,
}

impl WorkQueue {
    /// Create a queue with the default backoff parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_backoff(name, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    /// Create a queue with explicit backoff parameters
    pub fn with_backoff(name: impl Into<String>, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            name: name.into(),
            base_delay,
            max_delay,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    /// Add a key, collapsing with an already-pending entry for the same key
    ///
    /// A key currently being processed is not pending and may be re-added;
    /// dedup only applies between enqueue and dequeue.
    pub fn add(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.members.insert(key.to_string()) {
            inner.pending.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Re-add a key after an exponentially growing, jittered delay
    ///
    /// Each call for the same key increases its retry count until [`forget`]
    /// clears it. The delayed re-add runs on a detached task; keys are not
    /// durable across restarts (the store's event stream replays them).
    ///
    /// [`forget`]: WorkQueue::forget
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let attempt = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let count = inner.retries.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let delay = self.backoff_for(attempt);
        debug!(
            queue = %self.name,
            key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "requeueing key with backoff"
        );

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Clear the retry count for a key after a successful pass
    pub fn forget(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.retries.remove(key);
    }

    /// Number of backoff requeues recorded for a key
    pub fn requeues(&self, key: &str) -> u32 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.retries.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key
    pub async fn next(&self) -> String {
        loop {
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(key) = inner.pending.pop_front() {
                    inner.members.remove(&key);
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Number of keys currently pending
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.len()
    }

    /// True when no keys are pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exponential backoff for the given attempt, jittered and capped
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exp as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        // 0.5x to 1.5x jitter avoids thundering herds of synchronized retries
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(capped * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::with_backoff(
            "test",
            Duration::from_millis(5),
            Duration::from_millis(50),
        ))
    }

    /// Story: rapid successive updates to one object collapse to one dequeue
    #[tokio::test]
    async fn story_duplicate_adds_collapse_while_pending() {
        let queue = test_queue();
        queue.add("default/users-db");
        queue.add("default/users-db");
        queue.add("default/users-db");

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, "default/users-db");
        assert!(queue.is_empty());
    }

    /// Story: distinct keys are delivered in FIFO order
    #[tokio::test]
    async fn story_distinct_keys_are_fifo() {
        let queue = test_queue();
        queue.add("default/a");
        queue.add("default/b");
        queue.add("prod/a");

        assert_eq!(queue.next().await, "default/a");
        assert_eq!(queue.next().await, "default/b");
        assert_eq!(queue.next().await, "prod/a");
    }

    /// Story: a key may be re-added while it is being processed
    ///
    /// Dedup applies only to pending entries; a concurrent update that lands
    /// while a handler runs must trigger another pass.
    #[tokio::test]
    async fn story_key_readdable_while_in_flight() {
        let queue = test_queue();
        queue.add("default/a");
        let key = queue.next().await;
        assert_eq!(key, "default/a");

        // still "processing" the key; an update arrives
        queue.add("default/a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, "default/a");
    }

    /// Story: failed keys come back after a backoff delay
    #[tokio::test]
    async fn story_rate_limited_key_is_redelivered() {
        let queue = test_queue();
        queue.add_rate_limited("default/users-db");
        assert_eq!(queue.requeues("default/users-db"), 1);

        let key = tokio::time::timeout(Duration::from_secs(2), queue.next())
            .await
            .expect("rate-limited key should be redelivered");
        assert_eq!(key, "default/users-db");
    }

    /// Story: repeated failures grow the retry count until the key succeeds
    #[tokio::test]
    async fn story_forget_resets_backoff_tracking() {
        let queue = test_queue();
        queue.add_rate_limited("default/users-db");
        queue.add_rate_limited("default/users-db");
        queue.add_rate_limited("default/users-db");
        assert_eq!(queue.requeues("default/users-db"), 3);

        queue.forget("default/users-db");
        assert_eq!(queue.requeues("default/users-db"), 0);
    }

    /// Story: backoff tracking is per key
    #[tokio::test]
    async fn story_backoff_is_tracked_per_key() {
        let queue = test_queue();
        queue.add_rate_limited("default/a");
        queue.add_rate_limited("default/a");
        queue.add_rate_limited("default/b");

        assert_eq!(queue.requeues("default/a"), 2);
        assert_eq!(queue.requeues("default/b"), 1);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let queue = WorkQueue::with_backoff(
            "caps",
            Duration::from_millis(100),
            Duration::from_millis(400),
        );
        // attempt 30 would be astronomically large without the cap;
        // jitter can add at most 1.5x on top of it
        let delay = queue.backoff_for(30);
        assert!(delay <= Duration::from_millis(600));
    }
}
