//! A bounded-concurrency, priority-ordered task queue.
//!
//! No teacher precedent in the corpus covers this primitive directly; it is
//! built fresh from `tokio::sync::Semaphore` in the same general async
//! idiom the rest of this crate uses (`thiserror` errors, `log` for
//! diagnostics), to give [`crate::runner::Runner`] a place to fan out the
//! independent branches `update_indexes` can touch concurrently while
//! still bounding how many database sessions are open at once.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

/// Higher runs first. Ties broken by insertion order (earliest first) so
/// the queue is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub i32);

impl Default for Priority {
    fn default() -> Self {
        Self(0)
    }
}

struct QueueEntry<T> {
    priority: Priority,
    sequence: u64,
    item: T,
    timeout: Option<Duration>,
    attempt: usize,
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse sequence so that among equal
        // priorities the earliest-enqueued entry pops first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A snapshot of queue occupancy, returned by [`TaskQueue::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
}

/// Configuration for [`TaskQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of tasks running concurrently.
    pub max_concurrency: usize,
    /// How many times a failed (non-timeout) task is re-enqueued before
    /// [`TaskPermit::retry_or_finish`] reports it as permanently failed.
    /// `0` disables queue-level retry entirely (spec.md §4.8's "optional
    /// retry at the queue level").
    pub retry_attempts: usize,
    /// Delay awaited between a failure and the requeue.
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            retry_attempts: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

struct Inner<T> {
    heap: BinaryHeap<QueueEntry<T>>,
    next_sequence: u64,
    in_flight: usize,
    completed: usize,
    failed: usize,
    retried: usize,
    cleared_pending: usize,
}

/// A priority queue of items of type `T`, drained by up to
/// `max_concurrency` workers at a time.
///
/// Not `Send`-bound on `T` beyond what `Mutex` already requires; callers
/// typically push `(Operation, oneshot::Sender<_>)` pairs or similar.
pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
    semaphore: Arc<Semaphore>,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl<T> TaskQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                in_flight: 0,
                completed: 0,
                failed: 0,
                retried: 0,
                cleared_pending: 0,
            }),
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
        }
    }

    /// Enqueue an item at the given priority, with no per-task timeout.
    pub async fn push(&self, item: T, priority: Priority) {
        self.push_timed(item, priority, None).await;
    }

    /// Enqueue an item carrying a per-task wall-clock timeout. Callers that
    /// pull it back out via [`Self::acquire_timed`] are expected to race the
    /// operation against this timeout themselves (spec.md §4.8: "a per-task
    /// timeout races the operation against a wall-clock timer") - the queue
    /// only tracks and propagates the value, since it has no operation of
    /// its own to execute.
    pub async fn push_timed(&self, item: T, priority: Priority, timeout: Option<Duration>) {
        self.push_entry(item, priority, timeout, 0).await;
    }

    async fn push_entry(&self, item: T, priority: Priority, timeout: Option<Duration>, attempt: usize) {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.heap.push(QueueEntry {
            priority,
            sequence,
            item,
            timeout,
            attempt,
        });
    }

    /// Acquire both a concurrency permit and the next-highest-priority
    /// item. Returns `None` once the queue is empty and no items remain to
    /// claim - callers loop on this to drain the queue.
    pub async fn acquire(&self) -> Option<(T, TaskPermit<'_, T>)> {
        let (item, _timeout, permit) = self.acquire_timed().await?;
        Some((item, permit))
    }

    /// Like [`Self::acquire`] but also returns the item's per-task timeout,
    /// if one was pushed with [`Self::push_timed`].
    pub async fn acquire_timed(&self) -> Option<(T, Option<Duration>, TaskPermit<'_, T>)> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        let mut inner = self.inner.lock().await;
        let entry = inner.heap.pop()?;
        inner.in_flight += 1;
        drop(inner);
        Some((
            entry.item,
            entry.timeout,
            TaskPermit {
                queue: self,
                attempt: entry.attempt,
                _permit: permit,
            },
        ))
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            pending: inner.heap.len(),
            in_flight: inner.in_flight,
            completed: inner.completed,
            failed: inner.failed,
            retried: inner.retried,
        }
    }

    /// Remove every pending item without running it, returning how many
    /// were discarded.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let n = inner.heap.len();
        inner.heap.clear();
        inner.cleared_pending += n;
        n
    }

    /// Blocks until every pushed item has been both claimed and finished -
    /// pending and in-flight counts both reach zero (spec.md §4.8's
    /// `drain()`: "blocks until both counters reach zero"). A task that
    /// requeues itself via [`TaskPermit::retry_or_finish`] keeps the queue
    /// non-drained until it either succeeds, exhausts its retries, or is
    /// [`Self::clear`]ed.
    pub async fn drain(&self) {
        loop {
            let (pending, in_flight) = {
                let inner = self.inner.lock().await;
                (inner.heap.len(), inner.in_flight)
            };
            if pending == 0 && in_flight == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn mark_complete(&self, failed: bool) {
        let mut inner = self.inner.lock().await;
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if failed {
            inner.failed += 1;
        } else {
            inner.completed += 1;
        }
    }

    async fn mark_retried(&self) {
        let mut inner = self.inner.lock().await;
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.retried += 1;
    }
}

/// Held by whoever popped a task; dropping it (or calling [`TaskPermit::finish`])
/// releases the concurrency slot and updates [`QueueStats`].
pub struct TaskPermit<'a, T> {
    queue: &'a TaskQueue<T>,
    attempt: usize,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl<'a, T> TaskPermit<'a, T> {
    /// How many times this item has previously been requeued via
    /// [`Self::retry_or_finish`]; `0` for a first attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub async fn finish(self, failed: bool) {
        self.queue.mark_complete(failed).await;
    }

    /// Records a failed attempt and, if the queue's `retry_attempts`
    /// budget is not exhausted and `timed_out` is `false` (a timeout is
    /// never retried - spec.md §4.8 only retries "failed non-timeout
    /// tasks"), sleeps `retry_delay` and pushes `item` back on with its
    /// attempt counter incremented. Returns `true` if it was requeued,
    /// `false` if it was instead recorded as a final failure. Consumes
    /// `self` either way.
    pub async fn retry_or_finish(
        self,
        item: T,
        priority: Priority,
        timeout: Option<Duration>,
        timed_out: bool,
    ) -> bool {
        let attempt = self.attempt;
        let queue = self.queue;
        if timed_out || attempt >= queue.retry_attempts {
            queue.mark_complete(true).await;
            return false;
        }
        queue.mark_retried().await;
        if !queue.retry_delay.is_zero() {
            tokio::time::sleep(queue.retry_delay).await;
        }
        queue.push_entry(item, priority, timeout, attempt + 1).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn higher_priority_drains_first() {
        let queue = TaskQueue::new(QueueConfig {
            max_concurrency: 1,
            ..QueueConfig::default()
        });
        queue.push("low", Priority(0)).await;
        queue.push("high", Priority(10)).await;
        queue.push("mid", Priority(5)).await;

        let (item, permit) = queue.acquire().await.unwrap();
        assert_eq!(item, "high");
        permit.finish(false).await;

        let (item, permit) = queue.acquire().await.unwrap();
        assert_eq!(item, "mid");
        permit.finish(false).await;

        let (item, permit) = queue.acquire().await.unwrap();
        assert_eq!(item, "low");
        permit.finish(false).await;

        assert!(queue.acquire().await.is_none());
    }

    #[tokio::test]
    async fn ties_preserve_insertion_order() {
        let queue = TaskQueue::new(QueueConfig {
            max_concurrency: 1,
            ..QueueConfig::default()
        });
        queue.push(1, Priority(0)).await;
        queue.push(2, Priority(0)).await;

        let (item, permit) = queue.acquire().await.unwrap();
        assert_eq!(item, 1);
        permit.finish(false).await;
    }

    #[tokio::test]
    async fn clear_discards_pending_and_reports_count() {
        let queue = TaskQueue::new(QueueConfig::default());
        queue.push(1, Priority(0)).await;
        queue.push(2, Priority(0)).await;
        let cleared = queue.clear().await;
        assert_eq!(cleared, 2);
        assert!(queue.acquire().await.is_none());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let queue = Arc::new(TaskQueue::new(QueueConfig {
            max_concurrency: 2,
            ..QueueConfig::default()
        }));
        for i in 0..4 {
            queue.push(i, Priority(0)).await;
        }
        let (_, p1) = queue.acquire().await.unwrap();
        let (_, p2) = queue.acquire().await.unwrap();
        let stats = queue.stats().await;
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.pending, 2);
        p1.finish(false).await;
        p2.finish(true).await;
        let stats = queue.stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn drain_waits_for_pending_and_in_flight() {
        let queue = Arc::new(TaskQueue::new(QueueConfig {
            max_concurrency: 1,
            ..QueueConfig::default()
        }));
        queue.push(1, Priority(0)).await;
        queue.push(2, Priority(0)).await;

        let worker_queue = queue.clone();
        let worker = tokio::spawn(async move {
            while let Some((_, permit)) = worker_queue.acquire().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
                permit.finish(false).await;
            }
        });

        queue.drain().await;
        let stats = queue.stats().await;
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.completed, 2);

        worker.abort();
    }

    #[tokio::test]
    async fn retry_or_finish_requeues_until_budget_exhausted() {
        let queue = TaskQueue::new(QueueConfig {
            max_concurrency: 1,
            retry_attempts: 2,
            retry_delay: Duration::ZERO,
        });
        queue.push("job", Priority(0)).await;

        let (item, _timeout, permit) = queue.acquire_timed().await.unwrap();
        assert_eq!(permit.attempt(), 0);
        assert!(permit.retry_or_finish(item, Priority(0), None, false).await);
        assert_eq!(queue.stats().await.retried, 1);

        let (item, _timeout, permit) = queue.acquire_timed().await.unwrap();
        assert_eq!(permit.attempt(), 1);
        assert!(permit.retry_or_finish(item, Priority(0), None, false).await);
        assert_eq!(queue.stats().await.retried, 2);

        let (item, _timeout, permit) = queue.acquire_timed().await.unwrap();
        assert_eq!(permit.attempt(), 2);
        assert!(!permit.retry_or_finish(item, Priority(0), None, false).await);
        let stats = queue.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 2);
        assert!(queue.acquire().await.is_none());
    }

    #[tokio::test]
    async fn retry_or_finish_never_retries_a_timeout() {
        let queue = TaskQueue::new(QueueConfig {
            max_concurrency: 1,
            retry_attempts: 5,
            retry_delay: Duration::ZERO,
        });
        queue.push("job", Priority(0)).await;
        let (item, _timeout, permit) = queue.acquire_timed().await.unwrap();
        assert!(!permit.retry_or_finish(item, Priority(0), None, true).await);
        assert_eq!(queue.stats().await.failed, 1);
    }
}
