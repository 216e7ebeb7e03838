#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The ingress queue (spec §4.C): a bounded, single-producer,
//! single-consumer hand-off between the sampler thread (producer) and the
//! batch writer thread (consumer). The producer never blocks: when full,
//! the oldest enqueued item is evicted to admit the new one ("drop-
//! oldest"), and a drop counter is incremented.
//!
//! Kept generic over `T` (rather than hard-coded to `Sample`) so the
//! writer crate's own tests can build queues of lightweight fixtures
//! without depending on `sysmon-types`.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Condvar, Mutex,
    },
    time::Duration,
};

/// A bounded, drop-oldest-on-overflow queue.
pub struct IngressQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    dropped: AtomicU64,
}

impl<T> IngressQueue<T> {
    /// Creates a new queue with the given capacity. `capacity` must be at
    /// least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ingress queue capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues `item`, never blocking. If the queue is full, the oldest
    /// item is dropped to make room and the drop counter is incremented.
    pub fn push(&self, item: T) {
        let mut queue = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if queue.len() >= self.capacity {
            let _ = queue.pop_front();
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(item);
        self.not_empty.notify_one();
    }

    /// Blocks until at least one item is available, then drains up to
    /// `max` items in FIFO order. Returns an empty vector only if woken
    /// spuriously with nothing to show for it across `timeout` (callers
    /// loop on the timeout case exactly as a writer waiting out its batch
    /// timeout would).
    pub fn drain_blocking(&self, max: usize, timeout: Duration) -> Vec<T> {
        let guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        let (mut queue, _timed_out) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .unwrap_or_else(|poison| poison.into_inner());

        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Non-blocking drain of up to `max` items, for callers (e.g. a final
    /// shutdown flush) that must not wait for new data to arrive.
    pub fn drain_available(&self, max: usize) -> Vec<T> {
        let mut queue = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Current number of items queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner()).len()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of items dropped since creation due to overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The queue's configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn push_past_capacity_drops_the_oldest_item() {
        let queue = IngressQueue::new(4);
        for i in 1..=6 {
            queue.push(i);
        }
        // Scenario 2 of the seed suite: capacity 4, 6 items pushed 1..=6,
        // the store should observe 3,4,5,6 with 2 dropped.
        let drained = queue.drain_available(10);
        assert_eq!(drained, vec![3, 4, 5, 6]);
        assert_eq!(queue.dropped_count(), 2);
    }

    #[test]
    fn drain_blocking_returns_promptly_once_data_is_available() {
        let queue = Arc::new(IngressQueue::new(8));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(42);
        });
        let drained = queue.drain_blocking(10, Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(drained, vec![42]);
    }

    #[test]
    fn drain_blocking_times_out_with_an_empty_vec_when_nothing_arrives() {
        let queue: IngressQueue<i32> = IngressQueue::new(4);
        let drained = queue.drain_blocking(10, Duration::from_millis(20));
        assert!(drained.is_empty());
    }

    #[test]
    fn capacity_is_preserved_under_sustained_overload() {
        // Invariant 3: the queue preserves exactly the N most recent items
        // under continuous producer overload.
        let queue = IngressQueue::new(10);
        for i in 0..1000 {
            queue.push(i);
        }
        let drained = queue.drain_available(usize::MAX);
        assert_eq!(drained.len(), 10);
        assert_eq!(drained, (990..1000).collect::<Vec<_>>());
    }

    proptest::proptest! {
        /// For any capacity and any sequence of pushes, the queue always
        /// holds exactly the last `capacity` items pushed (or fewer, if
        /// fewer than `capacity` items were ever pushed).
        #[test]
        fn queue_always_holds_the_most_recent_capacity_items(
            capacity in 1usize..32,
            pushed in proptest::collection::vec(0i64..10_000, 0..200),
        ) {
            let queue = IngressQueue::new(capacity);
            for item in &pushed {
                queue.push(*item);
            }
            let drained = queue.drain_available(usize::MAX);
            let expected: Vec<i64> = pushed.iter().rev().take(capacity).rev().copied().collect();
            proptest::prop_assert_eq!(drained, expected);
        }
    }
}
