//! Bounded work queue with an explicit "displace oldest" operation, used to
//! connect the three pipeline stages (SPEC_FULL §9: "a channel-like
//! primitive that exposes TryPut/TryGet and supports displace-oldest as an
//! explicit operation"). In live mode a full queue makes room by discarding
//! the single oldest item before enqueuing the new one (the producer never
//! blocks); in batch mode the producer blocks until space frees up, so
//! every input frame is processed exactly once and in order.
//!
//! A plain `tokio::sync::mpsc` channel can't express this: only the
//! receiver half can pop. This queue instead shares one
//! `Mutex<VecDeque<T>>` between producer and consumer, guarded by a
//! `Notify` for the blocking paths — the same shape as the original's
//! `queue.Queue`, which both the capture thread (evicting on full) and the
//! consumer thread (popping) touch directly.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

#[derive(Clone)]
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be positive");
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        }
    }

    /// Live mode: enqueue `item`, evicting the oldest entry first if the
    /// queue is already at capacity. Never blocks.
    pub async fn send_displacing(&self, item: T) {
        let mut items = self.inner.items.lock().await;
        if items.len() >= self.inner.capacity {
            items.pop_front();
        }
        items.push_back(item);
        drop(items);
        self.inner.not_empty.notify_one();
    }

    /// Batch mode: block until there is room, then enqueue. Preserves
    /// arrival order and never drops.
    pub async fn send_blocking(&self, item: T) {
        loop {
            {
                let mut items = self.inner.items.lock().await;
                if items.len() < self.inner.capacity {
                    items.push_back(item);
                    drop(items);
                    self.inner.not_empty.notify_one();
                    return;
                }
            }
            self.inner.not_full.notified().await;
        }
    }

    /// Pop the oldest item, waiting if the queue is currently empty.
    pub async fn recv(&self) -> T {
        loop {
            {
                let mut items = self.inner.items.lock().await;
                if let Some(item) = items.pop_front() {
                    drop(items);
                    self.inner.not_full.notify_one();
                    return item;
                }
            }
            self.inner.not_empty.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn live_mode_never_exceeds_capacity() {
        let q: BoundedQueue<u32> = BoundedQueue::new(2);
        for i in 1..=100u32 {
            q.send_displacing(i).await;
            assert!(q.len().await <= 2);
        }
    }

    #[tokio::test]
    async fn live_mode_drop_oldest_preserves_increasing_subsequence_and_sees_last() {
        let q: BoundedQueue<u32> = BoundedQueue::new(2);
        for i in 1..=100u32 {
            q.send_displacing(i).await;
        }
        let mut seen = Vec::new();
        while q.len().await > 0 {
            seen.push(q.recv().await);
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 100);
        assert!(seen.len() <= 2);
    }

    #[tokio::test]
    async fn live_mode_drops_exactly_the_oldest_at_the_1001st_entry() {
        let q: BoundedQueue<u32> = BoundedQueue::new(1000);
        for i in 1..=1001u32 {
            q.send_displacing(i).await;
        }
        assert_eq!(q.len().await, 1000);
        assert_eq!(q.recv().await, 2, "entry 1 should have been evicted by entry 1001");
    }

    #[tokio::test]
    async fn batch_mode_blocks_and_delivers_every_item_in_order() {
        let q: BoundedQueue<u32> = BoundedQueue::new(2);
        let producer = {
            let q = q.clone();
            tokio::spawn(async move {
                for i in 1..=10u32 {
                    q.send_blocking(i).await;
                }
            })
        };
        let mut seen = Vec::new();
        while seen.len() < 10 {
            seen.push(q.recv().await);
        }
        producer.await.unwrap();
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }
}
