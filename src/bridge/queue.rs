//! Relay queue between the game session and the drain loop.
//!
//! Pushed from the game-session receive thread, popped from the drain loop
//! thread. Both sides go through one mutex. The queue is unbounded unless a
//! capacity is configured, in which case the oldest fragment is dropped on
//! overflow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::common::ChatFragment;

/// Thread-safe FIFO of fragments pending relay. Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct RelayQueue {
    inner: Arc<Mutex<VecDeque<ChatFragment>>>,
    capacity: Option<usize>,
    dropped: Arc<AtomicU64>,
}

impl RelayQueue {
    /// Create an unbounded queue.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that drops its oldest fragment once `capacity` is reached.
    /// `None` keeps it unbounded.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Append a fragment. Never blocks beyond the lock and never fails.
    pub fn push(&self, fragment: ChatFragment) {
        let mut queue = self.inner.lock();
        if let Some(capacity) = self.capacity {
            if queue.len() >= capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(capacity, dropped, "Relay queue full, dropped oldest fragment");
            }
        }
        queue.push_back(fragment);
    }

    /// Remove the oldest fragment, or `None` when the queue is empty.
    pub fn pop_front(&self) -> Option<ChatFragment> {
        self.inner.lock().pop_front()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Discard everything still queued. Returns how many fragments were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let count = queue.len();
        queue.clear();
        count
    }

    /// Fragments dropped because of the capacity bound.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = RelayQueue::new();
        queue.push(ChatFragment::new("a"));
        queue.push(ChatFragment::new("b"));

        assert_eq!(queue.pop_front().unwrap().text, "a");
        assert_eq!(queue.pop_front().unwrap().text, "b");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let queue = RelayQueue::with_capacity(Some(2));
        queue.push(ChatFragment::new("a"));
        queue.push(ChatFragment::new("b"));
        queue.push(ChatFragment::new("c"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop_front().unwrap().text, "b");
    }

    #[test]
    fn test_clear_reports_count() {
        let queue = RelayQueue::new();
        queue.push(ChatFragment::new("a"));
        queue.push(ChatFragment::new("b"));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_push_pop_loses_nothing() {
        const COUNT: usize = 10_000;
        let queue = RelayQueue::new();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..COUNT {
                    queue.push(ChatFragment::new(i.to_string()));
                }
            })
        };

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seen = Vec::with_capacity(COUNT);
                while seen.len() < COUNT {
                    match queue.pop_front() {
                        Some(fragment) => seen.push(fragment.text),
                        None => thread::yield_now(),
                    }
                }
                seen
            })
        };

        producer.join().unwrap();
        let seen = consumer.join().unwrap();

        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), COUNT);
        // FIFO: pops observe pushes in order
        let expected: Vec<String> = (0..COUNT).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
        assert!(queue.is_empty());
    }
}
