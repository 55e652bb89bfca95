//! Work queues for the audit pipeline
//!
//! Two of these drive the scan: a queue of URLs waiting to be fetched and a
//! queue of parsed pages waiting to be audited. URLs are cheap to stash,
//! pages are not, which is why the queues stay distinct.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe FIFO queue with a monotonic push counter.
///
/// `total_size` counts every element ever pushed and is never decremented;
/// progress accounting divides audited pages by this total, so it must not
/// shrink as the queue drains.
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    total: AtomicU64,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            total: AtomicU64::new(0),
        }
    }

    /// Appends an item and bumps the lifetime counter.
    pub fn push(&self, item: T) {
        self.items.lock().expect("queue lock poisoned").push_back(item);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes and returns the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        self.items.lock().expect("queue lock poisoned").pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().expect("queue lock poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("queue lock poisoned").len()
    }

    /// Lifetime count of pushed items.
    pub fn total_size(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
