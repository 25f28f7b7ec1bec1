//! The bounded queue of payloads parsed off the wire, awaiting delivery to
//! the core (§3.5).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_CAPACITY: usize = 32;

/// Producer is the network poll, consumer is the core-delivery step;
/// overflow silently drops the newest packet and is counted for
/// diagnostics.
pub struct PendingQueue {
    slots: VecDeque<Vec<u8>>,
    capacity: usize,
    overflow_count: AtomicU64,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> PendingQueue {
        PendingQueue {
            slots: VecDeque::with_capacity(capacity),
            capacity,
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Returns `true` if `payload` was queued, `false` if dropped because
    /// the queue was full.
    pub fn push(&mut self, payload: Vec<u8>) -> bool {
        if self.slots.len() >= self.capacity {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.slots.push_back(payload);
        true
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.slots.pop_front()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

impl Default for PendingQueue {
    fn default() -> PendingQueue {
        PendingQueue::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = PendingQueue::new(4);
        queue.push(vec![1]);
        queue.push(vec![2]);
        assert_eq!(queue.pop(), Some(vec![1]));
        assert_eq!(queue.pop(), Some(vec![2]));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn overflow_drops_the_newest_packet_and_counts_it() {
        let mut queue = PendingQueue::new(2);
        assert!(queue.push(vec![1]));
        assert!(queue.push(vec![2]));
        assert!(!queue.push(vec![3]));

        assert_eq!(queue.overflow_count(), 1);
        assert_eq!(queue.pop(), Some(vec![1]));
        assert_eq!(queue.pop(), Some(vec![2]));
        assert_eq!(queue.pop(), None, "the dropped packet must never appear later");
    }

    #[test]
    fn default_capacity_matches_the_32_slot_design() {
        let queue = PendingQueue::default();
        assert_eq!(queue.capacity, DEFAULT_CAPACITY);
    }
}
