//! Generic bounded ring buffer backing scrollback, history and log storage
//! (spec §3 data model, §4.8 Observability Logs).
//!
//! Deep-copy-on-read: `snapshot()` clones every element rather than handing
//! out a reference, matching the spec's §4.3 "Snapshot/Delta" requirement
//! that readers never observe a buffer mutated out from under them.

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: std::collections::VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            items: std::collections::VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Pushes `item`, evicting the oldest entry if at capacity.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of items evicted over this buffer's lifetime, used by
    /// the Input Line Buffer's `unread_count`-on-eviction accounting (spec
    /// §9 open question, resolved in DESIGN.md).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Deep copy of every retained item, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Deep copy of the most recent `n` items, oldest first.
    pub fn tail(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut rb = RingBuffer::new(3);
        rb.push(1);
        rb.push(2);
        rb.push(3);
        rb.push(4);
        assert_eq!(rb.snapshot(), vec![2, 3, 4]);
        assert_eq!(rb.dropped(), 1);
    }

    #[test]
    fn tail_returns_most_recent_in_order() {
        let mut rb = RingBuffer::new(10);
        for i in 0..5 {
            rb.push(i);
        }
        assert_eq!(rb.tail(2), vec![3, 4]);
        assert_eq!(rb.tail(100), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn snapshot_is_independent_of_future_mutation() {
        let mut rb = RingBuffer::new(4);
        rb.push("a".to_string());
        let snap = rb.snapshot();
        rb.push("b".to_string());
        assert_eq!(snap, vec!["a".to_string()]);
    }
}
