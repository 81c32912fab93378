//! Fixed-capacity message history.
//!
//! When the history is full, pushing a new entry evicts the oldest one.
//! Memory use is bounded at `capacity` entries regardless of how long a
//! session stays connected.

use std::collections::VecDeque;

use crate::constants::HISTORY_CAPACITY;

/// Bounded, ordered history of entries (oldest first).
#[derive(Debug, Clone)]
pub struct History<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    /// Create a history holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "History capacity must be > 0");
        Self {
            // VecDeque grows lazily; don't reserve the full 10k up front.
            buf: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Create a history with [`HISTORY_CAPACITY`] entries.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(HISTORY_CAPACITY)
    }

    /// Append `entry`, evicting and returning the oldest one if full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.buf.len() >= self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(entry);
        evicted
    }

    /// Iterate entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.buf.iter()
    }

    /// Most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop every entry without changing capacity.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Configured maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> History<T> {
    /// Copy of all entries, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut history = History::new(3);
        assert!(history.push(1).is_none());
        assert!(history.push(2).is_none());
        assert_eq!(history.to_vec(), vec![1, 2]);
        assert_eq!(history.last(), Some(&2));
    }

    #[test]
    fn test_overflow_evicts_exactly_the_oldest() {
        let mut history = History::with_default_capacity();
        for i in 0..HISTORY_CAPACITY {
            history.push(i);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);

        let evicted = history.push(HISTORY_CAPACITY);
        assert_eq!(evicted, Some(0));
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.iter().next(), Some(&1));
        assert_eq!(history.last(), Some(&HISTORY_CAPACITY));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut history = History::new(5);
        for i in 0..50 {
            history.push(i);
            assert!(history.len() <= history.capacity());
        }
        assert_eq!(history.to_vec(), vec![45, 46, 47, 48, 49]);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut history = History::new(4);
        history.push("a");
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 4);
    }

    #[test]
    #[should_panic(expected = "History capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _ = History::<u8>::new(0);
    }
}
