#![forbid(unsafe_code)]

//! Bounded ring of recent terminal failures.
//!
//! [`ErrorLog`] keeps the most recent `capacity` entries and evicts the
//! oldest when full, while counting every entry ever recorded.
//!
//! # Example
//!
//! ```
//! use sift_runtime::ErrorLog;
//!
//! let mut log = ErrorLog::new(2);
//! log.push("timeout");
//! log.push("bad gateway");
//! log.push("reset"); // evicts "timeout"
//!
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.total_count(), 3);
//! assert_eq!(log.recent(1).collect::<Vec<_>>(), vec![&"reset"]);
//! ```

use std::collections::VecDeque;

/// FIFO-evicting log with a fixed capacity.
#[derive(Debug, Clone)]
pub struct ErrorLog<T> {
    ring: VecDeque<T>,
    capacity: usize,
    /// Entries ever pushed, including evicted ones.
    total_count: usize,
}

impl<T> ErrorLog<T> {
    /// Create a log holding at most `capacity` entries. A zero capacity is
    /// treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            total_count: 0,
        }
    }

    /// Record an entry, evicting the oldest if full.
    pub fn push(&mut self, entry: T) {
        self.total_count = self.total_count.saturating_add(1);
        if self.ring.len() >= self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
    }

    /// Up to `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.ring.iter().rev().take(n)
    }

    /// Entries in memory, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.ring.iter()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.ring.back()
    }

    #[must_use]
    pub const fn total_count(&self) -> usize {
        self.total_count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries pushed out by newer ones.
    #[must_use]
    pub fn evicted_count(&self) -> usize {
        self.total_count.saturating_sub(self.ring.len())
    }

    /// Drop all entries and reset counters.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.total_count = 0;
    }
}
