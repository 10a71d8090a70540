//! Fixed-capacity, insertion-ordered result history.

use std::collections::VecDeque;

use crate::error::{ListenerError, Result};

/// Capacity used unless reconfigured.
pub const DEFAULT_CAPACITY: usize = 20;

/// Ring buffer keeping the most recent `capacity` entries.
///
/// Appending at capacity evicts the oldest entry; it never fails.
///
/// ```
/// use bus_listener::listener::ResultBuffer;
///
/// let mut buf = ResultBuffer::with_capacity(2);
/// buf.append(1);
/// buf.append(2);
/// assert_eq!(buf.append(3), Some(1));
/// assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
/// ```
#[derive(Clone, Debug)]
pub struct ResultBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> Default for ResultBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultBuffer<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A zero capacity is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, returning the evicted oldest entry if the buffer was full.
    pub fn append(&mut self, item: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(item);
        evicted
    }

    /// Change the capacity.
    ///
    /// Existing entries are re-inserted in their original order until the new
    /// capacity is reached, so shrinking keeps the *oldest* entries. Resize
    /// before traffic starts if the newest entries matter.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.entries.truncate(self.capacity);
        self.entries.shrink_to(self.capacity);
    }

    /// Pop the earliest-inserted entry.
    pub fn remove_oldest(&mut self) -> Result<T> {
        self.entries.pop_front().ok_or(ListenerError::EmptyBuffer)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}
