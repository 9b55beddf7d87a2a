use serde::{Serialize, Serializer};
use std::collections::vec_deque;
use std::collections::VecDeque;

/// Fixed-capacity series that evicts its oldest entries on overflow.
#[derive(Clone, Debug)]
pub struct RollingBuffer<T> {
    capacity: usize,
    inner: VecDeque<T>,
}

impl<T> RollingBuffer<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, item: T) {
        self.inner.push_back(item);
        while self.inner.len() > self.capacity {
            self.inner.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn latest(&self) -> Option<&T> {
        self.inner.back()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.inner.iter()
    }
}

impl<T: Clone> RollingBuffer<T> {
    /// Last `limit` items (all of them when `None`), oldest first.
    pub fn history(&self, limit: Option<usize>) -> Vec<T> {
        let len = self.inner.len();
        let take = limit.unwrap_or(len).min(len);
        self.inner.iter().skip(len - take).cloned().collect()
    }
}

impl<T: Serialize> Serialize for RollingBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.inner)
    }
}
