//! Bounded FIFO queue for per-session outbound frames
//!
//! Each session owns its queues exclusively and mutates them only from its
//! own callbacks, so no atomics or locks are needed here:
//! - Fixed capacity chosen at construction; pushes beyond it are rejected
//! - Ring buffer storage (`VecDeque`) with no reallocation once warmed up

use std::collections::VecDeque;

/// FIFO with a hard capacity bound
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Create an effectively unbounded queue
    pub fn unbounded() -> Self {
        Self {
            items: VecDeque::new(),
            capacity: usize::MAX,
        }
    }

    /// Try to push an item at the back.
    /// Returns Err(item) if the queue is full
    #[inline]
    pub fn try_push(&mut self, item: T) -> std::result::Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Pop the front item
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Front item
    #[inline]
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Mutable front item
    #[inline]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }

    /// Pop front items while `pred` holds, returning how many were removed
    pub fn pop_while(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut removed = 0;
        while self.items.front().is_some_and(&mut pred) {
            self.items.pop_front();
            removed += 1;
        }
        removed
    }

    /// Drop every item
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Check if queue is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check if queue is at capacity
    #[inline]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Number of queued items
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Iterate front to back
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
