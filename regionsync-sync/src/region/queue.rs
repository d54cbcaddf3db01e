//! Bounded FIFO of change events awaiting delivery.

use crate::{SyncError, SyncResult};
use regionsync_types::{ChangeEvent, FileId};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bounded, in-process FIFO of pending [`ChangeEvent`]s.
///
/// Nothing is lost except on a failed [`push`](Self::push) or an explicit
/// [`clear`](Self::clear). Operations never block on an empty queue.
#[derive(Debug)]
pub struct ChangeQueue {
    events: Mutex<VecDeque<ChangeEvent>>,
    capacity: usize,
}

impl ChangeQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ChangeEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an event, failing with [`SyncError::QueueFull`] at capacity.
    pub fn push(&self, event: ChangeEvent) -> SyncResult<()> {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            return Err(SyncError::QueueFull {
                capacity: self.capacity,
            });
        }
        events.push_back(event);
        Ok(())
    }

    /// Removes and returns the oldest event.
    pub fn pop(&self) -> Option<ChangeEvent> {
        self.lock().pop_front()
    }

    /// Removes and returns up to `n` of the oldest events.
    pub fn pop_n(&self, n: usize) -> Vec<ChangeEvent> {
        let mut events = self.lock();
        let take = n.min(events.len());
        events.drain(..take).collect()
    }

    /// Removes and returns every buffered event.
    pub fn drain_all(&self) -> Vec<ChangeEvent> {
        self.lock().drain(..).collect()
    }

    /// Puts previously removed events back at the front, oldest first.
    ///
    /// Events that no longer fit are returned to the caller.
    pub fn restore(&self, mut removed: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        let mut events = self.lock();
        let room = self.capacity.saturating_sub(events.len());
        let overflow = removed.split_off(room.min(removed.len()));
        for event in removed.into_iter().rev() {
            events.push_front(event);
        }
        overflow
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns true if any buffered event targets `file_id`.
    #[must_use]
    pub fn contains_file(&self, file_id: &FileId) -> bool {
        self.lock().iter().any(|e| &e.file_id == file_id)
    }

    /// Discards every buffered event, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut events = self.lock();
        let dropped = events.len();
        events.clear();
        dropped
    }
}
