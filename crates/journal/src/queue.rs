//! Bounded FIFO buffer between monitors and the traversal driver
//!
//! Producers block while the queue is full, consumers while it is empty;
//! every wait is bounded by a timeout. `close()` wakes all waiters at once so
//! shutdown never hangs on a blocked monitor.

use feed_core::Change;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A change together with its queue position
#[derive(Debug, Clone)]
pub struct QueuedChange {
    /// Monotonically increasing queue position
    pub sequence: u64,
    /// The change itself
    pub change: Change,
}

/// Reasons a change could not be enqueued; the change is handed back
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("change queue is closed")]
    Closed(Change),

    #[error("timed out waiting for change queue space")]
    Timeout(Change),
}

impl QueueError {
    /// Recover the change that was not enqueued
    pub fn into_change(self) -> Change {
        match self {
            Self::Closed(change) | Self::Timeout(change) => change,
        }
    }
}

struct QueueState {
    entries: VecDeque<QueuedChange>,
    capacity: usize,
    next_sequence: u64,
    closed: bool,
}

/// Bounded, ordered change buffer
pub struct ChangeQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl ChangeQueue {
    /// Create an open queue holding at most `capacity` changes
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                capacity: capacity.max(1),
                next_sequence: 1,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue a change, waiting up to `timeout` for space
    ///
    /// Returns the queue position assigned to the change.
    pub fn put(&self, change: Change, timeout: Duration) -> Result<u64, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(QueueError::Closed(change));
            }
            if state.entries.len() < state.capacity {
                break;
            }
            if self.not_full.wait_until(&mut state, deadline).timed_out()
                && state.entries.len() >= state.capacity
                && !state.closed
            {
                return Err(QueueError::Timeout(change));
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push_back(QueuedChange { sequence, change });
        drop(state);

        self.not_empty.notify_one();
        Ok(sequence)
    }

    /// Dequeue the oldest change, waiting up to `timeout` for one to arrive
    pub fn take(&self, timeout: Duration) -> Option<QueuedChange> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(entry) = state.entries.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(entry);
            }
            if state.closed {
                return None;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() && state.entries.is_empty() {
                return None;
            }
        }
    }

    /// Dequeue the oldest change without waiting; `None` means no change
    pub fn poll(&self) -> Option<QueuedChange> {
        let entry = self.state.lock().entries.pop_front();
        if entry.is_some() {
            self.not_full.notify_one();
        }
        entry
    }

    /// Close the queue and wake every blocked producer and consumer
    ///
    /// Buffered changes are discarded.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.entries.clear();
        drop(state);

        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Re-arm a closed queue; positions continue from `next_sequence`
    pub fn reopen(&self, next_sequence: u64) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.closed = false;
        state.next_sequence = state.next_sequence.max(next_sequence);
    }

    /// Change the capacity; takes effect for subsequent puts
    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity.max(1);
        self.not_full.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Position the next enqueued change will receive
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().next_sequence
    }
}
