//! Single-producer / single-consumer handoff between a capture thread and a writer thread.
//!
//! `push` never blocks. `pop` parks the caller on a condition variable until an item
//! arrives; the lock is released while parked, so producer and consumer never deadlock
//! against each other. Depth control is left to the producer (see [`BoundedQueue::wait_for_room`]).

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    /// Set once the producer will never push again
    closed: bool,
}

/// FIFO queue with blocking pop and a drained-on-close predicate.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append to the tail and wake one waiting consumer.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        debug_assert!(!state.closed, "push after close");
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Remove the head, parking until one is available.
    ///
    /// Blocks forever if nothing is ever pushed again; the capture consumer uses
    /// [`pop_or_drained`](Self::pop_or_drained) instead.
    pub fn pop(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return item;
            }
            // re-checked on every wake, spurious or not
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop), but returns `None` once the queue is closed *and* empty.
    ///
    /// Both halves of the predicate are evaluated together under the lock, so items
    /// pushed before [`close`](Self::close) are always returned first.
    pub fn pop_or_drained(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let item = self.state.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Mark that no more items will be pushed and wake every parked thread.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Snapshot; stale as soon as it returns.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Park for at most `timeout` until fewer than `limit` items are queued.
    ///
    /// Returns `true` if there is room. Callers loop on this so they can check
    /// their own stop flag between slices.
    pub fn wait_for_room(&self, limit: usize, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.items.len() < limit || state.closed {
            return true;
        }
        let _ = self.not_full.wait_for(&mut state, timeout);
        state.items.len() < limit || state.closed
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
