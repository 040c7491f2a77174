//! Flush synchronization barrier.
//!
//! Lets a caller block until a flush marker it requested shows up on the
//! results stream, or learn that the stream ended without it. The marker,
//! the parsing flags and the predicate check all live under one mutex, so a
//! waiter can never miss a wakeup.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ar_common::FlushId;

#[derive(Debug, Default)]
struct FlushState {
    /// Set once by the first `mark_started` and never cleared.
    started: bool,
    in_progress: bool,
    acknowledged: HashSet<FlushId>,
}

impl FlushState {
    fn finished(&self) -> bool {
        self.started && !self.in_progress
    }
}

/// Shared between the ingestion thread and any number of flush waiters.
#[derive(Debug, Default)]
pub struct FlushBarrier {
    state: Mutex<FlushState>,
    cond: Condvar,
}

impl FlushBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream processing began.
    pub fn mark_started(&self) {
        let mut state = self.lock();
        state.started = true;
        state.in_progress = true;
        self.cond.notify_all();
    }

    /// Stream processing ended, successfully or not.
    pub fn mark_finished(&self) {
        self.lock().in_progress = false;
        self.cond.notify_all();
    }

    /// Record that the flush `id` has been fully processed.
    pub fn acknowledge(&self, id: FlushId) {
        self.lock().acknowledged.insert(id);
        self.cond.notify_all();
    }

    /// Block until `id` is acknowledged (true, consuming it) or the stream
    /// finished without it (false).
    ///
    /// Waiting before the stream has started is allowed. A poisoned lock
    /// counts as an interrupted wait and returns false.
    pub fn wait_for(&self, id: &FlushId) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        loop {
            if state.acknowledged.remove(id) {
                return true;
            }
            if state.finished() {
                return false;
            }
            state = match self.cond.wait(state) {
                Ok(guard) => guard,
                Err(_) => return false,
            };
        }
    }

    /// Like [`wait_for`](Self::wait_for), giving up after `timeout`.
    pub fn wait_for_timeout(&self, id: &FlushId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        loop {
            if state.acknowledged.remove(id) {
                return true;
            }
            if state.finished() {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            state = match self.cond.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(_) => return false,
            };
        }
    }

    /// Whether stream processing is currently running.
    pub fn in_progress(&self) -> bool {
        self.lock().in_progress
    }

    fn lock(&self) -> MutexGuard<'_, FlushState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
