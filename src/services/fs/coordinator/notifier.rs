//! FIFO queue of one-shot quiescence waiters

use std::collections::VecDeque;
use std::fmt;

/// Callback fired when the coordinator next goes quiet
///
/// Receives the number of waiters still queued behind it.
pub type SettledCallback = Box<dyn FnOnce(usize) + Send + 'static>;

/// Waiters in registration order. One is released per quiescent pass end.
#[derive(Default)]
pub(super) struct CompletionQueue {
    waiters: VecDeque<SettledCallback>,
}

impl fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

impl CompletionQueue {
    pub fn push(&mut self, callback: SettledCallback) {
        self.waiters.push_back(callback);
    }

    /// Take the oldest waiter along with the count left behind it
    pub fn pop_next(&mut self) -> Option<ReleasedWaiter> {
        let callback = self.waiters.pop_front()?;
        Some(ReleasedWaiter {
            callback,
            remaining: self.waiters.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

}

/// A waiter removed from the queue, to be fired outside the state lock
pub(super) struct ReleasedWaiter {
    callback: SettledCallback,
    remaining: usize,
}

impl ReleasedWaiter {
    pub fn fire(self) {
        (self.callback)(self.remaining)
    }
}
