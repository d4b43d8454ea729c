//! Pending request registry and drain queues
//!
//! Stats and reads are keyed by [`PathKey`]: while one is outstanding, later
//! requests for the same key join its waiter list instead of queueing a
//! second backend call. Writes are never merged; every call is its own
//! queue entry. A read that failed moves to `deferred_reads` but keeps its
//! registry entry, so the eventual successful retry still answers the
//! callers that are already waiting.
//!
//! Only the entry points push; only the trigger loop pops or resolves.

use super::handle::{ReadHandle, RequestId, StatHandle, StatResult, WriteHandle};
use super::notifier::{CompletionQueue, ReleasedWaiter, SettledCallback};
use crate::services::fs::path_key::PathKey;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io;
use tokio::sync::oneshot;

/// Trigger loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// No pass running and nothing queued
    #[default]
    Idle,
    /// A pass is in progress, or the next one is about to start
    Running,
    /// The last pass hit a systemic fault; waiting out the backoff delay
    BackoffWait,
}

/// Point-in-time view of the coordinator's queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub state: LoopState,
    pub stats: usize,
    pub writes: usize,
    pub reads: usize,
    pub deferred_reads: usize,
    pub waiters: usize,
}

impl QueueSnapshot {
    /// Nothing queued and nothing deferred
    pub fn is_quiescent(&self) -> bool {
        self.stats == 0 && self.writes == 0 && self.reads == 0 && self.deferred_reads == 0
    }
}

#[derive(Debug)]
pub(super) struct PendingStat {
    id: RequestId,
    waiters: Vec<oneshot::Sender<StatResult>>,
}

impl PendingStat {
    pub fn resolve(self, result: StatResult) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[derive(Debug)]
pub(super) struct PendingRead {
    id: RequestId,
    waiters: Vec<oneshot::Sender<Bytes>>,
    failed_attempts: u32,
}

impl PendingRead {
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn resolve(self, data: Bytes) {
        for waiter in self.waiters {
            let _ = waiter.send(data.clone());
        }
    }
}

#[derive(Debug)]
pub(super) struct PendingWrite {
    pub path: PathKey,
    pub data: Bytes,
    reply: oneshot::Sender<io::Result<()>>,
}

impl PendingWrite {
    pub fn settle(self, outcome: io::Result<()>) {
        let _ = self.reply.send(outcome);
    }
}

/// Everything removed from the registry by a shutdown
///
/// Dropping it drops the senders, which resolves the matching handles with
/// `Closed`. Kept separate so that happens after the state lock is released.
#[derive(Debug, Default)]
pub(super) struct Teardown {
    stats: HashMap<PathKey, PendingStat>,
    reads: HashMap<PathKey, PendingRead>,
    writes: VecDeque<PendingWrite>,
    waiters: CompletionQueue,
}

impl Teardown {
    pub fn pending_requests(&self) -> usize {
        self.stats.len() + self.reads.len() + self.writes.len()
    }

    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }
}

#[derive(Debug, Default)]
pub(super) struct CoordinatorState {
    pub loop_state: LoopState,
    pub closed: bool,
    next_id: u64,

    /// The loop is between passes, waiting out a deferred-read retry delay
    retry_waiting: bool,
    /// Work arrived during that wait
    retry_cut_short: bool,

    stats: HashMap<PathKey, PendingStat>,
    reads: HashMap<PathKey, PendingRead>,

    pub stat_queue: VecDeque<PathKey>,
    pub write_queue: VecDeque<PendingWrite>,
    pub read_queue: VecDeque<PathKey>,
    pub deferred_reads: VecDeque<PathKey>,

    waiters: CompletionQueue,
}

impl CoordinatorState {
    fn allocate_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    /// Register a stat. Returns the handle and whether a new queue entry
    /// was created.
    pub fn register_stat(&mut self, key: PathKey) -> (StatHandle, bool) {
        let (tx, rx) = oneshot::channel();
        if self.closed {
            return (StatHandle::new(RequestId(0), rx), false);
        }

        if let Some(pending) = self.stats.get_mut(&key) {
            pending.waiters.push(tx);
            return (StatHandle::new(pending.id, rx), false);
        }

        let id = self.allocate_id();
        self.stats.insert(
            key.clone(),
            PendingStat {
                id,
                waiters: vec![tx],
            },
        );
        self.stat_queue.push_back(key);
        (StatHandle::new(id, rx), true)
    }

    /// Register a read. Returns the handle and whether a new queue entry
    /// was created.
    pub fn register_read(&mut self, key: PathKey) -> (ReadHandle, bool) {
        let (tx, rx) = oneshot::channel();
        if self.closed {
            return (ReadHandle::new(RequestId(0), rx), false);
        }

        if let Some(pending) = self.reads.get_mut(&key) {
            pending.waiters.push(tx);
            return (ReadHandle::new(pending.id, rx), false);
        }

        let id = self.allocate_id();
        self.reads.insert(
            key.clone(),
            PendingRead {
                id,
                waiters: vec![tx],
                failed_attempts: 0,
            },
        );
        self.read_queue.push_back(key);
        (ReadHandle::new(id, rx), true)
    }

    /// Queue a write. Always a new entry unless the coordinator is closed.
    pub fn register_write(&mut self, key: PathKey, data: Bytes) -> (WriteHandle, bool) {
        let (tx, rx) = oneshot::channel();
        if self.closed {
            return (WriteHandle::new(rx), false);
        }

        self.write_queue.push_back(PendingWrite {
            path: key,
            data,
            reply: tx,
        });
        (WriteHandle::new(rx), true)
    }

    pub fn add_waiter(&mut self, callback: SettledCallback) {
        // A closed coordinator never goes quiet again; the callback is dropped.
        if !self.closed {
            self.waiters.push(callback);
        }
    }

    pub fn take_stat(&mut self, key: &PathKey) -> Option<PendingStat> {
        self.stats.remove(key)
    }

    pub fn take_read(&mut self, key: &PathKey) -> Option<PendingRead> {
        self.reads.remove(key)
    }

    /// Park a failed read for a later retry round.
    ///
    /// Returns the number of failed attempts so far.
    pub fn defer_read(&mut self, key: PathKey) -> u32 {
        let attempts = match self.reads.get_mut(&key) {
            Some(pending) => {
                pending.failed_attempts += 1;
                pending.failed_attempts
            }
            None => return 0,
        };
        if !self.deferred_reads.contains(&key) {
            self.deferred_reads.push_back(key);
        }
        attempts
    }

    /// Move every deferred read back into the active read queue
    pub fn requeue_deferred(&mut self) -> usize {
        let count = self.deferred_reads.len();
        self.read_queue.extend(self.deferred_reads.drain(..));
        count
    }

    /// Stat, write or read entries waiting for a pass
    pub fn has_queued_work(&self) -> bool {
        !self.stat_queue.is_empty() || !self.write_queue.is_empty() || !self.read_queue.is_empty()
    }

    pub fn has_deferred_reads(&self) -> bool {
        !self.deferred_reads.is_empty()
    }

    /// Mark the start of a deferred-read retry delay
    pub fn begin_retry_wait(&mut self) {
        self.retry_waiting = true;
        self.retry_cut_short = false;
    }

    /// Record new work against a pending retry wait.
    ///
    /// Returns true if a wait is in progress and must be woken.
    pub fn cut_retry_wait_short(&mut self) -> bool {
        if self.retry_waiting {
            self.retry_cut_short = true;
        }
        self.retry_waiting
    }

    pub fn retry_cut_short(&self) -> bool {
        self.retry_cut_short
    }

    pub fn end_retry_wait(&mut self) {
        self.retry_waiting = false;
        self.retry_cut_short = false;
    }

    /// Go idle and release the oldest waiter, if any
    pub fn settle(&mut self) -> Option<ReleasedWaiter> {
        self.loop_state = LoopState::Idle;
        self.waiters.pop_next()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.loop_state,
            stats: self.stat_queue.len(),
            writes: self.write_queue.len(),
            reads: self.read_queue.len(),
            deferred_reads: self.deferred_reads.len(),
            waiters: self.waiters.len(),
        }
    }

    /// Mark closed and hand back everything still pending
    pub fn close(&mut self) -> Teardown {
        self.closed = true;
        self.loop_state = LoopState::Idle;
        self.stat_queue.clear();
        self.read_queue.clear();
        self.deferred_reads.clear();
        Teardown {
            stats: std::mem::take(&mut self.stats),
            reads: std::mem::take(&mut self.reads),
            writes: std::mem::take(&mut self.write_queue),
            waiters: std::mem::take(&mut self.waiters),
        }
    }
}
