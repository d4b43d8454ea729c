//! The drain loop
//!
//! One Tokio task per busy period. Each pass runs three phases in fixed
//! order (stat, write, read), each covering only the entries that were
//! queued when the phase began. Between passes the loop decides whether to
//! run again, retry deferred reads, or go idle and release one completion
//! waiter. A systemic backend fault aborts the pass and retries it after
//! the configured backoff.
//!
//! `loop_state` is the re-entrancy guard: `wake` only spawns the task when
//! it flips the state from `Idle`, and only the task sets it back.

use super::handle::StatResult;
use super::registry::{CoordinatorState, LoopState};
use crate::config::CoordinatorConfig;
use crate::services::fs::backend::{BackendError, FsBackend};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Why a pass stopped early
enum PassAbort {
    Fault(io::Error),
    Closed,
}

/// What to do once a pass completes
enum PassEnd {
    /// Requests arrived during the pass
    MoreWork { deferred_pending: bool },
    /// Only deferred reads remain; they are back in the read queue
    RetryDeferred(usize),
    /// Everything drained; the loop is idle now
    Quiescent(Option<super::notifier::ReleasedWaiter>),
    Closed,
}

pub(super) struct CoordinatorInner {
    pub backend: Arc<dyn FsBackend>,
    pub config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    /// Cuts a deferred-read retry delay short when new requests arrive.
    /// Only signalled while `CoordinatorState` records a wait in progress.
    new_work: Notify,
}

impl CoordinatorInner {
    pub fn new(backend: Arc<dyn FsBackend>, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            config,
            state: Mutex::new(CoordinatorState::default()),
            new_work: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state, bailing out if the coordinator was shut down
    fn checkpoint(&self) -> Result<MutexGuard<'_, CoordinatorState>, PassAbort> {
        let state = self.lock();
        if state.closed {
            return Err(PassAbort::Closed);
        }
        Ok(state)
    }

    /// Signal that new work was queued.
    ///
    /// Starts the loop if it is idle; otherwise the running loop picks the
    /// work up before it goes idle. Must be called from a Tokio runtime.
    pub fn wake(self: &Arc<Self>) {
        let (start, cut_wait) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            match state.loop_state {
                LoopState::Idle => {
                    state.loop_state = LoopState::Running;
                    (true, false)
                }
                LoopState::Running | LoopState::BackoffWait => {
                    (false, state.cut_retry_wait_short())
                }
            }
        };

        if start {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run().await });
        } else if cut_wait {
            // Stores no permit: only a wait already in progress is woken
            self.new_work.notify_waiters();
        }
    }

    /// Let a loop parked in a retry delay see that the coordinator closed
    pub fn interrupt(&self) {
        self.new_work.notify_waiters();
    }

    async fn run(self: Arc<Self>) {
        tracing::debug!("I/O coordinator loop started");
        let mut pass: u64 = 0;
        let mut retry_round: u32 = 0;

        loop {
            pass += 1;
            tracing::debug!("Starting drain pass {}", pass);

            match self.run_pass().await {
                Ok(()) => {}
                Err(PassAbort::Closed) => break,
                Err(PassAbort::Fault(err)) => {
                    let backoff = self.config.fault_backoff();
                    tracing::warn!(
                        "Drain pass {} aborted by backend fault, retrying in {:?}: {}",
                        pass,
                        backoff,
                        err
                    );
                    if !self.set_loop_state(LoopState::BackoffWait) {
                        break;
                    }
                    tokio::time::sleep(backoff).await;
                    if !self.set_loop_state(LoopState::Running) {
                        break;
                    }
                    continue;
                }
            }

            match self.finish_pass() {
                PassEnd::Closed => break,
                PassEnd::MoreWork { deferred_pending } => {
                    if !deferred_pending {
                        retry_round = 0;
                    }
                    // Next pass goes through the scheduler, not the stack
                    tokio::task::yield_now().await;
                }
                PassEnd::RetryDeferred(count) => {
                    retry_round = retry_round.saturating_add(1);
                    let delay = self.config.read_retry.delay_for_round(retry_round);
                    tracing::debug!(
                        "Retrying {} deferred read(s) in {:?} (round {})",
                        count,
                        delay,
                        retry_round
                    );
                    self.wait_for_retry(delay).await;
                }
                PassEnd::Quiescent(waiter) => {
                    tracing::debug!("I/O coordinator idle after {} pass(es)", pass);
                    if let Some(waiter) = waiter {
                        waiter.fire();
                    }
                    return;
                }
            }
        }

        tracing::debug!("I/O coordinator loop stopped after shutdown");
    }

    fn set_loop_state(&self, loop_state: LoopState) -> bool {
        match self.checkpoint() {
            Ok(mut state) => {
                state.loop_state = loop_state;
                true
            }
            Err(_) => false,
        }
    }

    /// Wait out a deferred-read retry delay, ending early if work arrives
    /// or the coordinator closes after the wait began
    async fn wait_for_retry(&self, delay: Duration) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            let notified = self.new_work.notified();
            tokio::pin!(notified);
            // Registered before the flag check, so a wake in between is not lost
            notified.as_mut().enable();

            let cut_short = {
                let state = self.lock();
                state.closed || state.retry_cut_short()
            };
            if !cut_short {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = notified.as_mut() => {}
                }
            }
        }
        self.lock().end_retry_wait();
    }

    async fn run_pass(&self) -> Result<(), PassAbort> {
        self.stat_phase().await?;
        self.write_phase().await?;
        self.read_phase().await
    }

    fn finish_pass(&self) -> PassEnd {
        let mut state = self.lock();
        if state.closed {
            return PassEnd::Closed;
        }
        if state.has_queued_work() {
            return PassEnd::MoreWork {
                deferred_pending: state.has_deferred_reads(),
            };
        }
        if state.has_deferred_reads() {
            let count = state.requeue_deferred();
            state.begin_retry_wait();
            return PassEnd::RetryDeferred(count);
        }
        PassEnd::Quiescent(state.settle())
    }

    /// Stat every path queued at phase start. Failures resolve `NotFound`.
    async fn stat_phase(&self) -> Result<(), PassAbort> {
        let count = self.checkpoint()?.stat_queue.len();

        for _ in 0..count {
            let key = {
                let state = self.checkpoint()?;
                match state.stat_queue.front() {
                    Some(key) => key.clone(),
                    None => break,
                }
            };

            let result = match self.backend.stat(key.as_path()).await {
                Ok(metadata) => StatResult::Found(metadata),
                Err(BackendError::Systemic(err)) => return Err(PassAbort::Fault(err)),
                Err(BackendError::Path(err)) => {
                    tracing::debug!("stat {}: not found ({})", key, err);
                    StatResult::NotFound
                }
            };

            let pending = {
                let mut state = self.checkpoint()?;
                state.stat_queue.pop_front();
                state.take_stat(&key)
            };
            if let Some(pending) = pending {
                pending.resolve(result);
            }
        }

        Ok(())
    }

    /// One backend attempt per queued write; the outcome is final either way.
    async fn write_phase(&self) -> Result<(), PassAbort> {
        let count = self.checkpoint()?.write_queue.len();

        for _ in 0..count {
            let (key, data) = {
                let state = self.checkpoint()?;
                match state.write_queue.front() {
                    Some(write) => (write.path.clone(), write.data.clone()),
                    None => break,
                }
            };

            let outcome = match self.backend.write_all(key.as_path(), data).await {
                Ok(()) => {
                    tracing::debug!("Wrote {}", key);
                    Ok(())
                }
                Err(BackendError::Systemic(err)) => return Err(PassAbort::Fault(err)),
                Err(BackendError::Path(err)) => {
                    tracing::warn!("Write to {} failed: {}", key, err);
                    Err(err)
                }
            };

            let pending = self.checkpoint()?.write_queue.pop_front();
            if let Some(pending) = pending {
                pending.settle(outcome);
            }
        }

        Ok(())
    }

    /// Read every path queued at phase start. Failures are parked in the
    /// deferred set with their waiters still attached.
    async fn read_phase(&self) -> Result<(), PassAbort> {
        let count = self.checkpoint()?.read_queue.len();

        for _ in 0..count {
            let key = {
                let state = self.checkpoint()?;
                match state.read_queue.front() {
                    Some(key) => key.clone(),
                    None => break,
                }
            };

            match self.backend.read_all(key.as_path()).await {
                Ok(data) => {
                    let pending = {
                        let mut state = self.checkpoint()?;
                        state.read_queue.pop_front();
                        state.take_read(&key)
                    };
                    if let Some(pending) = pending {
                        if pending.failed_attempts() > 0 {
                            tracing::debug!(
                                "Read of {} succeeded after {} failed attempt(s)",
                                key,
                                pending.failed_attempts()
                            );
                        }
                        pending.resolve(data);
                    }
                }
                Err(BackendError::Systemic(err)) => return Err(PassAbort::Fault(err)),
                Err(BackendError::Path(err)) => {
                    let attempts = {
                        let mut state = self.checkpoint()?;
                        state.read_queue.pop_front();
                        state.defer_read(key.clone())
                    };
                    if attempts <= 1 {
                        tracing::warn!("Read of {} failed, will retry: {}", key, err);
                    } else {
                        tracing::debug!("Read of {} failed again (attempt {}): {}", key, attempts, err);
                    }
                }
            }
        }

        Ok(())
    }
}
