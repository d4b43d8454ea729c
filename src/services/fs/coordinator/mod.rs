//! Coalescing I/O coordinator
//!
//! The IoCoordinator sits between the application and a filesystem backend:
//! - Concurrent stats and reads of the same path share one backend call
//! - Every write is its own backend call, attempted exactly once
//! - Queued work is drained by a single loop in stat, write, read order
//! - Failed reads are retried until they succeed; failed stats report
//!   `NotFound`; failed writes report the backend error to their caller
//! - Callers can wait for the next point where everything has settled
//!
//! Entry points register the request synchronously and return a handle
//! that can be awaited later. They must be called from within a Tokio
//! runtime, since the first request after an idle period spawns the drain
//! task.
//!
//! # Example
//!
//! ```
//! use fresh_io::services::fs::{IoCoordinator, MemoryFsBackend, StatResult};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let memory = Arc::new(MemoryFsBackend::new());
//! let io = IoCoordinator::with_backend(memory);
//!
//! let written = io.write("/notes.txt", "hello");
//! let first = io.read("/notes.txt");
//! let second = io.read("/notes.txt");
//! assert_eq!(first.id(), second.id());
//!
//! written.await.unwrap();
//! assert_eq!(first.await.unwrap(), "hello");
//! assert_eq!(second.await.unwrap(), "hello");
//! assert_eq!(io.stat("/missing").await.unwrap(), StatResult::NotFound);
//! # }
//! ```

mod handle;
mod notifier;
mod registry;
mod trigger;

pub use handle::{
    Closed, ReadHandle, RequestId, SettledHandle, StatHandle, StatResult, WriteError, WriteHandle,
};
pub use notifier::SettledCallback;
pub use registry::{LoopState, QueueSnapshot};

use super::backend::FsBackend;
use super::path_key::PathKey;
use crate::config::CoordinatorConfig;
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use trigger::CoordinatorInner;

/// Request-coalescing scheduler over an [`FsBackend`]
///
/// Cloning is cheap and every clone drives the same queues.
#[derive(Clone)]
pub struct IoCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl fmt::Debug for IoCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoCoordinator")
            .field("backend", &"<dyn FsBackend>")
            .field("config", &self.inner.config)
            .field("queues", &self.snapshot())
            .finish()
    }
}

impl IoCoordinator {
    /// Create a coordinator draining into `backend`
    ///
    /// An invalid `config` is logged and used as given; a relative
    /// `base_dir` is resolved against the working directory.
    pub fn new(backend: Arc<dyn FsBackend>, config: CoordinatorConfig) -> Self {
        if let Err(e) = config.validate() {
            tracing::warn!("Using I/O coordinator config that failed validation: {}", e);
        }
        Self {
            inner: Arc::new(CoordinatorInner::new(backend, config)),
        }
    }

    /// Create a coordinator with the default configuration
    pub fn with_backend(backend: Arc<dyn FsBackend>) -> Self {
        Self::new(backend, CoordinatorConfig::default())
    }

    /// Normalize `path` the way the entry points do
    pub fn path_key(&self, path: &Path) -> PathKey {
        PathKey::new(path, self.inner.config.base_dir.as_deref())
    }

    /// Get metadata for a path
    ///
    /// Joins an outstanding stat of the same path if there is one. A failed
    /// backend stat resolves to [`StatResult::NotFound`]; the handle only
    /// errors if the coordinator shuts down first.
    pub fn stat(&self, path: impl AsRef<Path>) -> StatHandle {
        let key = self.path_key(path.as_ref());
        let (handle, queued) = self.inner.lock().register_stat(key);
        if queued {
            self.inner.wake();
        }
        handle
    }

    /// Read a whole file
    ///
    /// Joins an outstanding read of the same path if there is one, so every
    /// caller gets the bytes from one backend call. A failed backend read is
    /// retried on later passes until it succeeds; the handle only errors if
    /// the coordinator shuts down first.
    pub fn read(&self, path: impl AsRef<Path>) -> ReadHandle {
        let key = self.path_key(path.as_ref());
        let (handle, queued) = self.inner.lock().register_read(key);
        if queued {
            self.inner.wake();
        }
        handle
    }

    /// Replace the contents of a file
    ///
    /// `data` is owned by the request from here on (`String`, `Vec<u8>`,
    /// `&'static str`, `Bytes`, ...). Writes are never merged: each call
    /// gets exactly one backend attempt and its own outcome.
    pub fn write(&self, path: impl AsRef<Path>, data: impl Into<Bytes>) -> WriteHandle {
        let key = self.path_key(path.as_ref());
        let (handle, queued) = self.inner.lock().register_write(key, data.into());
        if queued {
            self.inner.wake();
        }
        handle
    }

    /// Like [`write`](Self::write), copying a borrowed buffer
    pub fn write_copy(&self, path: impl AsRef<Path>, data: &[u8]) -> WriteHandle {
        self.write(path, Bytes::copy_from_slice(data))
    }

    /// Call `callback` once, the next time a pass ends with nothing left
    /// queued or deferred
    ///
    /// Waiters are released in registration order, one per quiescent pass
    /// end. The callback receives the number of waiters still queued behind
    /// it. It runs on the drain task, so it should not block.
    pub fn on_all_settled<F>(&self, callback: F)
    where
        F: FnOnce(usize) + Send + 'static,
    {
        self.inner.lock().add_waiter(Box::new(callback));
    }

    /// Future form of [`on_all_settled`](Self::on_all_settled)
    pub fn await_all_settled(&self) -> SettledHandle {
        let (tx, rx) = oneshot::channel();
        self.on_all_settled(move |remaining| {
            let _ = tx.send(remaining);
        });
        SettledHandle::new(rx)
    }

    /// Current queue depths and loop state
    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.lock().snapshot()
    }

    /// Stop the coordinator for good
    ///
    /// Every pending request and waiter is dropped and its handle resolves
    /// to `Closed`. The drain loop stops at its next checkpoint; a backend
    /// call already in flight runs to completion but its result is
    /// discarded. Later requests resolve to `Closed` immediately.
    pub fn shutdown(&self) {
        let teardown = self.inner.lock().close();
        tracing::info!(
            "I/O coordinator shut down, dropped {} pending request(s) and {} waiter(s)",
            teardown.pending_requests(),
            teardown.waiters()
        );
        drop(teardown);
        self.inner.interrupt();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().closed
    }

    /// Get the underlying backend
    pub fn backend(&self) -> &Arc<dyn FsBackend> {
        &self.inner.backend
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }
}
