//! Completion handles returned by the coordinator entry points
//!
//! Each handle is a future over a oneshot channel whose sender lives in the
//! coordinator's registry. The sender is only ever dropped unsent when the
//! coordinator shuts down, which the handles report as [`Closed`].

use crate::services::fs::backend::FsMetadata;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Identity of a pending stat or read
///
/// Handles returned while the same request is outstanding share an id; a
/// request issued after the previous one settled gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of a stat request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatResult {
    Found(FsMetadata),
    /// The path does not exist or could not be inspected
    NotFound,
}

impl StatResult {
    pub fn is_found(&self) -> bool {
        matches!(self, StatResult::Found(_))
    }

    pub fn metadata(&self) -> Option<&FsMetadata> {
        match self {
            StatResult::Found(meta) => Some(meta),
            StatResult::NotFound => None,
        }
    }

    pub fn into_metadata(self) -> Option<FsMetadata> {
        match self {
            StatResult::Found(meta) => Some(meta),
            StatResult::NotFound => None,
        }
    }
}

/// The coordinator was shut down before the request settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I/O coordinator shut down")
    }
}

impl std::error::Error for Closed {}

/// Why a write did not complete
#[derive(Debug)]
pub enum WriteError {
    /// The single backend attempt failed
    Backend(io::Error),
    Closed,
}

impl WriteError {
    pub fn is_closed(&self) -> bool {
        matches!(self, WriteError::Closed)
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Backend(e) => write!(f, "write failed: {e}"),
            WriteError::Closed => fmt::Display::fmt(&Closed, f),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Backend(e) => Some(e),
            WriteError::Closed => None,
        }
    }
}

impl From<Closed> for WriteError {
    fn from(_: Closed) -> Self {
        WriteError::Closed
    }
}

/// Pending result of [`IoCoordinator::stat`](super::IoCoordinator::stat)
#[derive(Debug)]
pub struct StatHandle {
    id: RequestId,
    rx: oneshot::Receiver<StatResult>,
}

impl StatHandle {
    pub(super) fn new(id: RequestId, rx: oneshot::Receiver<StatResult>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for StatHandle {
    type Output = Result<StatResult, Closed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map_err(|_| Closed)
    }
}

/// Pending result of [`IoCoordinator::read`](super::IoCoordinator::read)
#[derive(Debug)]
pub struct ReadHandle {
    id: RequestId,
    rx: oneshot::Receiver<Bytes>,
}

impl ReadHandle {
    pub(super) fn new(id: RequestId, rx: oneshot::Receiver<Bytes>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for ReadHandle {
    type Output = Result<Bytes, Closed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map_err(|_| Closed)
    }
}

/// Pending result of [`IoCoordinator::write`](super::IoCoordinator::write)
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<io::Result<()>>,
}

impl WriteHandle {
    pub(super) fn new(rx: oneshot::Receiver<io::Result<()>>) -> Self {
        Self { rx }
    }
}

impl Future for WriteHandle {
    type Output = Result<(), WriteError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|received| match received {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteError::Backend(e)),
            Err(_) => Err(WriteError::Closed),
        })
    }
}

/// Pending result of
/// [`IoCoordinator::await_all_settled`](super::IoCoordinator::await_all_settled)
///
/// Resolves to the number of waiters still queued behind this one.
#[derive(Debug)]
pub struct SettledHandle {
    rx: oneshot::Receiver<usize>,
}

impl SettledHandle {
    pub(super) fn new(rx: oneshot::Receiver<usize>) -> Self {
        Self { rx }
    }
}

impl Future for SettledHandle {
    type Output = Result<usize, Closed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map_err(|_| Closed)
    }
}
