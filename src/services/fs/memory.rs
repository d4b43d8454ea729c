//! In-memory filesystem backend
//!
//! Holds file contents in a map and lets callers script failures: the next N
//! attempts of an operation on a path can be made to fail, and the next call
//! of an operation kind can be made to raise a systemic fault. The scheduler
//! tests are written against this backend.

use super::backend::{BackendError, FsBackend, FsMetadata, FsOp};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<PathBuf, Bytes>,
    /// (op, path) -> number of upcoming attempts that fail
    path_failures: HashMap<(FsOp, PathBuf), u32>,
    /// op -> number of upcoming calls that raise a systemic fault
    systemic_faults: HashMap<FsOp, u32>,
}

impl MemoryState {
    fn take_systemic(&mut self, op: FsOp) -> bool {
        take_one(self.systemic_faults.get_mut(&op))
    }

    fn take_path_failure(&mut self, op: FsOp, path: &Path) -> bool {
        take_one(self.path_failures.get_mut(&(op, path.to_path_buf())))
    }

    fn check_injected(&mut self, op: FsOp, path: &Path) -> Result<(), BackendError> {
        if self.take_systemic(op) {
            return Err(BackendError::Systemic(io::Error::other(format!(
                "injected systemic fault during {op:?}"
            ))));
        }
        if self.take_path_failure(op, path) {
            return Err(BackendError::Path(io::Error::other(format!(
                "injected {op:?} failure for {}",
                path.display()
            ))));
        }
        Ok(())
    }
}

fn take_one(counter: Option<&mut u32>) -> bool {
    match counter {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

/// Virtual filesystem kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryFsBackend {
    state: Mutex<MemoryState>,
}

impl MemoryFsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a file
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        self.lock().files.insert(path.into(), data.into());
    }

    /// Remove a file, returning its previous contents
    pub fn remove(&self, path: &Path) -> Option<Bytes> {
        self.lock().files.remove(path)
    }

    /// Current contents of a file
    pub fn contents(&self, path: &Path) -> Option<Bytes> {
        self.lock().files.get(path).cloned()
    }

    /// Number of files stored
    pub fn len(&self) -> usize {
        self.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `count` attempts of `op` on `path` fail with a path error
    pub fn fail_next(&self, op: FsOp, path: impl Into<PathBuf>, count: u32) {
        *self
            .lock()
            .path_failures
            .entry((op, path.into()))
            .or_insert(0) += count;
    }

    /// Make the next `count` calls of `op`, on any path, raise a systemic fault
    pub fn fault_next(&self, op: FsOp, count: u32) {
        *self.lock().systemic_faults.entry(op).or_insert(0) += count;
    }
}

#[async_trait]
impl FsBackend for MemoryFsBackend {
    async fn stat(&self, path: &Path) -> Result<FsMetadata, BackendError> {
        let mut state = self.lock();
        state.check_injected(FsOp::Stat, path)?;
        match state.files.get(path) {
            Some(data) => Ok(FsMetadata::file(data.len() as u64)),
            None => Err(BackendError::Path(io::Error::from(io::ErrorKind::NotFound))),
        }
    }

    async fn read_all(&self, path: &Path) -> Result<Bytes, BackendError> {
        let mut state = self.lock();
        state.check_injected(FsOp::Read, path)?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::Path(io::Error::from(io::ErrorKind::NotFound)))
    }

    async fn write_all(&self, path: &Path, data: Bytes) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.check_injected(FsOp::Write, path)?;
        state.files.insert(path.to_path_buf(), data);
        Ok(())
    }
}
