//! Filesystem access for the coordinator
//!
//! [`FsBackend`] is the seam between the scheduler and whatever performs the
//! actual I/O. [`LocalFsBackend`] talks to the real filesystem,
//! [`MemoryFsBackend`] keeps files in a map and can inject failures, and
//! [`SlowFsBackend`] wraps either one with delays and call counters.

pub mod backend;
pub mod coordinator;
pub mod local;
pub mod memory;
pub mod path_key;
pub mod slow;

pub use backend::{BackendError, FsBackend, FsEntryType, FsMetadata, FsOp};
pub use coordinator::{
    Closed, IoCoordinator, LoopState, QueueSnapshot, ReadHandle, RequestId, SettledCallback,
    SettledHandle, StatHandle, StatResult, WriteError, WriteHandle,
};
pub use local::LocalFsBackend;
pub use memory::MemoryFsBackend;
pub use path_key::PathKey;
pub use slow::{BackendCall, BackendMetrics, SlowFsBackend, SlowFsConfig};
