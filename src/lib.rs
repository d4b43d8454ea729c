// Coalescing I/O coordinator - queues, deduplicates and drains filesystem requests

pub mod config;
pub mod services;

pub use config::{ConfigError, CoordinatorConfig, ReadRetryConfig};
pub use services::fs::{
    BackendError, Closed, FsBackend, FsMetadata, IoCoordinator, StatResult, WriteError,
};
