//! Slow filesystem backend for testing
//!
//! This module provides a decorator/wrapper around any FsBackend that adds
//! configurable delays to simulate slow I/O operations, and records every
//! call it forwards. The coordinator tests use the call log to check the
//! order in which a drain pass hits the backend.

use super::backend::{BackendError, FsBackend, FsMetadata, FsOp};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for slow filesystem simulation
#[derive(Debug, Clone)]
pub struct SlowFsConfig {
    /// Delay for stat operations
    pub stat_delay: Duration,
    /// Delay for read operations
    pub read_delay: Duration,
    /// Delay for write operations
    pub write_delay: Duration,
}

impl SlowFsConfig {
    /// Create a config with uniform delay for all operations
    pub fn uniform(delay: Duration) -> Self {
        Self {
            stat_delay: delay,
            read_delay: delay,
            write_delay: delay,
        }
    }

    /// Create a config with no delays (useful as a baseline)
    pub fn none() -> Self {
        Self::uniform(Duration::ZERO)
    }

    /// Create a config simulating a slow network filesystem
    pub fn slow_network() -> Self {
        Self {
            stat_delay: Duration::from_millis(50),
            read_delay: Duration::from_millis(300),
            write_delay: Duration::from_millis(500),
        }
    }

    /// Create a config simulating a very slow disk
    pub fn slow_disk() -> Self {
        Self {
            stat_delay: Duration::from_millis(20),
            read_delay: Duration::from_millis(100),
            write_delay: Duration::from_millis(200),
        }
    }
}

impl Default for SlowFsConfig {
    fn default() -> Self {
        Self::none()
    }
}

/// A single forwarded call, in the order it reached the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub op: FsOp,
    pub path: PathBuf,
    /// When the call arrived, on Tokio's clock (follows paused test time)
    pub at: Instant,
}

/// Metrics tracking for filesystem operations
#[derive(Debug, Clone, Default)]
pub struct BackendMetrics {
    /// Number of stat calls
    pub stat_calls: usize,
    /// Number of read calls
    pub read_calls: usize,
    /// Number of write calls
    pub write_calls: usize,
    /// Total time spent in artificial delays
    pub total_delay_time: Duration,
    /// Every call in arrival order
    pub calls: Vec<BackendCall>,
}

impl BackendMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all metrics to zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Get total number of filesystem calls
    pub fn total_calls(&self) -> usize {
        self.stat_calls + self.read_calls + self.write_calls
    }

    /// Number of calls of `op` against `path`
    pub fn calls_for(&self, op: FsOp, path: &Path) -> usize {
        self.calls
            .iter()
            .filter(|call| call.op == op && call.path == path)
            .count()
    }

    /// Arrival times of calls of `op` against `path`
    pub fn call_times(&self, op: FsOp, path: &Path) -> Vec<Instant> {
        self.calls
            .iter()
            .filter(|call| call.op == op && call.path == path)
            .map(|call| call.at)
            .collect()
    }

    /// Operation kinds in call order
    pub fn ops(&self) -> Vec<FsOp> {
        self.calls.iter().map(|call| call.op).collect()
    }
}

/// Slow filesystem backend wrapper for testing
///
/// Wraps any FsBackend implementation and adds configurable delays to each
/// operation. Also tracks metrics about operation counts and timing.
pub struct SlowFsBackend {
    /// The underlying real backend
    inner: Arc<dyn FsBackend>,
    /// Configuration for delays
    config: SlowFsConfig,
    /// Metrics tracking
    metrics: Arc<Mutex<BackendMetrics>>,
}

impl SlowFsBackend {
    /// Create a new slow filesystem backend
    pub fn new(inner: Arc<dyn FsBackend>, config: SlowFsConfig) -> Self {
        Self {
            inner,
            config,
            metrics: Arc::new(Mutex::new(BackendMetrics::new())),
        }
    }

    /// Create with uniform delay for all operations
    pub fn with_uniform_delay(inner: Arc<dyn FsBackend>, delay: Duration) -> Self {
        Self::new(inner, SlowFsConfig::uniform(delay))
    }

    /// Get a snapshot of current metrics
    pub async fn metrics(&self) -> BackendMetrics {
        self.metrics.lock().await.clone()
    }

    /// Reset metrics to zero
    pub async fn reset_metrics(&self) {
        self.metrics.lock().await.reset();
    }

    /// Get a clone of the metrics Arc for sharing
    pub fn metrics_arc(&self) -> Arc<Mutex<BackendMetrics>> {
        Arc::clone(&self.metrics)
    }

    /// Count the call, then add the configured delay
    async fn record(&self, op: FsOp, path: &Path, delay: Duration) {
        {
            let mut metrics = self.metrics.lock().await;
            match op {
                FsOp::Stat => metrics.stat_calls += 1,
                FsOp::Read => metrics.read_calls += 1,
                FsOp::Write => metrics.write_calls += 1,
            }
            metrics.calls.push(BackendCall {
                op,
                path: path.to_path_buf(),
                at: Instant::now(),
            });
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
            self.metrics.lock().await.total_delay_time += delay;
        }
    }
}

#[async_trait]
impl FsBackend for SlowFsBackend {
    async fn stat(&self, path: &Path) -> Result<FsMetadata, BackendError> {
        self.record(FsOp::Stat, path, self.config.stat_delay).await;
        self.inner.stat(path).await
    }

    async fn read_all(&self, path: &Path) -> Result<Bytes, BackendError> {
        self.record(FsOp::Read, path, self.config.read_delay).await;
        self.inner.read_all(path).await
    }

    async fn write_all(&self, path: &Path, data: Bytes) -> Result<(), BackendError> {
        self.record(FsOp::Write, path, self.config.write_delay).await;
        self.inner.write_all(path, data).await
    }
}
