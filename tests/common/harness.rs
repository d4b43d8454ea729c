// Coordinator test harness

use fresh_io::config::CoordinatorConfig;
use fresh_io::services::fs::{
    BackendMetrics, IoCoordinator, MemoryFsBackend, SlowFsBackend, SlowFsConfig,
};
use std::sync::Arc;

/// A coordinator over an in-memory filesystem, with every backend call
/// recorded by a `SlowFsBackend` in between
pub struct TestIo {
    pub memory: Arc<MemoryFsBackend>,
    pub slow: Arc<SlowFsBackend>,
    pub io: IoCoordinator,
}

impl TestIo {
    /// No delays in the backend or the coordinator
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::immediate())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self::with_delays(config, SlowFsConfig::none())
    }

    pub fn with_delays(config: CoordinatorConfig, delays: SlowFsConfig) -> Self {
        super::tracing::init_tracing_from_env();

        let memory = Arc::new(MemoryFsBackend::new());
        let slow = Arc::new(SlowFsBackend::new(memory.clone(), delays));
        let io = IoCoordinator::new(slow.clone(), config);
        Self { memory, slow, io }
    }

    pub async fn metrics(&self) -> BackendMetrics {
        self.slow.metrics().await
    }

    /// Yield to the drain loop until `done` holds or the attempts run out
    pub async fn run_until<F>(&self, mut done: F) -> bool
    where
        F: FnMut(&IoCoordinator) -> bool,
    {
        for _ in 0..1000 {
            if done(&self.io) {
                return true;
            }
            tokio::task::yield_now().await;
        }
        done(&self.io)
    }

    /// Yield until the backend has seen `count` calls in total
    pub async fn run_until_calls(&self, count: usize) -> bool {
        for _ in 0..1000 {
            if self.metrics().await.total_calls() >= count {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }
}
