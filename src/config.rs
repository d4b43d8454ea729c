//! Coordinator configuration

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for an [`IoCoordinator`](crate::services::fs::IoCoordinator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoordinatorConfig {
    /// Delay before a pass aborted by a systemic backend fault is retried
    #[serde(default = "default_fault_backoff_ms")]
    pub fault_backoff_ms: u64,

    /// Pacing of deferred read retries
    #[serde(default)]
    pub read_retry: ReadRetryConfig,

    /// Base directory for relative paths (process working directory if unset)
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

/// Delay schedule for re-attempting failed reads
///
/// Round `n` (1-based) of consecutive deferred retries waits
/// `initial_delay_ms * multiplier^(n-1)`, capped at `max_delay_ms`. The
/// round counter resets once no read is deferred. There is no attempt cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReadRetryConfig {
    #[serde(default = "default_read_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_read_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_read_multiplier")]
    pub multiplier: u32,
}

fn default_fault_backoff_ms() -> u64 {
    100
}

fn default_read_initial_delay_ms() -> u64 {
    10
}

fn default_read_max_delay_ms() -> u64 {
    1000
}

fn default_read_multiplier() -> u32 {
    2
}

impl Default for ReadRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_read_initial_delay_ms(),
            max_delay_ms: default_read_max_delay_ms(),
            multiplier: default_read_multiplier(),
        }
    }
}

impl ReadRetryConfig {
    /// Retry deferred reads on the very next pass
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay before the given retry round
    pub fn delay_for_round(&self, round: u32) -> Duration {
        let exponent = round.saturating_sub(1);
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        let millis = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fault_backoff_ms: default_fault_backoff_ms(),
            read_retry: ReadRetryConfig::default(),
            base_dir: None,
        }
    }
}

impl CoordinatorConfig {
    /// No delays anywhere
    pub fn immediate() -> Self {
        Self {
            fault_backoff_ms: 0,
            read_retry: ReadRetryConfig::immediate(),
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_fault_backoff(mut self, backoff: Duration) -> Self {
        self.fault_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_read_retry(mut self, read_retry: ReadRetryConfig) -> Self {
        self.read_retry = read_retry;
        self
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    /// Parse a configuration from JSON text and validate it
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json_str(&contents)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_retry.multiplier == 0 {
            return Err(ConfigError::ValidationError(
                "read_retry.multiplier must be at least 1".to_string(),
            ));
        }

        if self.read_retry.max_delay_ms < self.read_retry.initial_delay_ms {
            return Err(ConfigError::ValidationError(
                "read_retry.max_delay_ms must be >= read_retry.initial_delay_ms".to_string(),
            ));
        }

        if let Some(base_dir) = &self.base_dir {
            if !base_dir.is_absolute() {
                return Err(ConfigError::ValidationError(format!(
                    "base_dir must be absolute, got {}",
                    base_dir.display()
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(msg) => write!(f, "IO error: {msg}"),
            ConfigError::ParseError(msg) => write!(f, "Parse error: {msg}"),
            ConfigError::SerializeError(msg) => write!(f, "Serialize error: {msg}"),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
