use crate::core::errors::{Result, WorkshareError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers spawned by `spawn_default` (0 = available parallelism)
    pub workers: usize,
    /// Threads are named `{prefix}-{worker_id}`
    pub thread_name_prefix: String,
    /// Stack size for worker threads (None = platform default)
    pub stack_size: Option<usize>,
    /// Log every failed worker at `warn` when it is joined
    pub log_failures: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name_prefix: "workshare".to_string(),
            stack_size: None,
            log_failures: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(WorkshareError::configuration_field(
                "thread_name_prefix cannot be empty",
                "thread_name_prefix",
            ));
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(WorkshareError::configuration_field(
                "thread_name_prefix cannot contain NUL bytes",
                "thread_name_prefix",
            ));
        }
        if let Some(size) = self.stack_size {
            if size < 16 * 1024 {
                return Err(WorkshareError::configuration_field(
                    "stack_size must be at least 16 KiB",
                    "stack_size",
                ));
            }
        }
        Ok(())
    }

    /// Resolve the worker count, falling back to the machine's parallelism
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Small fixed pool for tests
    pub fn conservative() -> Self {
        Self {
            workers: 2,
            thread_name_prefix: "workshare-test".to_string(),
            stack_size: Some(256 * 1024),
            log_failures: false,
        }
    }

    /// Oversubscribe the machine, for I/O heavy task bodies
    pub fn aggressive() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers: cores * 4,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Bounds of a work sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub start: i64,
    pub stop: i64,
    #[serde(default = "default_step")]
    pub step: i64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_step() -> i64 {
    1
}

fn default_chunk_size() -> usize {
    1
}

impl SequenceConfig {
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        Self {
            start,
            stop,
            step,
            chunk_size: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(WorkshareError::configuration_field(
                "step must not be zero",
                "step",
            ));
        }
        if self.chunk_size == 0 {
            return Err(WorkshareError::configuration_field(
                "chunk_size must be greater than 0",
                "chunk_size",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file layout
///
/// ```yaml
/// pool:
///   workers: 4
///   thread_name_prefix: primes
/// sequence:
///   start: 1
///   stop: 1000
///   chunk_size: 50
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkshareConfig {
    pub pool: PoolConfig,
    pub sequence: Option<SequenceConfig>,
}

impl WorkshareConfig {
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if let Some(sequence) = &self.sequence {
            sequence.validate()?;
        }
        Ok(())
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; `.json` is parsed as JSON, anything else as YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkshareError::io(format!("read {}", path.display()), e))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        debug!("Loading configuration from {}", path.display());
        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };
        info!(
            workers = config.pool.effective_workers(),
            "Configuration loaded from {}",
            path.display()
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pool_config_validation() {
        let mut config = PoolConfig::default();
        assert!(config.validate().is_ok());

        config.thread_name_prefix = "   ".to_string();
        assert!(config.validate().is_err());

        let config = PoolConfig {
            stack_size: Some(1024),
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_workers() {
        assert_eq!(PoolConfig::default().with_workers(3).effective_workers(), 3);
        assert!(PoolConfig::default().effective_workers() >= 1);
    }

    #[test]
    fn test_sequence_config_validation() {
        assert!(SequenceConfig::new(0, 10, 1).validate().is_ok());
        assert!(SequenceConfig::new(0, 10, 0).validate().is_err());

        let mut config = SequenceConfig::new(0, 10, 2);
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_loading() {
        let yaml = r#"
pool:
  workers: 4
  thread_name_prefix: primes
sequence:
  start: 1
  stop: 100
  chunk_size: 10
"#;
        let config = WorkshareConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.pool.workers, 4);
        assert_eq!(config.pool.thread_name_prefix, "primes");
        assert!(config.pool.log_failures);
        assert_eq!(
            config.sequence,
            Some(SequenceConfig {
                start: 1,
                stop: 100,
                step: 1,
                chunk_size: 10,
            })
        );
    }

    #[test]
    fn test_json_loading_rejects_zero_step() {
        let json = r#"{"sequence": {"start": 0, "stop": 5, "step": 0}}"#;
        let err = WorkshareConfig::from_json_str(json).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_malformed_yaml_is_serialization_error() {
        let err = WorkshareConfig::from_yaml_str("pool: [not, a, map]").unwrap_err();
        assert_eq!(err.category(), "serialization");
    }
}
