//! Pipeline tuning knobs.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::validate::ConfigError;

/// Default bound of the renormalization queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
/// Default cap on buckets read back per renormalization pass.
pub const DEFAULT_MAX_BUCKETS: usize = 10_000;
/// Default page size for bucket reads.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Default materiality threshold, in normalized score points.
pub const DEFAULT_MATERIALITY_THRESHOLD: f64 = 1.0;
/// Default time allowed for the renormalization worker to drain on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Configuration for one results pipeline.
///
/// Every field is optional in the file; missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum number of pending renormalization requests.
    pub queue_capacity: usize,

    /// Maximum number of buckets rescored in a single pass.
    pub max_buckets: usize,

    /// Number of buckets read from the store per page.
    pub page_size: usize,

    /// Minimum score change that is written back.
    pub materiality_threshold: f64,

    /// How long shutdown waits for the worker, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_buckets: DEFAULT_MAX_BUCKETS,
            page_size: DEFAULT_PAGE_SIZE,
            materiality_threshold: DEFAULT_MATERIALITY_THRESHOLD,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Parse)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// JSON Schema describing the configuration file.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(PipelineConfig);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}
