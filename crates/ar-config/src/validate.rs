//! Configuration errors and semantic validation.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineConfig;

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ConfigError::Io { .. } => 41,
            ConfigError::Parse(_) => 42,
            ConfigError::InvalidValue { .. } => 43,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for ar_common::Error {
    fn from(err: ConfigError) -> Self {
        ar_common::Error::Config(err.to_string())
    }
}

/// Validate a pipeline configuration semantically.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.queue_capacity == 0 {
        return Err(ConfigError::invalid("queue_capacity", "Must be at least 1"));
    }
    if config.page_size == 0 {
        return Err(ConfigError::invalid("page_size", "Must be at least 1"));
    }
    if config.max_buckets < config.page_size {
        return Err(ConfigError::invalid(
            "max_buckets",
            format!(
                "Must be >= page_size ({}), got {}",
                config.page_size, config.max_buckets
            ),
        ));
    }
    if !config.materiality_threshold.is_finite() || config.materiality_threshold < 0.0 {
        return Err(ConfigError::invalid(
            "materiality_threshold",
            format!(
                "Must be finite and >= 0, got {}",
                config.materiality_threshold
            ),
        ));
    }
    if config.shutdown_timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "shutdown_timeout_ms",
            "Must be positive",
        ));
    }
    Ok(())
}
