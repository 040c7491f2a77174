//! Anomaly results pipeline configuration.
//!
//! This crate provides:
//! - The typed [`PipelineConfig`] with built-in defaults
//! - Config resolution (explicit path → env → XDG → defaults)
//! - Semantic validation

pub mod pipeline;
pub mod resolve;
pub mod validate;

use std::path::{Path, PathBuf};

pub use pipeline::PipelineConfig;
pub use resolve::{resolve_pipeline_path, ConfigSource};
pub use validate::{validate_pipeline, ConfigError};

/// A validated configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PipelineConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Resolve, read and validate the pipeline configuration.
///
/// When no file is found anywhere in the resolution chain the built-in
/// defaults are returned.
pub fn load_pipeline_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let (path, source) = resolve_pipeline_path(explicit);
    let config = match &path {
        Some(p) => PipelineConfig::from_file(p)?,
        None => PipelineConfig::default(),
    };
    validate_pipeline(&config)?;
    Ok(LoadedConfig {
        config,
        path,
        source,
    })
}
