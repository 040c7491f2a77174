//! Anomaly results common types, IDs, and errors.
//!
//! This crate provides foundational types shared by the results pipeline:
//! - Typed result records produced by the analysis process
//! - Stable identifiers for jobs, flushes, and persisted results
//! - The unified error type with stable codes

pub mod error;
pub mod id;
pub mod records;

pub use error::{Error, ErrorCategory, Result};
pub use id::{FlushId, JobId};
pub use records::{
    Alert, AnomalyRecord, Bucket, CategoryDefinition, FlushAcknowledgement, ModelDebugOutput,
    ModelSizeStats, ModelSnapshot, QuantileKind, Quantiles, Record, RecordKind,
};
