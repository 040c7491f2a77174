//! Log levels, pipeline stages and standard event names.

use serde::{Deserialize, Serialize};

/// Log levels as they appear in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of a job's results pipeline, attached to spans as `stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading and dispatching the results stream.
    Ingest,
    /// Rescoring persisted results on the background worker.
    Renormalize,
    /// Draining and stopping the pipeline.
    Shutdown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Ingest => "ingest",
            Stage::Renormalize => "renormalize",
            Stage::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names, used as tracing targets.
pub mod event_names {
    // Stream lifecycle
    pub const STREAM_STARTED: &str = "stream.started";
    pub const STREAM_FINISHED: &str = "stream.finished";
    pub const STREAM_UNTERMINATED: &str = "stream.unterminated";
    pub const STREAM_FAILED: &str = "stream.failed";

    // Decoding and dispatch
    pub const DECODE_UNKNOWN_FIELD: &str = "decode.unknown_field";
    pub const RECORD_DISPATCHED: &str = "record.dispatched";
    pub const SEGMENT_STARTED: &str = "segment.started";
    pub const FLUSH_ACKNOWLEDGED: &str = "flush.acknowledged";
    pub const ALERT_FIRED: &str = "alert.fired";
    pub const STORE_FAILED: &str = "store.failed";

    // Renormalization
    pub const RENORM_SUBMITTED: &str = "renorm.submitted";
    pub const RENORM_REJECTED: &str = "renorm.rejected";
    pub const RENORM_SUPERSEDED: &str = "renorm.superseded";
    pub const RENORM_PASS_FINISHED: &str = "renorm.pass_finished";
    pub const RENORM_PASS_FAILED: &str = "renorm.pass_failed";
    pub const RENORM_WORKER_STOPPED: &str = "renorm.worker_stopped";

    // Job lifecycle
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_FINISHED: &str = "job.finished";
}
