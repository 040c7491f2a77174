//! Job and flush identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an analysis job.
///
/// Every job owns an independent pipeline (barrier, queue, worker), so the
/// job ID is attached to all log spans emitted on its behalf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Identifier of a caller-issued flush request.
///
/// The analysis process echoes the ID back in a flush acknowledgement once
/// every result preceding the flush has been written to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlushId(pub String);

impl FlushId {
    pub fn new(id: impl Into<String>) -> Self {
        FlushId(id.into())
    }

    /// Generate a fresh, collision-resistant flush ID.
    ///
    /// Format: `flush-<12 hex chars>`
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        FlushId(format!("flush-{}", &uuid[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlushId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FlushId {
    fn from(s: &str) -> Self {
        FlushId(s.to_string())
    }
}

impl From<String> for FlushId {
    fn from(s: String) -> Self {
        FlushId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_flush_ids_are_unique() {
        let a = FlushId::generate();
        let b = FlushId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("flush-"));
        assert_eq!(a.as_str().len(), "flush-".len() + 12);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = FlushId::from("testing1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"testing1\"");
        let job: JobId = serde_json::from_str("\"farequote\"").unwrap();
        assert_eq!(job.as_str(), "farequote");
        assert_eq!(job.to_string(), "farequote");
    }
}
