//! Typed result records emitted by the analysis process.
//!
//! Every object on the results stream is one of these records. The kind of
//! an object is decided by its first field (see [`RecordKind::from_leading_field`]).
//! Field names on the wire are camelCase; timestamps are epoch seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::id::FlushId;

/// Kind of a record on the results stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Bucket,
    Quantiles,
    ModelSnapshot,
    ModelSizeStats,
    ModelDebugOutput,
    CategoryDefinition,
    FlushAcknowledgement,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Bucket,
        RecordKind::Quantiles,
        RecordKind::ModelSnapshot,
        RecordKind::ModelSizeStats,
        RecordKind::ModelDebugOutput,
        RecordKind::CategoryDefinition,
        RecordKind::FlushAcknowledgement,
    ];

    /// Classify an object by the name of its first field.
    pub fn from_leading_field(field: &str) -> Option<RecordKind> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.leading_field() == field)
    }

    /// The field that introduces this record kind on the wire.
    pub fn leading_field(self) -> &'static str {
        match self {
            RecordKind::Bucket => "timestamp",
            RecordKind::Quantiles => "quantileState",
            RecordKind::ModelSnapshot => "snapshotId",
            RecordKind::ModelSizeStats => "modelBytes",
            RecordKind::ModelDebugOutput => "debugFeature",
            RecordKind::CategoryDefinition => "categoryDefinition",
            RecordKind::FlushAcknowledgement => "flush",
        }
    }

    /// All field names a record of this kind may carry.
    pub fn known_fields(self) -> &'static [&'static str] {
        match self {
            RecordKind::Bucket => Bucket::FIELDS,
            RecordKind::Quantiles => Quantiles::FIELDS,
            RecordKind::ModelSnapshot => ModelSnapshot::FIELDS,
            RecordKind::ModelSizeStats => ModelSizeStats::FIELDS,
            RecordKind::ModelDebugOutput => ModelDebugOutput::FIELDS,
            RecordKind::CategoryDefinition => CategoryDefinition::FIELDS,
            RecordKind::FlushAcknowledgement => FlushAcknowledgement::FIELDS,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::Bucket => "bucket",
            RecordKind::Quantiles => "quantiles",
            RecordKind::ModelSnapshot => "model_snapshot",
            RecordKind::ModelSizeStats => "model_size_stats",
            RecordKind::ModelDebugOutput => "model_debug_output",
            RecordKind::CategoryDefinition => "category_definition",
            RecordKind::FlushAcknowledgement => "flush_acknowledgement",
        };
        write!(f, "{}", s)
    }
}

/// A decoded record, owned by the dispatcher for one dispatch step.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Bucket(Bucket),
    Quantiles(Quantiles),
    ModelSnapshot(ModelSnapshot),
    ModelSizeStats(ModelSizeStats),
    ModelDebugOutput(ModelDebugOutput),
    CategoryDefinition(CategoryDefinition),
    Flush(FlushAcknowledgement),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Bucket(_) => RecordKind::Bucket,
            Record::Quantiles(_) => RecordKind::Quantiles,
            Record::ModelSnapshot(_) => RecordKind::ModelSnapshot,
            Record::ModelSizeStats(_) => RecordKind::ModelSizeStats,
            Record::ModelDebugOutput(_) => RecordKind::ModelDebugOutput,
            Record::CategoryDefinition(_) => RecordKind::CategoryDefinition,
            Record::Flush(_) => RecordKind::FlushAcknowledgement,
        }
    }
}

// ---------------------------------------------------------------------------
// Buckets and anomaly records
// ---------------------------------------------------------------------------

/// A time-bucketed aggregate of anomaly results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Normalized score owned by system-change renormalization.
    #[serde(default)]
    pub anomaly_score: f64,
    /// Normalized score owned by unusual-behavior renormalization.
    #[serde(default)]
    pub max_normalized_probability: f64,
    #[serde(default)]
    pub raw_anomaly_score: f64,
    #[serde(default)]
    pub record_count: u64,
    #[serde(default)]
    pub event_count: u64,
    /// Provisional result produced by a flush; superseded later.
    #[serde(default)]
    pub is_interim: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_span: Option<u64>,
    #[serde(default)]
    pub records: Vec<AnomalyRecord>,
}

impl Bucket {
    pub const FIELDS: &'static [&'static str] = &[
        "timestamp",
        "anomalyScore",
        "maxNormalizedProbability",
        "rawAnomalyScore",
        "recordCount",
        "eventCount",
        "isInterim",
        "bucketSpan",
        "records",
    ];

    /// Stable ID: the bucket timestamp in epoch seconds.
    pub fn id(&self) -> String {
        self.timestamp.timestamp().to_string()
    }

    /// Assign stable IDs to contained records (`<bucket id>_<1-based index>`).
    ///
    /// Records that already carry an ID keep it.
    pub fn assign_record_ids(&mut self) {
        let bucket_id = self.id();
        for (idx, record) in self.records.iter_mut().enumerate() {
            if record.id.is_none() {
                record.id = Some(format!("{}_{}", bucket_id, idx + 1));
            }
        }
    }

    /// Score field of this bucket owned by `kind`.
    pub fn score(&self, kind: QuantileKind) -> f64 {
        match kind {
            QuantileKind::SystemChange => self.anomaly_score,
            QuantileKind::UnusualBehavior => self.max_normalized_probability,
        }
    }

    pub fn set_score(&mut self, kind: QuantileKind, score: f64) {
        match kind {
            QuantileKind::SystemChange => self.anomaly_score = score,
            QuantileKind::UnusualBehavior => self.max_normalized_probability = score,
        }
    }
}

/// A single anomalous observation inside a bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub probability: f64,
    #[serde(default)]
    pub anomaly_score: f64,
    #[serde(default)]
    pub normalized_probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_normalized_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_field_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_field_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_field_value: Option<String>,
    /// One value per dimension of the modelled series.
    #[serde(
        default,
        deserialize_with = "scalar_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub typical: Option<Vec<f64>>,
    #[serde(
        default,
        deserialize_with = "scalar_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub actual: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causes: Option<serde_json::Value>,
    #[serde(default)]
    pub is_interim: bool,
}

impl AnomalyRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "probability",
        "anomalyScore",
        "normalizedProbability",
        "initialNormalizedProbability",
        "fieldName",
        "function",
        "byFieldName",
        "byFieldValue",
        "overFieldName",
        "overFieldValue",
        "partitionFieldName",
        "partitionFieldValue",
        "typical",
        "actual",
        "causes",
        "isInterim",
    ];

    /// Score field of this record owned by `kind`.
    pub fn score(&self, kind: QuantileKind) -> f64 {
        match kind {
            QuantileKind::SystemChange => self.anomaly_score,
            QuantileKind::UnusualBehavior => self.normalized_probability,
        }
    }

    pub fn set_score(&mut self, kind: QuantileKind, score: f64) {
        match kind {
            QuantileKind::SystemChange => self.anomaly_score = score,
            QuantileKind::UnusualBehavior => self.normalized_probability = score,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(f64),
    Many(Vec<f64>),
}

/// Accept `[1.5, 2.0]` as written by current analyzers, or a bare `1.5`.
fn scalar_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|values| match values {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    }))
}

// ---------------------------------------------------------------------------
// Quantiles
// ---------------------------------------------------------------------------

/// The two independent kinds of renormalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantileKind {
    #[default]
    SystemChange,
    UnusualBehavior,
}

impl QuantileKind {
    /// Fixed processing order when both kinds are pending.
    pub const ALL: [QuantileKind; 2] = [QuantileKind::SystemChange, QuantileKind::UnusualBehavior];

    pub fn as_str(self) -> &'static str {
        match self {
            QuantileKind::SystemChange => "system-change",
            QuantileKind::UnusualBehavior => "unusual-behavior",
        }
    }
}

impl fmt::Display for QuantileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistical summary used to rescale previously persisted scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantiles {
    /// Opaque state blob understood only by the normalizer.
    #[serde(deserialize_with = "state_text")]
    pub quantile_state: String,
    #[serde(default)]
    pub quantile_kind: QuantileKind,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Quantiles {
    pub const FIELDS: &'static [&'static str] = &["quantileState", "quantileKind", "timestamp"];

    pub fn new(kind: QuantileKind, state: impl Into<String>) -> Self {
        Quantiles {
            quantile_state: state.into(),
            quantile_kind: kind,
            timestamp: None,
        }
    }

    /// Persisted quantiles are keyed by kind; the latest one wins.
    pub fn id(&self) -> &'static str {
        self.quantile_kind.as_str()
    }
}

/// Accept either a string or any JSON value (kept as compact JSON text).
fn state_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Model state records
// ---------------------------------------------------------------------------

/// Reference to a persisted snapshot of the analysis model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
    pub snapshot_id: String,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub restore_priority: i64,
    #[serde(default)]
    pub snapshot_doc_count: u64,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub latest_result_time_stamp: Option<DateTime<Utc>>,
}

impl ModelSnapshot {
    pub const FIELDS: &'static [&'static str] = &[
        "snapshotId",
        "timestamp",
        "description",
        "restorePriority",
        "snapshotDocCount",
        "latestResultTimeStamp",
    ];
}

/// Memory usage report of the analysis model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSizeStats {
    pub model_bytes: u64,
    #[serde(default)]
    pub total_by_field_count: u64,
    #[serde(default)]
    pub total_over_field_count: u64,
    #[serde(default)]
    pub total_partition_field_count: u64,
    #[serde(default)]
    pub bucket_allocation_failures_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_status: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ModelSizeStats {
    pub const FIELDS: &'static [&'static str] = &[
        "modelBytes",
        "totalByFieldCount",
        "totalOverFieldCount",
        "totalPartitionFieldCount",
        "bucketAllocationFailuresCount",
        "memoryStatus",
        "timestamp",
    ];
}

/// Model bounds for one time series at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDebugOutput {
    pub debug_feature: String,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_field_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_field_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_field_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_median: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
}

impl ModelDebugOutput {
    pub const FIELDS: &'static [&'static str] = &[
        "debugFeature",
        "timestamp",
        "partitionFieldName",
        "partitionFieldValue",
        "overFieldName",
        "overFieldValue",
        "byFieldName",
        "byFieldValue",
        "debugLower",
        "debugUpper",
        "debugMedian",
        "actual",
    ];
}

/// A message category discovered by categorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDefinition {
    #[serde(rename = "categoryDefinition")]
    pub category_id: u64,
    #[serde(default)]
    pub terms: String,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub max_matching_length: u64,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl CategoryDefinition {
    pub const FIELDS: &'static [&'static str] = &[
        "categoryDefinition",
        "terms",
        "regex",
        "maxMatchingLength",
        "examples",
    ];
}

/// Marks the point in the stream matching a caller-issued flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushAcknowledgement {
    #[serde(rename = "flush")]
    pub id: FlushId,
}

impl FlushAcknowledgement {
    pub const FIELDS: &'static [&'static str] = &["flush"];
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Alert raised by an observer for a finalized bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub bucket_id: String,
    pub timestamp: DateTime<Utc>,
    pub anomaly_score: f64,
    pub max_normalized_probability: f64,
    pub reason: String,
}

impl Alert {
    pub fn for_bucket(bucket: &Bucket, reason: impl Into<String>) -> Self {
        Alert {
            bucket_id: bucket.id(),
            timestamp: bucket.timestamp,
            anomaly_score: bucket.anomaly_score,
            max_normalized_probability: bucket.max_normalized_probability,
            reason: reason.into(),
        }
    }
}
