//! Typed decoding of top-level result objects.

use ar_common::{
    AnomalyRecord, Bucket, CategoryDefinition, Error, FlushAcknowledgement, ModelDebugOutput,
    ModelSizeStats, ModelSnapshot, Quantiles, Record, RecordKind, Result,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::logging::event_names;

/// Decode one top-level object into a record.
///
/// The first field decides the kind. Unknown fields inside a known record
/// are logged and skipped. An object without fields has no kind and is
/// rejected like an unknown one.
pub fn decode_record(object: Map<String, Value>) -> Result<Record> {
    let first = object.keys().next().map(String::as_str).unwrap_or_default();
    let kind = RecordKind::from_leading_field(first).ok_or_else(|| Error::UnknownRecord {
        field: first.to_string(),
    })?;

    warn_unknown_fields(kind, kind.known_fields(), &object);

    let record = match kind {
        RecordKind::Bucket => {
            if let Some(Value::Array(records)) = object.get("records") {
                for record in records {
                    if let Value::Object(fields) = record {
                        warn_unknown_fields(kind, AnomalyRecord::FIELDS, fields);
                    }
                }
            }
            let mut bucket: Bucket = from_object(kind, object)?;
            bucket.assign_record_ids();
            Record::Bucket(bucket)
        }
        RecordKind::Quantiles => Record::Quantiles(from_object::<Quantiles>(kind, object)?),
        RecordKind::ModelSnapshot => {
            Record::ModelSnapshot(from_object::<ModelSnapshot>(kind, object)?)
        }
        RecordKind::ModelSizeStats => {
            Record::ModelSizeStats(from_object::<ModelSizeStats>(kind, object)?)
        }
        RecordKind::ModelDebugOutput => {
            Record::ModelDebugOutput(from_object::<ModelDebugOutput>(kind, object)?)
        }
        RecordKind::CategoryDefinition => {
            Record::CategoryDefinition(from_object::<CategoryDefinition>(kind, object)?)
        }
        RecordKind::FlushAcknowledgement => {
            Record::Flush(from_object::<FlushAcknowledgement>(kind, object)?)
        }
    };
    Ok(record)
}

fn warn_unknown_fields(kind: RecordKind, known: &[&str], object: &Map<String, Value>) {
    for field in object.keys() {
        if !known.contains(&field.as_str()) {
            warn!(
                target: event_names::DECODE_UNKNOWN_FIELD,
                record = %kind,
                field = %field,
                "skipping unknown field"
            );
        }
    }
}

fn from_object<T: DeserializeOwned>(kind: RecordKind, object: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(object)).map_err(|e| Error::Decode {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture_jsonl;
    use ar_common::QuantileKind;

    fn object(json: &str) -> Map<String, Value> {
        match serde_json::from_str(json).unwrap() {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn decode(json: &str) -> Result<Record> {
        decode_record(object(json))
    }

    #[test]
    fn test_classifies_by_first_field() {
        let cases = [
            (r#"{"timestamp":1359450000}"#, RecordKind::Bucket),
            (r#"{"quantileState":"s1","quantileKind":"unusual-behavior"}"#, RecordKind::Quantiles),
            (r#"{"snapshotId":"123","restorePriority":3}"#, RecordKind::ModelSnapshot),
            (r#"{"modelBytes":300}"#, RecordKind::ModelSizeStats),
            (r#"{"debugFeature":"mean"}"#, RecordKind::ModelDebugOutput),
            (r#"{"categoryDefinition":18}"#, RecordKind::CategoryDefinition),
            (r#"{"flush":"testing1"}"#, RecordKind::FlushAcknowledgement),
        ];
        for (json, kind) in cases {
            let record = decode(json).unwrap();
            assert_eq!(record.kind(), kind, "{json}");
        }
    }

    #[test]
    fn test_later_fields_do_not_change_the_kind() {
        // "timestamp" is also a Quantiles field; the first field wins
        let record = decode(r#"{"quantileState":"s","timestamp":1359450000}"#).unwrap();
        match record {
            Record::Quantiles(q) => {
                assert_eq!(q.quantile_kind, QuantileKind::SystemChange);
                assert_eq!(q.timestamp.unwrap().timestamp(), 1359450000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_leading_field_is_fatal() {
        let err = decode(r#"{"unknown":18}"#).unwrap_err();
        assert!(matches!(err, Error::UnknownRecord { ref field } if field == "unknown"));
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn test_unknown_inner_field_is_skipped_with_warning() {
        let lines = capture_jsonl(|| {
            let record = decode(
                r#"{"timestamp":1359450000,"anomalyScore":99.0,"madeUp":true,
                    "records":[{"probability":0.01,"mystery":1}]}"#,
            )
            .unwrap();
            let Record::Bucket(bucket) = record else {
                panic!("expected bucket");
            };
            assert_eq!(bucket.anomaly_score, 99.0);
            assert_eq!(bucket.records.len(), 1);
            assert_eq!(bucket.records[0].id.as_deref(), Some("1359450000_1"));
        });

        let warned: Vec<&str> = lines
            .iter()
            .filter(|l| l["event"] == event_names::DECODE_UNKNOWN_FIELD)
            .filter_map(|l| l["fields"]["field"].as_str())
            .collect();
        assert_eq!(warned, vec!["madeUp", "mystery"]);
    }

    #[test]
    fn test_wrong_type_for_known_field_is_fatal() {
        let err = decode(r#"{"timestamp":1,"anomalyScore":"high"}"#).unwrap_err();
        assert!(matches!(err, Error::Decode { ref kind, .. } if kind == "bucket"));
    }

    #[test]
    fn test_empty_object_is_fatal() {
        let err = decode("{}").unwrap_err();
        assert!(matches!(err, Error::UnknownRecord { ref field } if field.is_empty()));
        assert!(err.is_fatal_to_stream());
    }

    #[test]
    fn test_array_valued_record_fields_decode() {
        let record = decode(
            r#"{"timestamp":1379590200,"records":[{"probability":1.38951e-08,
                "fieldName":"sum_cs_bytes_","function":"max",
                "causes":[{"probability":1.38951e-08,"typical":[101534],"actual":[9.19027e+07]}],
                "typical":[101534],"actual":[9.19027e+07]}],"anomalyScore":44.7324}"#,
        )
        .unwrap();
        let Record::Bucket(bucket) = record else {
            panic!("expected bucket");
        };
        assert_eq!(bucket.records[0].typical, Some(vec![101534.0]));
        assert_eq!(bucket.records[0].actual, Some(vec![9.19027e7]));
        assert!(bucket.records[0].causes.is_some());
    }
}
