//! Typed keys and values for the three record kinds written to the internal topic, and their
//! encoding as a self-describing tagged format.
//!
//! `seq` in every key equals the offset at which the writer expects the record to land; it lets
//! replayers detect that a record arrived at an offset different from its expectation, and lets
//! permanent delete locate the records it must tombstone.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use registry_types::{CompatibilityLevel, NodeId, Offset, SchemaId, SchemaType, SubjectName, Version};
use serde::{Deserialize, Serialize};

/// `schema_key{seq, node, subject, version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaKey {
    /// Offset the writer predicted for this record.
    pub seq: Offset,
    /// Writing node.
    pub node: NodeId,
    /// Subject this version belongs to.
    pub subject: SubjectName,
    /// Version number.
    pub version: Version,
}

/// `schema_value{subject, version, type, id, definition, deleted}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaValue {
    /// Subject this version belongs to.
    pub subject: SubjectName,
    /// Version number.
    pub version: Version,
    /// Schema language tag.
    pub schema_type: SchemaType,
    /// Globally unique schema id.
    pub id: SchemaId,
    /// Opaque schema definition payload.
    pub definition: String,
    /// Soft-delete flag.
    pub deleted: bool,
}

/// `config_key{seq, node, subject?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Offset the writer predicted for this record.
    pub seq: Offset,
    /// Writing node.
    pub node: NodeId,
    /// Absent for the global compatibility record.
    pub subject: Option<SubjectName>,
}

/// `config_value{compat}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    /// The compatibility level being set.
    pub compat: CompatibilityLevel,
}

/// `delete_subject_key{seq, node, subject}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSubjectKey {
    /// Offset the writer predicted for this record.
    pub seq: Offset,
    /// Writing node.
    pub node: NodeId,
    /// Subject being (im)permanently deleted.
    pub subject: SubjectName,
}

/// `delete_subject_value{subject, version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSubjectValue {
    /// Subject being soft-deleted.
    pub subject: SubjectName,
    /// Highest version present at the time of the soft delete.
    pub version: Version,
}

/// Union of the three key shapes, tagged so the wire format is self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key_type")]
pub enum RecordKey {
    /// A schema version key.
    Schema(SchemaKey),
    /// A compatibility config key.
    Config(ConfigKey),
    /// A delete-subject key.
    DeleteSubject(DeleteSubjectKey),
}

impl RecordKey {
    /// The offset this key's writer predicted for it.
    pub fn seq(&self) -> Offset {
        match self {
            Self::Schema(k) => k.seq,
            Self::Config(k) => k.seq,
            Self::DeleteSubject(k) => k.seq,
        }
    }

    /// The node that wrote this key.
    pub fn node(&self) -> &NodeId {
        match self {
            Self::Schema(k) => &k.node,
            Self::Config(k) => &k.node,
            Self::DeleteSubject(k) => &k.node,
        }
    }
}

/// Union of the three value shapes, tagged so the wire format is self-describing. A `Record`
/// with no value (see [`Record::value`]) is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "value_type")]
pub enum RecordValue {
    /// A schema version value.
    Schema(SchemaValue),
    /// A compatibility config value.
    Config(ConfigValue),
    /// A delete-subject value.
    DeleteSubject(DeleteSubjectValue),
}

/// One decoded log record: a key plus an optional value. `value: None` is a tombstone, which
/// erases any prior value for the same key (the internal topic is compaction-safe on this
/// basis).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record's key.
    pub key: RecordKey,
    /// The record's value, or `None` for a tombstone.
    pub value: Option<RecordValue>,
}

/// A key/value pair encoded to bytes, ready to hand to the log client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Encoded key bytes.
    pub key: Vec<u8>,
    /// Encoded value bytes, or `None` for a tombstone.
    pub value: Option<Vec<u8>>,
}

/// A sequence of records to be produced atomically as one batch.
pub type RecordBatch = Vec<EncodedRecord>;

/// Errors while serializing or deserializing records. Per the design, these are treated as
/// fatal (programming errors), never retried.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// `serde_json` failed to encode a key or value.
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    /// `serde_json` failed to decode a key or value.
    #[error("failed to decode record: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encodes a single key/value pair, building its wire bytes.
pub fn encode_record(record: &Record) -> Result<EncodedRecord, CodecError> {
    let key = serde_json::to_vec(&record.key).map_err(CodecError::Encode)?;
    let value = record
        .value
        .as_ref()
        .map(serde_json::to_vec)
        .transpose()
        .map_err(CodecError::Encode)?;
    Ok(EncodedRecord { key, value })
}

/// Builds a record batch from a sequence of typed records, in order. The resulting batch is
/// produced as a unit; the log assigns each record a contiguous offset.
pub fn build_batch(records: &[Record]) -> Result<RecordBatch, CodecError> {
    records.iter().map(encode_record).collect()
}

/// Decodes a key/value pair read back from the log.
pub fn decode_record(encoded: &EncodedRecord) -> Result<Record, CodecError> {
    let key: RecordKey = serde_json::from_slice(&encoded.key).map_err(CodecError::Decode)?;
    let value = encoded
        .value
        .as_deref()
        .map(serde_json::from_slice)
        .transpose()
        .map_err(CodecError::Decode)?;
    Ok(Record { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema_record(seq: Offset, deleted: bool) -> Record {
        Record {
            key: RecordKey::Schema(SchemaKey {
                seq,
                node: NodeId::new("node-a"),
                subject: SubjectName::new("s1"),
                version: Version(1),
            }),
            value: Some(RecordValue::Schema(SchemaValue {
                subject: SubjectName::new("s1"),
                version: Version(1),
                schema_type: SchemaType::Avro,
                id: SchemaId(1),
                definition: "{\"type\":\"string\"}".to_string(),
                deleted,
            })),
        }
    }

    #[test]
    fn round_trips_schema_record() {
        test_helpers::maybe_start_logging();
        let record = sample_schema_record(0, false);
        let encoded = encode_record(&record).unwrap();
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn round_trips_tombstone() {
        test_helpers::maybe_start_logging();
        let mut record = sample_schema_record(3, false);
        record.value = None;
        let encoded = encode_record(&record).unwrap();
        assert!(encoded.value.is_none());
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn round_trips_config_record() {
        test_helpers::maybe_start_logging();
        let record = Record {
            key: RecordKey::Config(ConfigKey {
                seq: 5,
                node: NodeId::new("node-a"),
                subject: None,
            }),
            value: Some(RecordValue::Config(ConfigValue {
                compat: CompatibilityLevel::Full,
            })),
        };
        let encoded = encode_record(&record).unwrap();
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn build_batch_preserves_order() {
        test_helpers::maybe_start_logging();
        let records = vec![sample_schema_record(0, false), sample_schema_record(1, true)];
        let batch = build_batch(&records).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(decode_record(&batch[1]).unwrap(), records[1]);
    }
}
