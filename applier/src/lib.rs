//! Pure function from `(offset, key, value)` to a [`Store`] mutation. Used identically for
//! catch-up replay of foreign records and for folding in the writer's own just-landed record --
//! the Store is mutated only here, never directly by the writer.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use codec::{decode_record, CodecError, EncodedRecord, Record, RecordKey, RecordValue};
use observability_deps::tracing::warn;
use registry_types::{KeyType, Offset, SequenceMarker};
use store::Store;
use thiserror::Error;

/// Errors raised while folding one record into a [`Store`].
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The record's key or value bytes didn't decode.
    #[error("failed to decode record at offset {offset}: {source}")]
    Decode {
        /// The offset of the record that failed to decode.
        offset: Offset,
        /// The underlying decode error.
        #[source]
        source: CodecError,
    },
}

/// Decodes the record at `offset` and folds it into `store`, then advances the store's loaded
/// offset to `offset`.
pub fn apply(store: &dyn Store, offset: Offset, encoded: &EncodedRecord) -> Result<(), ApplyError> {
    let record = decode_record(encoded).map_err(|source| ApplyError::Decode { offset, source })?;
    apply_decoded(store, offset, &record);
    store.set_loaded_offset(offset);
    Ok(())
}

/// Folds an already-decoded `record`, observed at `offset`, into `store`. Does not advance the
/// store's loaded offset -- callers applying a whole batch typically only want to do that once,
/// after the last record.
pub fn apply_decoded(store: &dyn Store, offset: Offset, record: &Record) {
    match &record.key {
        RecordKey::Schema(key) => {
            let marker = SequenceMarker::new(
                offset,
                key.node.clone(),
                KeyType::Schema,
                Some(key.version),
            );
            match &record.value {
                Some(RecordValue::Schema(value)) => {
                    store.upsert_schema_version(
                        &key.subject,
                        key.version,
                        value.id,
                        value.schema_type,
                        &value.definition,
                        value.deleted,
                        marker,
                    );
                }
                Some(other) => {
                    warn!(?other, "schema_key paired with a non-schema value, ignoring");
                }
                None => store.remove_schema_version(&key.subject, key.version),
            }
        }
        RecordKey::Config(key) => {
            let marker = SequenceMarker::new(offset, key.node.clone(), KeyType::Config, None);
            match &record.value {
                Some(RecordValue::Config(value)) => match &key.subject {
                    Some(subject) => store.set_subject_compatibility(subject, value.compat, marker),
                    None => store.set_global_compatibility(value.compat, marker),
                },
                Some(other) => {
                    warn!(?other, "config_key paired with a non-config value, ignoring");
                }
                None => {
                    if let Some(subject) = &key.subject {
                        store.clear_subject_compatibility(subject);
                    }
                }
            }
        }
        RecordKey::DeleteSubject(key) => {
            let marker = SequenceMarker::new(offset, key.node.clone(), KeyType::DeleteSubject, None);
            match &record.value {
                Some(RecordValue::DeleteSubject(_)) => {
                    store.mark_subject_soft_deleted(&key.subject, marker);
                }
                Some(other) => {
                    warn!(?other, "delete_subject_key paired with an unexpected value, ignoring");
                }
                None => store.remove_subject(&key.subject),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_types::{CompatibilityLevel, NodeId, SchemaId, SchemaType, SubjectName, Version};
    use store::InMemoryStore;

    fn schema_record(version: Version, deleted: bool) -> Record {
        Record {
            key: RecordKey::Schema(codec::SchemaKey {
                seq: version.0 as Offset,
                node: NodeId::new("n1"),
                subject: SubjectName::new("s1"),
                version,
            }),
            value: Some(RecordValue::Schema(codec::SchemaValue {
                subject: SubjectName::new("s1"),
                version,
                schema_type: SchemaType::Avro,
                id: SchemaId(1),
                definition: "{}".to_string(),
                deleted,
            })),
        }
    }

    #[test]
    fn applies_a_schema_registration() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let record = schema_record(Version::FIRST, false);
        apply_decoded(&store, 0, &record);
        store.set_loaded_offset(0);

        let schema = store
            .get_subject_schema(&SubjectName::new("s1"), Version::FIRST, false)
            .unwrap();
        assert_eq!(schema.id, SchemaId(1));
        assert_eq!(store.loaded_offset(), 0);
    }

    #[test]
    fn applies_a_schema_tombstone() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        apply_decoded(&store, 0, &schema_record(Version::FIRST, false));

        let tombstone = Record {
            key: RecordKey::Schema(codec::SchemaKey {
                seq: 1,
                node: NodeId::new("n1"),
                subject: SubjectName::new("s1"),
                version: Version::FIRST,
            }),
            value: None,
        };
        apply_decoded(&store, 1, &tombstone);

        assert!(store
            .get_subject_schema(&SubjectName::new("s1"), Version::FIRST, true)
            .is_err());
    }

    #[test]
    fn applies_global_config() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let record = Record {
            key: RecordKey::Config(codec::ConfigKey {
                seq: 0,
                node: NodeId::new("n1"),
                subject: None,
            }),
            value: Some(RecordValue::Config(codec::ConfigValue {
                compat: CompatibilityLevel::Full,
            })),
        };
        apply_decoded(&store, 0, &record);
        assert_eq!(store.get_compatibility(None), CompatibilityLevel::Full);
    }

    #[test]
    fn applies_subject_soft_delete_and_its_tombstone() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let subject = SubjectName::new("s1");
        apply_decoded(&store, 0, &schema_record(Version::FIRST, false));

        let delete = Record {
            key: RecordKey::DeleteSubject(codec::DeleteSubjectKey {
                seq: 1,
                node: NodeId::new("n1"),
                subject: subject.clone(),
            }),
            value: Some(RecordValue::DeleteSubject(codec::DeleteSubjectValue {
                subject: subject.clone(),
                version: Version::FIRST,
            })),
        };
        apply_decoded(&store, 1, &delete);
        assert!(store.is_subject_deleted(&subject));

        let tombstone = Record {
            key: RecordKey::DeleteSubject(codec::DeleteSubjectKey {
                seq: 2,
                node: NodeId::new("n1"),
                subject: subject.clone(),
            }),
            value: None,
        };
        apply_decoded(&store, 2, &tombstone);
        assert!(store.get_versions(&subject, true).is_err());
    }
}
