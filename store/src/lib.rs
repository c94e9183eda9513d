//! The in-memory projection of the internal topic: the Store holds exactly the state an Applier
//! derives by folding every record ever produced, keyed by subject. It is mutated only through
//! the handful of upsert/record methods the Applier calls, either during catch-up replay or right
//! after a locally-produced write lands at its predicted offset; every other method is a pure
//! read.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use observability_deps::tracing::debug;
use parking_lot::RwLock;
use registry_types::{
    CompatibilityLevel, KeyType, NodeId, Offset, SchemaId, SchemaType, SequenceMarker,
    SubjectName, Version,
};
use thiserror::Error;

/// Errors a [`Store`] implementation can raise.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The subject, or the specific version of it, is unknown (or soft-deleted and the caller
    /// did not ask to see deleted entries).
    #[error("subject {subject} not found")]
    NotFound {
        /// The subject that was looked up.
        subject: SubjectName,
    },

    /// A new version would violate the compatibility level currently in effect for the subject.
    #[error("new version of {subject} violates {level:?} compatibility")]
    CompatibilityViolation {
        /// The subject a new version was being registered against.
        subject: SubjectName,
        /// The compatibility level that rejected it.
        level: CompatibilityLevel,
    },
}

/// Result of [`Store::project_ids`]: the id/version a registration would use, and whether a new
/// record actually needs to be written for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Projection {
    /// The schema id this definition resolves to, new or reused.
    pub id: SchemaId,
    /// The version this registration would occupy (or already occupies).
    pub version: Version,
    /// `false` if this exact definition is already an active version of the subject, in which
    /// case no write is needed and `id`/`version` describe the existing record.
    pub inserted: bool,
}

/// A single version's schema content, as returned by [`Store::get_subject_schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRecord {
    /// The schema id.
    pub id: SchemaId,
    /// The schema type tag.
    pub schema_type: SchemaType,
    /// The opaque schema definition.
    pub definition: String,
    /// Whether this specific version is soft-deleted.
    pub deleted: bool,
}

/// Plugs schema-compatibility checking into [`Store::project_ids`]. This repo ships only the
/// permissive [`AlwaysCompatible`] implementation; a real Avro/Protobuf/JSON checker would
/// implement this trait and be wired in at `InMemoryStore` construction time, without the writer
/// needing to change at all.
pub trait CompatibilityChecker: Debug + Send + Sync + 'static {
    /// Returns `true` if `candidate` may be added as a new version alongside `existing`, under
    /// `level`.
    fn is_compatible(
        &self,
        level: CompatibilityLevel,
        existing: &[SchemaRecord],
        candidate: &str,
    ) -> bool;
}

/// A [`CompatibilityChecker`] that accepts everything. The default for [`InMemoryStore`] until a
/// real schema-aware checker is plugged in.
#[derive(Debug, Copy, Clone, Default)]
pub struct AlwaysCompatible;

impl CompatibilityChecker for AlwaysCompatible {
    fn is_compatible(
        &self,
        _level: CompatibilityLevel,
        _existing: &[SchemaRecord],
        _candidate: &str,
    ) -> bool {
        true
    }
}

/// The read/write surface the Applier and the sequenced writer share against the internal
/// topic's projected state. Every method takes `&self`: implementations use interior mutability
/// so a single shard's store can be read concurrently with the Applier catching it up.
pub trait Store: Debug + Send + Sync + 'static {
    /// Previews the id/version a registration of `(definition, schema_type)` under `subject`
    /// would receive, without mutating any state. Fails with
    /// [`StoreError::CompatibilityViolation`] if a stricter-than-`NONE` compatibility level
    /// currently in effect for the subject rejects `definition`.
    fn project_ids(
        &self,
        subject: &SubjectName,
        definition: &str,
        schema_type: SchemaType,
    ) -> Result<Projection, StoreError>;

    /// Returns the schema content at `subject`/`version`. Fails [`StoreError::NotFound`] if the
    /// subject or version is unknown, or if either is soft-deleted and `include_deleted` is
    /// `false`.
    fn get_subject_schema(
        &self,
        subject: &SubjectName,
        version: Version,
        include_deleted: bool,
    ) -> Result<SchemaRecord, StoreError>;

    /// Returns every version number registered under `subject`, in ascending order. Fails
    /// [`StoreError::NotFound`] if the subject is unknown, or wholly soft-deleted and
    /// `include_deleted` is `false`.
    fn get_versions(
        &self,
        subject: &SubjectName,
        include_deleted: bool,
    ) -> Result<Vec<Version>, StoreError>;

    /// Whether `subject` as a whole has been soft-deleted via `delete_subject_impermanent`.
    /// Returns `false` for an unknown subject.
    fn is_subject_deleted(&self, subject: &SubjectName) -> bool;

    /// The effective compatibility level. With `subject` given, returns its per-subject override
    /// if one has ever been written, falling back to the global level; with `subject` `None`,
    /// always returns the global level regardless of any per-subject overrides. Defaults to
    /// [`CompatibilityLevel::default`] if nothing relevant has ever been written.
    fn get_compatibility(&self, subject: Option<&SubjectName>) -> CompatibilityLevel;

    /// The compatibility level explicitly written at exactly this scope, or `None` if nothing
    /// has ever been written there. Unlike [`Store::get_compatibility`], this does not fall back
    /// to the global level or to [`CompatibilityLevel::default`]; it exists so `write_config`'s
    /// no-op check compares against what was actually persisted, not the resolved default (a
    /// registry whose global compatibility was never written still produces a record the first
    /// time a caller asks for the de-facto default, since doing so changes the Store from "no
    /// config record" to "a config record exists").
    fn get_raw_compatibility(&self, subject: Option<&SubjectName>) -> Option<CompatibilityLevel>;

    /// Every sequence marker ever recorded against `subject`: every version's `schema_key`, its
    /// `config_key` (if a per-subject override was ever written), and its `delete_subject_key`
    /// (if one was ever written). Used by a whole-subject permanent delete to tombstone every
    /// physical record. Fails [`StoreError::NotFound`] if the subject is unknown.
    fn get_subject_written_at(&self, subject: &SubjectName) -> Result<Vec<SequenceMarker>, StoreError>;

    /// Every sequence marker ever recorded for `subject`/`version`'s `schema_key`. Used by a
    /// single-version permanent delete. Fails [`StoreError::NotFound`] if the subject or version
    /// is unknown.
    fn get_subject_version_written_at(
        &self,
        subject: &SubjectName,
        version: Version,
    ) -> Result<Vec<SequenceMarker>, StoreError>;

    /// The offset through which this store has applied every record, or `-1` if it has applied
    /// nothing yet.
    fn loaded_offset(&self) -> Offset;

    /// Records that this store has applied every record up to and including `offset`. Called by
    /// the Applier after each record (or batch) is folded in.
    fn set_loaded_offset(&self, offset: Offset);

    /// Applier effect for a non-tombstone `schema_key`/`schema_value`: upserts the version,
    /// creating the subject if it doesn't exist yet.
    #[allow(clippy::too_many_arguments)]
    fn upsert_schema_version(
        &self,
        subject: &SubjectName,
        version: Version,
        id: SchemaId,
        schema_type: SchemaType,
        definition: &str,
        deleted: bool,
        marker: SequenceMarker,
    );

    /// Applier effect for a tombstoned `schema_key`: permanently erases that version's record.
    fn remove_schema_version(&self, subject: &SubjectName, version: Version);

    /// Applier effect for a non-tombstone `config_key`/`config_value` with no subject: sets the
    /// global compatibility level.
    fn set_global_compatibility(&self, level: CompatibilityLevel, marker: SequenceMarker);

    /// Applier effect for a non-tombstone `config_key`/`config_value` scoped to `subject`: sets
    /// its per-subject override.
    fn set_subject_compatibility(
        &self,
        subject: &SubjectName,
        level: CompatibilityLevel,
        marker: SequenceMarker,
    );

    /// Applier effect for a tombstoned `config_key` scoped to `subject`: clears its override,
    /// reverting it to the global level.
    fn clear_subject_compatibility(&self, subject: &SubjectName);

    /// Applier effect for a non-tombstone `delete_subject_key`/`delete_subject_value`: marks the
    /// whole subject soft-deleted.
    fn mark_subject_soft_deleted(&self, subject: &SubjectName, marker: SequenceMarker);

    /// Applier effect for a tombstoned `delete_subject_key`: permanently erases the subject and
    /// everything recorded about it.
    fn remove_subject(&self, subject: &SubjectName);
}

#[derive(Debug, Clone)]
struct VersionEntry {
    id: SchemaId,
    schema_type: SchemaType,
    definition: String,
    deleted: bool,
    marker: SequenceMarker,
}

#[derive(Debug, Clone, Default)]
struct SubjectState {
    versions: BTreeMap<Version, VersionEntry>,
    compat: Option<CompatibilityLevel>,
    compat_marker: Option<SequenceMarker>,
    deleted: bool,
    delete_marker: Option<SequenceMarker>,
}

#[derive(Debug, Default)]
struct StoreState {
    subjects: BTreeMap<SubjectName, SubjectState>,
    schemas_by_definition: std::collections::HashMap<(SchemaType, String), SchemaId>,
    next_schema_id: i64,
    global_compat: Option<CompatibilityLevel>,
    loaded_offset: Offset,
}

/// An in-memory [`Store`] backed by a single `RwLock`. This is the only `Store` implementation
/// this repo ships; a durable backend (e.g. mirroring to a local RocksDB/sled instance for faster
/// restart) would implement the same trait without the writer needing to change.
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    checker: Arc<dyn CompatibilityChecker>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysCompatible))
    }
}

impl InMemoryStore {
    /// Builds an empty store, consulting `checker` whenever a new version is projected under a
    /// stricter-than-`NONE` compatibility level.
    pub fn new(checker: Arc<dyn CompatibilityChecker>) -> Self {
        Self {
            state: RwLock::new(StoreState {
                loaded_offset: -1,
                next_schema_id: 1,
                ..StoreState::default()
            }),
            checker,
        }
    }

    fn effective_compat(state: &StoreState, subject: &SubjectName) -> CompatibilityLevel {
        state
            .subjects
            .get(subject)
            .and_then(|s| s.compat)
            .or(state.global_compat)
            .unwrap_or_default()
    }
}

impl Store for InMemoryStore {
    fn project_ids(
        &self,
        subject: &SubjectName,
        definition: &str,
        schema_type: SchemaType,
    ) -> Result<Projection, StoreError> {
        let state = self.state.read();

        if let Some(subject_state) = state.subjects.get(subject) {
            if let Some((version, entry)) = subject_state
                .versions
                .iter()
                .find(|(_, e)| !e.deleted && e.schema_type == schema_type && e.definition == definition)
            {
                return Ok(Projection {
                    id: entry.id,
                    version: *version,
                    inserted: false,
                });
            }
        }

        let level = Self::effective_compat(&state, subject);
        if level != CompatibilityLevel::None {
            let existing: Vec<SchemaRecord> = state
                .subjects
                .get(subject)
                .map(|s| {
                    s.versions
                        .values()
                        .filter(|e| !e.deleted)
                        .map(|e| SchemaRecord {
                            id: e.id,
                            schema_type: e.schema_type,
                            definition: e.definition.clone(),
                            deleted: e.deleted,
                        })
                        .collect()
                })
                .unwrap_or_default();
            if !existing.is_empty() && !self.checker.is_compatible(level, &existing, definition) {
                return Err(StoreError::CompatibilityViolation {
                    subject: subject.clone(),
                    level,
                });
            }
        }

        let id = state
            .schemas_by_definition
            .get(&(schema_type, definition.to_string()))
            .copied()
            .unwrap_or(SchemaId(state.next_schema_id));

        let version = state
            .subjects
            .get(subject)
            .and_then(|s| s.versions.keys().max().copied())
            .map(Version::next)
            .unwrap_or(Version::FIRST);

        Ok(Projection {
            id,
            version,
            inserted: true,
        })
    }

    fn get_subject_schema(
        &self,
        subject: &SubjectName,
        version: Version,
        include_deleted: bool,
    ) -> Result<SchemaRecord, StoreError> {
        let state = self.state.read();
        let subject_state = state.subjects.get(subject).ok_or_else(|| StoreError::NotFound {
            subject: subject.clone(),
        })?;
        let entry = subject_state
            .versions
            .get(&version)
            .ok_or_else(|| StoreError::NotFound {
                subject: subject.clone(),
            })?;
        if (entry.deleted || subject_state.deleted) && !include_deleted {
            return Err(StoreError::NotFound {
                subject: subject.clone(),
            });
        }
        Ok(SchemaRecord {
            id: entry.id,
            schema_type: entry.schema_type,
            definition: entry.definition.clone(),
            deleted: entry.deleted,
        })
    }

    fn get_versions(
        &self,
        subject: &SubjectName,
        include_deleted: bool,
    ) -> Result<Vec<Version>, StoreError> {
        let state = self.state.read();
        let subject_state = state.subjects.get(subject).ok_or_else(|| StoreError::NotFound {
            subject: subject.clone(),
        })?;
        if subject_state.deleted && !include_deleted {
            return Err(StoreError::NotFound {
                subject: subject.clone(),
            });
        }
        Ok(subject_state
            .versions
            .iter()
            .filter(|(_, e)| include_deleted || !e.deleted)
            .map(|(v, _)| *v)
            .collect())
    }

    fn is_subject_deleted(&self, subject: &SubjectName) -> bool {
        self.state
            .read()
            .subjects
            .get(subject)
            .map(|s| s.deleted)
            .unwrap_or(false)
    }

    fn get_compatibility(&self, subject: Option<&SubjectName>) -> CompatibilityLevel {
        let state = self.state.read();
        match subject {
            Some(s) => Self::effective_compat(&state, s),
            None => state.global_compat.unwrap_or_default(),
        }
    }

    fn get_raw_compatibility(&self, subject: Option<&SubjectName>) -> Option<CompatibilityLevel> {
        let state = self.state.read();
        match subject {
            Some(s) => state.subjects.get(s).and_then(|s| s.compat),
            None => state.global_compat,
        }
    }

    fn get_subject_written_at(&self, subject: &SubjectName) -> Result<Vec<SequenceMarker>, StoreError> {
        let state = self.state.read();
        let subject_state = state.subjects.get(subject).ok_or_else(|| StoreError::NotFound {
            subject: subject.clone(),
        })?;
        let mut markers: Vec<SequenceMarker> = subject_state
            .versions
            .values()
            .map(|e| e.marker.clone())
            .collect();
        markers.extend(subject_state.compat_marker.clone());
        markers.extend(subject_state.delete_marker.clone());
        Ok(markers)
    }

    fn get_subject_version_written_at(
        &self,
        subject: &SubjectName,
        version: Version,
    ) -> Result<Vec<SequenceMarker>, StoreError> {
        let state = self.state.read();
        let subject_state = state.subjects.get(subject).ok_or_else(|| StoreError::NotFound {
            subject: subject.clone(),
        })?;
        let entry = subject_state
            .versions
            .get(&version)
            .ok_or_else(|| StoreError::NotFound {
                subject: subject.clone(),
            })?;
        Ok(vec![entry.marker.clone()])
    }

    fn loaded_offset(&self) -> Offset {
        self.state.read().loaded_offset
    }

    fn set_loaded_offset(&self, offset: Offset) {
        let mut state = self.state.write();
        if offset > state.loaded_offset {
            state.loaded_offset = offset;
        }
    }

    fn upsert_schema_version(
        &self,
        subject: &SubjectName,
        version: Version,
        id: SchemaId,
        schema_type: SchemaType,
        definition: &str,
        deleted: bool,
        marker: SequenceMarker,
    ) {
        let mut state = self.state.write();
        if id.0 >= state.next_schema_id {
            state.next_schema_id = id.0 + 1;
        }
        state
            .schemas_by_definition
            .entry((schema_type, definition.to_string()))
            .or_insert(id);
        let subject_state = state.subjects.entry(subject.clone()).or_default();
        subject_state.versions.insert(
            version,
            VersionEntry {
                id,
                schema_type,
                definition: definition.to_string(),
                deleted,
                marker,
            },
        );
        debug!(%subject, %version, %id, "applied schema version");
    }

    fn remove_schema_version(&self, subject: &SubjectName, version: Version) {
        let mut state = self.state.write();
        if let Some(subject_state) = state.subjects.get_mut(subject) {
            subject_state.versions.remove(&version);
            if subject_state.versions.is_empty()
                && subject_state.compat.is_none()
                && !subject_state.deleted
            {
                state.subjects.remove(subject);
            }
        }
    }

    fn set_global_compatibility(&self, level: CompatibilityLevel, marker: SequenceMarker) {
        let mut state = self.state.write();
        state.global_compat = Some(level);
        let _ = marker;
    }

    fn set_subject_compatibility(
        &self,
        subject: &SubjectName,
        level: CompatibilityLevel,
        marker: SequenceMarker,
    ) {
        let mut state = self.state.write();
        let subject_state = state.subjects.entry(subject.clone()).or_default();
        subject_state.compat = Some(level);
        subject_state.compat_marker = Some(marker);
    }

    fn clear_subject_compatibility(&self, subject: &SubjectName) {
        let mut state = self.state.write();
        if let Some(subject_state) = state.subjects.get_mut(subject) {
            subject_state.compat = None;
            subject_state.compat_marker = None;
        }
    }

    fn mark_subject_soft_deleted(&self, subject: &SubjectName, marker: SequenceMarker) {
        let mut state = self.state.write();
        let subject_state = state.subjects.entry(subject.clone()).or_default();
        subject_state.deleted = true;
        subject_state.delete_marker = Some(marker);
    }

    fn remove_subject(&self, subject: &SubjectName) {
        self.state.write().subjects.remove(subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(offset: Offset, key_type: KeyType, version: Option<Version>) -> SequenceMarker {
        SequenceMarker::new(offset, NodeId::new("n1"), key_type, version)
    }

    #[test]
    fn project_ids_mints_new_id_and_version() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let subject = SubjectName::new("s1");
        let projection = store
            .project_ids(&subject, "{}", SchemaType::Avro)
            .unwrap();
        assert_eq!(projection.version, Version::FIRST);
        assert!(projection.inserted);
        assert_eq!(projection.id, SchemaId(1), "schema ids are positive, starting at 1");
    }

    #[test]
    fn project_ids_does_not_mutate_state() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let subject = SubjectName::new("s1");
        let first = store.project_ids(&subject, "{}", SchemaType::Avro).unwrap();
        let second = store.project_ids(&subject, "{}", SchemaType::Avro).unwrap();
        assert_eq!(first, second, "no apply happened, so the preview is stable");
        assert!(store.get_versions(&subject, true).is_err());
    }

    #[test]
    fn registering_same_definition_twice_is_not_inserted() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let subject = SubjectName::new("s1");
        let projection = store.project_ids(&subject, "{}", SchemaType::Avro).unwrap();
        store.upsert_schema_version(
            &subject,
            projection.version,
            projection.id,
            SchemaType::Avro,
            "{}",
            false,
            marker(0, KeyType::Schema, Some(projection.version)),
        );

        let repeat = store.project_ids(&subject, "{}", SchemaType::Avro).unwrap();
        assert!(!repeat.inserted);
        assert_eq!(repeat.id, projection.id);
        assert_eq!(repeat.version, projection.version);
    }

    #[test]
    fn cross_subject_dedup_reuses_global_id_but_inserts_new_version() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let s1 = SubjectName::new("s1");
        let s2 = SubjectName::new("s2");
        let p1 = store.project_ids(&s1, "{}", SchemaType::Avro).unwrap();
        store.upsert_schema_version(
            &s1,
            p1.version,
            p1.id,
            SchemaType::Avro,
            "{}",
            false,
            marker(0, KeyType::Schema, Some(p1.version)),
        );

        let p2 = store.project_ids(&s2, "{}", SchemaType::Avro).unwrap();
        assert!(p2.inserted);
        assert_eq!(p2.id, p1.id, "same definition reuses the global id");
        assert_eq!(p2.version, Version::FIRST, "but s2 starts its own version count");
    }

    #[test]
    fn soft_deleted_subject_hides_versions_unless_asked() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let subject = SubjectName::new("s1");
        let p = store.project_ids(&subject, "{}", SchemaType::Avro).unwrap();
        store.upsert_schema_version(
            &subject,
            p.version,
            p.id,
            SchemaType::Avro,
            "{}",
            false,
            marker(0, KeyType::Schema, Some(p.version)),
        );
        store.mark_subject_soft_deleted(&subject, marker(1, KeyType::DeleteSubject, None));

        assert!(store.is_subject_deleted(&subject));
        assert!(store.get_versions(&subject, false).is_err());
        assert_eq!(store.get_versions(&subject, true).unwrap(), vec![Version::FIRST]);
    }

    #[test]
    fn global_compatibility_defaults_to_backward() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        assert_eq!(store.get_compatibility(None), CompatibilityLevel::Backward);
    }

    #[test]
    fn per_subject_override_falls_back_to_global() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let subject = SubjectName::new("s1");
        assert_eq!(
            store.get_compatibility(Some(&subject)),
            CompatibilityLevel::Backward
        );
        store.set_subject_compatibility(
            &subject,
            CompatibilityLevel::Full,
            marker(0, KeyType::Config, None),
        );
        assert_eq!(store.get_compatibility(Some(&subject)), CompatibilityLevel::Full);
        assert_eq!(store.get_compatibility(None), CompatibilityLevel::Backward);
    }

    #[test]
    fn permanent_delete_erases_the_subject_entirely() {
        test_helpers::maybe_start_logging();
        let store = InMemoryStore::default();
        let subject = SubjectName::new("s1");
        let p = store.project_ids(&subject, "{}", SchemaType::Avro).unwrap();
        store.upsert_schema_version(
            &subject,
            p.version,
            p.id,
            SchemaType::Avro,
            "{}",
            false,
            marker(0, KeyType::Schema, Some(p.version)),
        );
        store.remove_subject(&subject);
        assert!(store.get_versions(&subject, true).is_err());
    }
}
