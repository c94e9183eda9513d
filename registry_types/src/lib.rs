//! Shared entity types for the schema registry sequenced writer.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Name of a subject: a family of schema versions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectName(String);

impl SubjectName {
    /// Wraps a plain string as a subject name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the subject name as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubjectName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubjectName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SubjectName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A schema version, monotonically increasing per subject, starting at 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub i32);

impl Version {
    /// The first version ever assigned to a subject.
    pub const FIRST: Self = Self(1);

    /// Returns the version immediately following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A globally unique schema identifier, stable across versions that reuse the same definition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaId(pub i64);

impl Display for SchemaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The wire type tag carried alongside an opaque schema definition. The definitions themselves
/// are never parsed or validated by this core (see [`crate::SubjectName`] doc and the writer's
/// non-goals) -- the tag is only used for dedup and for pass-through to the REST layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    /// Avro schema.
    Avro,
    /// Protocol Buffers schema.
    Protobuf,
    /// JSON Schema.
    Json,
}

impl Display for SchemaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Avro => "AVRO",
            Self::Protobuf => "PROTOBUF",
            Self::Json => "JSON",
        };
        write!(f, "{}", s)
    }
}

/// Compatibility level, settable globally or per-subject.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityLevel {
    /// No compatibility enforcement.
    None,
    /// Backward compatible with the immediately preceding version.
    Backward,
    /// Backward compatible with all preceding versions.
    BackwardTransitive,
    /// Forward compatible with the immediately following version.
    Forward,
    /// Forward compatible with all following versions.
    ForwardTransitive,
    /// Both backward and forward compatible with the immediately adjacent version.
    Full,
    /// Both backward and forward compatible with all other versions.
    FullTransitive,
}

impl Default for CompatibilityLevel {
    /// The de-facto default assumed when the global level has never been written.
    ///
    /// The distilled design left this open (see `SPEC_FULL.md` / `DESIGN.md`); this repo freezes
    /// it to `BACKWARD`.
    fn default() -> Self {
        Self::Backward
    }
}

/// Identifier of the writing process, used as the `node` field of every persisted key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps a plain string as a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the node id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 64-bit non-negative offset into the internal topic, assigned by the log client.
pub type Offset = i64;

/// Discriminates which of the three record kinds a given key belongs to, recorded alongside
/// every sequence marker so permanent deletion can rebuild the right key shape.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// A `schema_key`.
    Schema,
    /// A `config_key`.
    Config,
    /// A `delete_subject_key`.
    DeleteSubject,
}

/// `(offset, node, key_type)` tuple recorded in the Store for every persisted key, used to
/// locate the records that a permanent delete must tombstone.
///
/// The `version` field is a deliberate, minor enrichment beyond the literal spec tuple: because
/// `seq` is part of every key (not just a consistency check), two records for the same
/// `(subject, version)` are distinct compaction units, so permanently deleting a whole subject
/// must reconstruct each one's exact original key -- which, for a `schema_key`, requires knowing
/// which version it was. `version` is `None` for `config_key`/`delete_subject_key` markers, whose
/// keys don't carry a version. See `DESIGN.md` for the rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceMarker {
    /// The offset at which the record was actually persisted.
    pub offset: Offset,
    /// The node that originally wrote this record; needed to reconstruct a byte-identical key.
    pub node: NodeId,
    /// Discriminant of the key shape, so the permanent-delete path can reconstruct the key.
    pub key_type: KeyType,
    /// The version this marker belongs to, for `key_type == Schema` markers only.
    pub version: Option<Version>,
}

impl SequenceMarker {
    /// Builds a new sequence marker.
    pub fn new(offset: Offset, node: NodeId, key_type: KeyType, version: Option<Version>) -> Self {
        Self {
            offset,
            node,
            key_type,
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_increments() {
        test_helpers::maybe_start_logging();
        assert_eq!(Version::FIRST.next(), Version(2));
    }

    #[test]
    fn default_compatibility_is_backward() {
        test_helpers::maybe_start_logging();
        assert_eq!(CompatibilityLevel::default(), CompatibilityLevel::Backward);
    }

    #[test]
    fn subject_name_round_trips_through_string() {
        test_helpers::maybe_start_logging();
        let s: SubjectName = "s1".into();
        assert_eq!(s.as_str(), "s1");
        assert_eq!(s.to_string(), "s1");
    }
}
