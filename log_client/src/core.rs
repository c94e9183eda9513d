//! The interface the sequenced writer consumes from the internal topic's log backend: list
//! end offsets, produce a record batch, and fetch a range as a stream. Modeled on
//! `write_buffer::core::{WriteBufferWriting, WriteBufferReading}`'s split between a boxed
//! dynamic error and a `Copy` discriminant.

use std::fmt::{Debug, Display, Formatter};

use async_trait::async_trait;
use codec::RecordBatch;
use futures::stream::BoxStream;
use registry_types::Offset;

/// Identifies the single-partition internal topic. The writer always targets one instance of
/// this; it exists as a type mainly so the [`LogClient`] trait reads the same way a multi-topic
/// client's would.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    /// Topic name, e.g. `schema_registry_internal_tp`.
    pub topic: String,
    /// Always `0`: the internal topic has exactly one partition.
    pub partition: i32,
}

impl TopicPartition {
    /// Builds the well-known internal-topic reference.
    pub fn internal_topic() -> Self {
        Self {
            topic: "schema_registry_internal_tp".to_string(),
            partition: 0,
        }
    }
}

/// Generic boxed error type used by this crate; dynamic boxing makes it easy to wrap whatever
/// concrete backend (the [`mock`](crate::mock) implementation here, `rdkafka` in production)
/// raises, while exposing a fixed, `Copy` kind for callers to match on.
#[derive(Debug)]
pub struct LogClientError {
    inner: Box<dyn std::error::Error + Sync + Send>,
    kind: LogClientErrorKind,
}

impl LogClientError {
    /// Wraps `e` as an error of kind `kind`.
    pub fn new(kind: LogClientErrorKind, e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self { inner: e.into(), kind }
    }

    /// Shorthand for [`LogClientErrorKind::UnknownTopicOrPartition`].
    pub fn unknown_topic_or_partition(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(LogClientErrorKind::UnknownTopicOrPartition, e)
    }

    /// Shorthand for [`LogClientErrorKind::BackendError`].
    pub fn backend_error(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(LogClientErrorKind::BackendError, e)
    }

    /// The kind of error this was.
    pub fn kind(&self) -> LogClientErrorKind {
        self.kind
    }

    /// The inner error.
    pub fn inner(&self) -> &(dyn std::error::Error + 'static) {
        self.inner.as_ref()
    }
}

impl Display for LogClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogClientError({:?}): {}", self.kind, self.inner)
    }
}

impl std::error::Error for LogClientError {}

/// Discriminant of a [`LogClientError`], cheap to match on and log without downcasting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogClientErrorKind {
    /// The internal topic or its partition is unknown to the backend.
    UnknownTopicOrPartition,
    /// The backend reported a non-success error code for the operation.
    BackendError,
    /// Any other failure.
    Unknown,
}

/// One partition's reported high-watermark-adjacent offset, as returned by `list_offsets`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PartitionOffset {
    /// The partition's current end offset (one past the last written offset; `0` if empty).
    pub offset: Offset,
    /// Whether the backend considered this lookup successful.
    pub error: Option<LogClientErrorKind>,
}

/// Response to a `produce_record_batch` call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProduceResponse {
    /// The offset assigned to the first record of the batch.
    pub base_offset: Offset,
}

/// One record read back from the log during a fetch, with its assigned offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    /// The offset this record was persisted at.
    pub offset: Offset,
    /// The encoded key bytes.
    pub key: Vec<u8>,
    /// The encoded value bytes, or `None` for a tombstone.
    pub value: Option<Vec<u8>>,
}

/// The Log Client interface consumed by the sequenced writer: produce/fetch/list-offsets on the
/// internal topic. A real implementation wraps a Kafka-compatible client (`rdkafka`/`rskafka`);
/// this repo ships [`crate::mock::MockLogClient`] for tests.
#[async_trait]
pub trait LogClient: Debug + Send + Sync + 'static {
    /// Lists the current end offset of `tp`. Fails with
    /// [`LogClientErrorKind::UnknownTopicOrPartition`] if the topic does not exist.
    async fn list_offsets(&self, tp: &TopicPartition) -> Result<PartitionOffset, LogClientError>;

    /// Produces `batch` to `tp` as a single record batch, returning the offset assigned to its
    /// first record. The log assigns the rest of the batch contiguous offsets.
    async fn produce_record_batch(
        &self,
        tp: &TopicPartition,
        batch: RecordBatch,
    ) -> Result<ProduceResponse, LogClientError>;

    /// Returns a stream over `[start_offset, end_offset)` of `tp`, in offset order. The stream
    /// ends once `end_offset` has been reached; no timeout is imposed (slow catch-up must not
    /// spuriously fail a mutation, per the design's cancellation notes).
    fn make_fetch_batch_reader(
        &self,
        tp: &TopicPartition,
        start_offset: Offset,
        end_offset: Offset,
    ) -> BoxStream<'static, Result<FetchedRecord, LogClientError>>;
}
