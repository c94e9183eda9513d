//! [`SequencerError`]/[`SequencerErrorKind`], modeled directly on
//! `write_buffer::core::WriteBufferError`/`WriteBufferErrorKind`: a boxed dynamic source plus a
//! `Copy` discriminant callers can match on without downcasting.

use std::fmt::{Display, Formatter};

use codec::CodecError;
use log_client::{LogClientError, LogClientErrorKind};
use store::StoreError;

/// An error raised by the sequenced writer or one of its collaborators.
#[derive(Debug)]
pub struct SequencerError {
    inner: Box<dyn std::error::Error + Sync + Send>,
    kind: SequencerErrorKind,
}

impl SequencerError {
    /// Wraps `e` as an error of kind `kind`.
    pub fn new(kind: SequencerErrorKind, e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self { inner: e.into(), kind }
    }

    /// The retry budget was exhausted without the record ever landing at the predicted offset.
    pub fn exhausted_retries() -> Self {
        Self::new(SequencerErrorKind::ExhaustedRetries, "exhausted retry budget")
    }

    /// The process-wide abort signal fired while this operation was suspended.
    pub fn aborted() -> Self {
        Self::new(SequencerErrorKind::Aborted, "operation aborted")
    }

    /// The kind of error this was.
    pub fn kind(&self) -> SequencerErrorKind {
        self.kind
    }

    /// The underlying error.
    pub fn inner(&self) -> &(dyn std::error::Error + 'static) {
        self.inner.as_ref()
    }
}

impl Display for SequencerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SequencerError({:?}): {}", self.kind, self.inner)
    }
}

impl std::error::Error for SequencerError {}

/// Discriminant of a [`SequencerError`], matching the kinds in the error taxonomy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SequencerErrorKind {
    /// The internal topic is unknown to the log backend.
    UnknownTopicOrPartition,
    /// A log operation reported a non-success error code.
    BackendError,
    /// A Store lookup found no such subject/version.
    NotFound,
    /// A new version was rejected by the compatibility checker.
    CompatibilityViolation,
    /// The write loop gave up after repeated offset collisions.
    ExhaustedRetries,
    /// The operation encoded or decoded malformed bytes; treated as a programming error.
    Codec,
    /// The process-wide abort signal fired mid-operation.
    Aborted,
}

impl From<LogClientError> for SequencerError {
    fn from(e: LogClientError) -> Self {
        let kind = match e.kind() {
            LogClientErrorKind::UnknownTopicOrPartition => SequencerErrorKind::UnknownTopicOrPartition,
            LogClientErrorKind::BackendError | LogClientErrorKind::Unknown => {
                SequencerErrorKind::BackendError
            }
        };
        Self::new(kind, e)
    }
}

impl From<StoreError> for SequencerError {
    fn from(e: StoreError) -> Self {
        let kind = match &e {
            StoreError::NotFound { .. } => SequencerErrorKind::NotFound,
            StoreError::CompatibilityViolation { .. } => SequencerErrorKind::CompatibilityViolation,
        };
        Self::new(kind, e)
    }
}

impl From<CodecError> for SequencerError {
    fn from(e: CodecError) -> Self {
        Self::new(SequencerErrorKind::Codec, e)
    }
}

/// Internal-only "keep retrying" signal handed to [`backoff::Backoff::retry_all_errors`]; never
/// surfaced to a caller of the writer.
#[derive(Debug)]
pub(crate) struct RetrySignal;

impl Display for RetrySignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "record landed at an unexpected offset, retrying")
    }
}

impl std::error::Error for RetrySignal {}
