//! Metrics instrumenting the writer: collisions retried, time spent in `produce`, and how many
//! records a catch-up had to replay. Registered the way the teacher's service crates register
//! theirs: one [`metric::Metric`] per concern, recorded against a shared [`metric::Registry`].

use metric::{DurationHistogram, Metric, Registry, U64Counter};

/// The writer's metric handles, held for the lifetime of a [`crate::SequencedWriter`].
#[derive(Debug, Clone)]
pub struct WriterMetrics {
    /// Number of offset-collision retries across all mutating operations.
    pub retries: Metric<U64Counter>,
    /// Latency of `produce_record_batch` calls.
    pub produce_duration: Metric<DurationHistogram>,
    /// Number of records replayed by a catch-up fetch.
    pub catch_up_records: Metric<U64Counter>,
}

impl WriterMetrics {
    /// Registers this writer's metrics against `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            retries: registry.register_metric(
                "sequenced_writer_retries",
                "number of offset-collision retries performed by the sequenced writer",
            ),
            produce_duration: registry.register_metric(
                "sequenced_writer_produce_duration",
                "time spent in produce_record_batch calls",
            ),
            catch_up_records: registry.register_metric(
                "sequenced_writer_catch_up_records",
                "number of records replayed while catching a Store replica up to the log tail",
            ),
        }
    }
}
