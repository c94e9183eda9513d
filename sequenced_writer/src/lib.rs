//! The sequenced writer: turns conflicting concurrent mutation requests (register schema, set
//! compatibility, soft/permanent delete) into a totally ordered sequence of records on a
//! single-partition internal topic, while keeping a Store projection of that topic up to date.
//!
//! Implements the distilled design's per-worker actor model on a classical multi-threaded
//! `tokio` runtime: one [`Store`] replica per shard, a dedicated write permit and wait permit on
//! the coordinator (shard `0`), and ordinary `Arc`-shared state everywhere else.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod config;
mod error;
pub mod metrics;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use backoff::{Backoff, BackoffConfig};
use codec::{
    encode_record, ConfigKey, ConfigValue, DeleteSubjectKey, DeleteSubjectValue, Record, RecordKey,
    RecordValue, SchemaKey, SchemaValue,
};
use futures::StreamExt;
use log_client::{LogClient, TopicPartition};
use metric::{Attributes, Registry};
use node_time::TimeProvider;
use observability_deps::tracing::{debug, info};
use registry_types::{CompatibilityLevel, KeyType, NodeId, Offset, SchemaId, SchemaType, SequenceMarker, SubjectName, Version};
use store::Store;
use tokio_util::sync::CancellationToken;

pub use crate::config::Config;
pub use crate::error::{SequencerError, SequencerErrorKind};
use crate::error::RetrySignal;
use crate::metrics::WriterMetrics;

/// Outcome of a single attempt inside [`SequencedWriter::with_retry`].
enum Attempt<T> {
    /// The operation is finished, whether by writing a new record or by resolving as a no-op.
    Done(T),
    /// The record landed at an unexpected offset; catch up and try again.
    Retry,
}

/// The sequenced writer. Generic over the Log Client backend so tests can run against
/// [`log_client::mock::MockLogClient`]/[`log_client::mock::RacingLogClient`] while a real
/// deployment wires in a Kafka-compatible client behind the same trait.
#[derive(Debug)]
pub struct SequencedWriter<L> {
    node_id: NodeId,
    topic: TopicPartition,
    log: L,
    /// One Store replica per shard; replica `0` is the coordinator and is the only one mutated
    /// by a sequenced write. Every replica can independently catch itself up via `read_sync`.
    shards: Vec<Arc<dyn Store>>,
    /// Serializes catch-up fetches per shard, so a slow reader doesn't race itself.
    wait_permits: Vec<tokio::sync::Semaphore>,
    /// Held across the whole body of a sequenced write on shard 0; this is what makes offset
    /// prediction correct.
    write_permit: tokio::sync::Semaphore,
    retry_budget: u32,
    backoff_config: BackoffConfig,
    time_provider: Arc<dyn TimeProvider>,
    metrics: WriterMetrics,
    /// The single process-wide abort signal honoured at every suspension point: produce, fetch,
    /// list-offsets, and permit acquisition. Cancelling it surfaces
    /// [`SequencerErrorKind::Aborted`] from whichever call was in flight.
    shutdown: CancellationToken,
}

impl<L: LogClient> SequencedWriter<L> {
    /// Builds a writer with `shards.len()` Store replicas (replica `0` is the coordinator),
    /// honouring `shutdown` as its process-wide abort signal.
    pub fn new(
        node_id: NodeId,
        log: L,
        shards: Vec<Arc<dyn Store>>,
        retry_budget: u32,
        time_provider: Arc<dyn TimeProvider>,
        registry: &Registry,
        shutdown: CancellationToken,
    ) -> Self {
        assert!(!shards.is_empty(), "a writer needs at least a coordinator replica");
        let wait_permits = shards.iter().map(|_| tokio::sync::Semaphore::new(1)).collect();
        Self {
            node_id,
            topic: TopicPartition::internal_topic(),
            log,
            shards,
            wait_permits,
            write_permit: tokio::sync::Semaphore::new(1),
            retry_budget,
            backoff_config: BackoffConfig::default(),
            time_provider,
            metrics: WriterMetrics::new(registry),
            shutdown,
        }
    }

    /// Number of Store replicas this writer manages.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// The Store replica for `shard`, for read-only access by REST handlers.
    pub fn store(&self, shard: usize) -> &Arc<dyn Store> {
        &self.shards[shard]
    }

    /// A clone of the process-wide abort signal this writer honours. Calling
    /// [`CancellationToken::cancel`] on it (or on any other clone, e.g. the one held by the
    /// process's own shutdown handler) aborts every in-flight and future suspension point with
    /// [`SequencerErrorKind::Aborted`].
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Races `fut` against the process-wide abort signal, failing with
    /// [`SequencerErrorKind::Aborted`] if the signal fires first. Used at every suspension point
    /// named in the design: produce, fetch, list-offsets, and permit acquisition.
    async fn cancellable<T>(&self, fut: impl Future<Output = T>) -> Result<T, SequencerError> {
        tokio::select! {
            result = fut => Ok(result),
            _ = self.shutdown.cancelled() => Err(SequencerError::aborted()),
        }
    }

    /// Catches `shard`'s Store replica up to the internal topic's current tail. Read-only
    /// accessors that enumerate state must call this first if they want read-your-writes.
    pub async fn read_sync(&self, shard: usize) -> Result<(), SequencerError> {
        let offsets = self.cancellable(self.log.list_offsets(&self.topic)).await??;
        if let Some(kind) = offsets.error {
            return Err(SequencerError::new(
                match kind {
                    log_client::LogClientErrorKind::UnknownTopicOrPartition => {
                        SequencerErrorKind::UnknownTopicOrPartition
                    }
                    _ => SequencerErrorKind::BackendError,
                },
                format!("list_offsets reported {kind:?} for the internal topic"),
            ));
        }
        self.wait_for(shard, offsets.offset - 1).await
    }

    /// Advances `shard`'s knowledge that a record has landed at `offset` elsewhere (e.g.
    /// observed by another shard's catch-up reader), without itself fetching anything. The
    /// authoritative catch-up still happens in [`Self::wait_for`]; this is a cheap hint only.
    pub fn advance_offset(&self, shard: usize, offset: Offset) {
        self.shards[shard].set_loaded_offset(offset);
    }

    async fn wait_for(&self, shard: usize, target_offset: Offset) -> Result<(), SequencerError> {
        let _permit = self
            .cancellable(self.wait_permits[shard].acquire())
            .await?
            .map_err(|_| SequencerError::aborted())?;

        let store = self.shards[shard].as_ref();
        if target_offset <= store.loaded_offset() {
            return Ok(());
        }

        let start = store.loaded_offset() + 1;
        let mut stream = self
            .log
            .make_fetch_batch_reader(&self.topic, start, target_offset + 1);
        let mut replayed = 0u64;
        while let Some(item) = self.cancellable(stream.next()).await? {
            let fetched = item?;
            let encoded = codec::EncodedRecord {
                key: fetched.key,
                value: fetched.value,
            };
            applier::apply(store, fetched.offset, &encoded)?;
            replayed += 1;
        }
        if replayed > 0 {
            self.metrics
                .catch_up_records
                .recorder(Attributes::new())
                .add(replayed);
            debug!(shard, replayed, target_offset, "caught up Store replica");
        }
        Ok(())
    }

    /// Registers `definition` (tagged `schema_type`) as a new version of `subject`, or returns
    /// the existing id if that exact definition is already an active version of the subject.
    pub async fn write_subject_version(
        &self,
        subject: &SubjectName,
        definition: &str,
        schema_type: SchemaType,
    ) -> Result<SchemaId, SequencerError> {
        let subject = subject.clone();
        let definition = definition.to_string();
        self.with_retry(move |write_at| {
            let subject = subject.clone();
            let definition = definition.clone();
            async move {
                let projection = self.shards[0].project_ids(&subject, &definition, schema_type)?;
                if !projection.inserted {
                    return Ok(Attempt::Done(projection.id));
                }

                let record = Record {
                    key: RecordKey::Schema(SchemaKey {
                        seq: write_at,
                        node: self.node_id.clone(),
                        subject: subject.clone(),
                        version: projection.version,
                    }),
                    value: Some(RecordValue::Schema(SchemaValue {
                        subject: subject.clone(),
                        version: projection.version,
                        schema_type,
                        id: projection.id,
                        definition: definition.clone(),
                        deleted: false,
                    })),
                };

                match self.produce_and_apply(write_at, record).await? {
                    true => Ok(Attempt::Done(projection.id)),
                    false => Ok(Attempt::Retry),
                }
            }
        })
        .await
    }

    /// Sets global (`subject: None`) or per-subject compatibility. Returns `false` without
    /// writing a record if the effective level already matches `compat`.
    pub async fn write_config(
        &self,
        subject: Option<&SubjectName>,
        compat: CompatibilityLevel,
    ) -> Result<bool, SequencerError> {
        let subject = subject.cloned();
        self.with_retry(move |write_at| {
            let subject = subject.clone();
            async move {
                let current = self.shards[0].get_raw_compatibility(subject.as_ref());
                if current == Some(compat) {
                    return Ok(Attempt::Done(false));
                }

                let record = Record {
                    key: RecordKey::Config(ConfigKey {
                        seq: write_at,
                        node: self.node_id.clone(),
                        subject: subject.clone(),
                    }),
                    value: Some(RecordValue::Config(ConfigValue { compat })),
                };

                match self.produce_and_apply(write_at, record).await? {
                    true => Ok(Attempt::Done(true)),
                    false => Ok(Attempt::Retry),
                }
            }
        })
        .await
    }

    /// Soft-deletes a single version of `subject`, rewriting its record with `deleted = true`.
    pub async fn delete_subject_version(
        &self,
        subject: &SubjectName,
        version: Version,
    ) -> Result<bool, SequencerError> {
        let subject = subject.clone();
        self.with_retry(move |write_at| {
            let subject = subject.clone();
            async move {
                let current = self.shards[0].get_subject_schema(&subject, version, true)?;

                let record = Record {
                    key: RecordKey::Schema(SchemaKey {
                        seq: write_at,
                        node: self.node_id.clone(),
                        subject: subject.clone(),
                        version,
                    }),
                    value: Some(RecordValue::Schema(SchemaValue {
                        subject: subject.clone(),
                        version,
                        schema_type: current.schema_type,
                        id: current.id,
                        definition: current.definition.clone(),
                        deleted: true,
                    })),
                };

                match self.produce_and_apply(write_at, record).await? {
                    true => Ok(Attempt::Done(true)),
                    false => Ok(Attempt::Retry),
                }
            }
        })
        .await
    }

    /// Soft-deletes every version of `subject`. Idempotent once the subject is already flagged
    /// deleted: returns the current version list without writing another record.
    pub async fn delete_subject_impermanent(
        &self,
        subject: &SubjectName,
    ) -> Result<Vec<Version>, SequencerError> {
        let subject = subject.clone();
        self.with_retry(move |write_at| {
            let subject = subject.clone();
            async move {
                if self.shards[0].is_subject_deleted(&subject) {
                    let versions = self.shards[0].get_versions(&subject, true)?;
                    return Ok(Attempt::Done(versions));
                }

                let versions = self.shards[0].get_versions(&subject, true)?;
                let max_version = versions.iter().copied().max().unwrap_or(Version::FIRST);

                let record = Record {
                    key: RecordKey::DeleteSubject(DeleteSubjectKey {
                        seq: write_at,
                        node: self.node_id.clone(),
                        subject: subject.clone(),
                    }),
                    value: Some(RecordValue::DeleteSubject(DeleteSubjectValue {
                        subject: subject.clone(),
                        version: max_version,
                    })),
                };

                match self.produce_and_apply(write_at, record).await? {
                    true => Ok(Attempt::Done(versions.clone())),
                    false => Ok(Attempt::Retry),
                }
            }
        })
        .await
    }

    /// Permanently tombstones the records produced for `subject` (a single `version`, or every
    /// version plus its config/delete-subject records when `version` is `None`). Bypasses
    /// sequencing entirely: tombstones are idempotent and order-insensitive, so no offset check
    /// is needed, only the write permit to avoid racing a concurrent sequenced write.
    pub async fn delete_subject_permanent(
        &self,
        subject: &SubjectName,
        version: Option<Version>,
    ) -> Result<Vec<Version>, SequencerError> {
        let _permit = self
            .cancellable(self.write_permit.acquire())
            .await?
            .map_err(|_| SequencerError::aborted())?;
        self.read_sync(0).await?;

        let store = self.shards[0].as_ref();
        let (markers, versions) = match version {
            Some(v) => (store.get_subject_version_written_at(subject, v)?, vec![v]),
            None => {
                let versions = store.get_versions(subject, true)?;
                (store.get_subject_written_at(subject)?, versions)
            }
        };

        let records: Vec<Record> = markers.iter().map(|marker| tombstone_for(subject, marker)).collect();
        if records.is_empty() {
            return Err(SequencerError::new(
                SequencerErrorKind::NotFound,
                format!("no records recorded for subject {subject}"),
            ));
        }

        let batch = codec::build_batch(&records)?;
        let response = self
            .cancellable(self.log.produce_record_batch(&self.topic, batch.clone()))
            .await??;
        for (i, encoded) in batch.iter().enumerate() {
            applier::apply(store, response.base_offset + i as Offset, encoded)?;
        }
        info!(%subject, ?version, tombstones = records.len(), "permanently deleted subject records");
        Ok(versions)
    }

    /// Produces `record` with `seq = write_at`, comparing the returned base offset to the
    /// prediction. Applies the record locally and returns `true` on a match; returns `false`
    /// (the caller should catch up and retry) on a mismatch.
    async fn produce_and_apply(&self, write_at: Offset, record: Record) -> Result<bool, SequencerError> {
        let encoded = encode_record(&record)?;
        let start = self.time_provider.now();
        let response = self
            .cancellable(self.log.produce_record_batch(&self.topic, vec![encoded.clone()]))
            .await??;
        if let Some(elapsed) = self
            .time_provider
            .now()
            .checked_duration_since(start)
            .and_then(|d| d.to_std().ok())
        {
            self.metrics.produce_duration.recorder(Attributes::new()).record(elapsed);
        }

        if response.base_offset == write_at {
            applier::apply(self.shards[0].as_ref(), write_at, &encoded)?;
            Ok(true)
        } else {
            debug!(write_at, landed_at = response.base_offset, "offset collision, will retry");
            Ok(false)
        }
    }

    /// Runs the bounded, optimistic produce-and-check loop described in the design: acquire the
    /// write permit, catch up to the tail, then repeatedly ask `step` to attempt the write at
    /// the next predicted offset, catching up and retrying on a mismatch until either `step`
    /// reports success or the retry budget is exhausted.
    async fn with_retry<T, F, Fut>(&self, mut step: F) -> Result<T, SequencerError>
    where
        T: Send,
        F: FnMut(Offset) -> Fut + Send,
        Fut: Future<Output = Result<Attempt<T>, SequencerError>> + Send,
    {
        let _permit = self
            .cancellable(self.write_permit.acquire())
            .await?
            .map_err(|_| SequencerError::aborted())?;
        self.read_sync(0).await?;

        let mut backoff = Backoff::new(&self.backoff_config);
        let attempts_left = AtomicU32::new(self.retry_budget);

        backoff
            .retry_all_errors("sequenced_write", || async {
                let write_at = self.shards[0].loaded_offset() + 1;
                match step(write_at).await {
                    Ok(Attempt::Done(value)) => Ok(Ok(value)),
                    Ok(Attempt::Retry) => {
                        let remaining = attempts_left.load(Ordering::SeqCst);
                        if remaining == 0 {
                            return Ok(Err(SequencerError::exhausted_retries()));
                        }
                        attempts_left.store(remaining - 1, Ordering::SeqCst);
                        self.metrics.retries.recorder(Attributes::new()).inc();
                        if let Err(fatal) = self.read_sync(0).await {
                            return Ok(Err(fatal));
                        }
                        Err(RetrySignal)
                    }
                    Err(fatal) => Ok(Err(fatal)),
                }
            })
            .await
            .expect("BackoffError is Infallible; retry_all_errors never actually returns Err")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log_client::mock::{MockLogClient, RacingLogClient};
    use node_time::SystemProvider;
    use store::InMemoryStore;

    fn writer(log: MockLogClient, node: &str) -> SequencedWriter<MockLogClient> {
        let registry = Registry::new();
        SequencedWriter::new(
            NodeId::new(node),
            log,
            vec![Arc::new(InMemoryStore::default())],
            5,
            Arc::new(SystemProvider::new()),
            &registry,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn concurrent_registration_of_identical_schema_dedupes() {
        test_helpers::maybe_start_logging();
        let log = MockLogClient::new();
        let a = writer(log.clone(), "node-a");
        let b = writer(log.clone(), "node-b");
        let subject = SubjectName::new("s1");

        let (id_a, id_b) = tokio::join!(
            a.write_subject_version(&subject, "{}", SchemaType::Avro),
            b.write_subject_version(&subject, "{}", SchemaType::Avro),
        );

        assert_eq!(id_a.unwrap(), id_b.unwrap());
        assert_eq!(log.len(), 1, "only one physical record was ever produced");
        assert_eq!(
            a.store(0).get_versions(&subject, false).unwrap(),
            vec![Version::FIRST]
        );
    }

    #[tokio::test]
    async fn soft_delete_leaves_a_contiguous_version_range() {
        test_helpers::maybe_start_logging();
        let log = MockLogClient::new();
        let w = writer(log, "node-a");
        let subject = SubjectName::new("s1");

        w.write_subject_version(&subject, "{\"v\":1}", SchemaType::Avro)
            .await
            .unwrap();
        w.write_subject_version(&subject, "{\"v\":2}", SchemaType::Avro)
            .await
            .unwrap();
        w.delete_subject_version(&subject, Version::FIRST).await.unwrap();

        assert_eq!(
            w.store(0).get_versions(&subject, false).unwrap(),
            vec![Version(2)]
        );
        assert_eq!(
            w.store(0).get_versions(&subject, true).unwrap(),
            vec![Version::FIRST, Version(2)]
        );
    }

    #[tokio::test]
    async fn setting_the_same_compatibility_twice_is_a_no_op_the_second_time() {
        test_helpers::maybe_start_logging();
        let log = MockLogClient::new();
        let w = writer(log.clone(), "node-a");

        let first = w.write_config(None, CompatibilityLevel::Backward).await.unwrap();
        let second = w.write_config(None, CompatibilityLevel::Backward).await.unwrap();

        assert!(first, "repeating the already-default level still writes once");
        assert!(!second, "no record needed once the level already matches");
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn permanent_delete_erases_every_record_and_replay_is_empty() {
        test_helpers::maybe_start_logging();
        let log = MockLogClient::new();
        let w = writer(log.clone(), "node-a");
        let subject = SubjectName::new("s1");

        w.write_subject_version(&subject, "{}", SchemaType::Avro)
            .await
            .unwrap();
        w.write_config(Some(&subject), CompatibilityLevel::Full)
            .await
            .unwrap();
        w.delete_subject_impermanent(&subject).await.unwrap();
        w.delete_subject_permanent(&subject, None).await.unwrap();

        // Replay the whole topic from scratch into a fresh Store.
        let replay_store: Arc<dyn Store> = Arc::new(InMemoryStore::default());
        let end = log.len() as Offset;
        let mut stream = log.make_fetch_batch_reader(&TopicPartition::internal_topic(), 0, end);
        while let Some(item) = stream.next().await {
            let fetched = item.unwrap();
            let encoded = codec::EncodedRecord {
                key: fetched.key,
                value: fetched.value,
            };
            applier::apply(replay_store.as_ref(), fetched.offset, &encoded).unwrap();
        }

        assert!(replay_store.get_versions(&subject, true).is_err());
    }

    #[tokio::test]
    async fn simulated_offset_race_retries_transparently() {
        test_helpers::maybe_start_logging();
        let inner = MockLogClient::new();
        let racing = RacingLogClient::new(inner, 1);
        let w = writer_with_log(racing, "node-a");
        let subject = SubjectName::new("s1");

        let id = w
            .write_subject_version(&subject, "{}", SchemaType::Avro)
            .await
            .unwrap();

        assert_eq!(
            w.store(0).get_subject_schema(&subject, Version::FIRST, false).unwrap().id,
            id
        );
    }

    fn writer_with_log<L: LogClient>(log: L, node: &str) -> SequencedWriter<L> {
        let registry = Registry::new();
        SequencedWriter::new(
            NodeId::new(node),
            log,
            vec![Arc::new(InMemoryStore::default())],
            5,
            Arc::new(SystemProvider::new()),
            &registry,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn read_sync_catches_up_a_non_coordinator_replica() {
        test_helpers::maybe_start_logging();
        let log = MockLogClient::new();
        let subject = SubjectName::new("s1");
        let registry = Registry::new();
        let w = SequencedWriter::new(
            NodeId::new("node-a"),
            log.clone(),
            vec![
                Arc::new(InMemoryStore::default()),
                Arc::new(InMemoryStore::default()),
            ],
            5,
            Arc::new(SystemProvider::new()),
            &registry,
            CancellationToken::new(),
        );

        w.write_subject_version(&subject, "{}", SchemaType::Avro)
            .await
            .unwrap();
        assert!(
            w.store(1).get_versions(&subject, false).is_err(),
            "replica 1 hasn't caught up yet"
        );

        w.read_sync(1).await.unwrap();
        assert_eq!(w.store(1).get_versions(&subject, false).unwrap(), vec![Version::FIRST]);
    }

    #[tokio::test]
    async fn cancelling_the_shutdown_handle_aborts_an_in_flight_write() {
        test_helpers::maybe_start_logging();
        let log = MockLogClient::new();
        let w = writer(log, "node-a");
        let subject = SubjectName::new("s1");

        w.shutdown_handle().cancel();

        let err = w
            .write_subject_version(&subject, "{}", SchemaType::Avro)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SequencerErrorKind::Aborted);
    }
}

fn tombstone_for(subject: &SubjectName, marker: &SequenceMarker) -> Record {
    let key = match marker.key_type {
        KeyType::Schema => RecordKey::Schema(SchemaKey {
            seq: marker.offset,
            node: marker.node.clone(),
            subject: subject.clone(),
            version: marker.version.expect("a schema marker always carries its version"),
        }),
        KeyType::Config => RecordKey::Config(ConfigKey {
            seq: marker.offset,
            node: marker.node.clone(),
            subject: Some(subject.clone()),
        }),
        KeyType::DeleteSubject => RecordKey::DeleteSubject(DeleteSubjectKey {
            seq: marker.offset,
            node: marker.node.clone(),
            subject: subject.clone(),
        }),
    };
    Record { key, value: None }
}
