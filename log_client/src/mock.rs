//! An in-memory [`LogClient`] backed by a single `Vec`, standing in for a real Kafka-compatible
//! backend in tests. Also supports injecting a one-shot foreign write or offset collision so
//! tests can exercise the sequenced writer's retry path deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use codec::RecordBatch;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use registry_types::Offset;

use crate::core::{
    FetchedRecord, LogClient, LogClientError, PartitionOffset, ProduceResponse, TopicPartition,
};

#[derive(Debug, Default)]
struct Log {
    records: Vec<FetchedRecord>,
}

/// An in-memory, single-partition log client. Every `MockLogClient` clone shares the same
/// underlying log, the way multiple `rdkafka` producer handles share one broker connection.
#[derive(Debug, Clone, Default)]
pub struct MockLogClient {
    log: Arc<Mutex<Log>>,
}

impl MockLogClient {
    /// Creates a new, empty mock log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directly appends `batch` to the log without going through [`LogClient::produce_record_batch`],
    /// simulating a write from another node that lands ahead of the caller's prediction. Returns
    /// the offset assigned to the first appended record.
    pub fn inject_foreign_write(&self, batch: RecordBatch) -> Offset {
        let mut log = self.log.lock();
        let base = log.records.len() as Offset;
        for (i, rec) in batch.into_iter().enumerate() {
            log.records.push(FetchedRecord {
                offset: base + i as Offset,
                key: rec.key,
                value: rec.value,
            });
        }
        base
    }

    /// Total number of records currently in the log, primarily for tests.
    pub fn len(&self) -> usize {
        self.log.lock().records.len()
    }

    /// Whether the log currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogClient for MockLogClient {
    async fn list_offsets(&self, _tp: &TopicPartition) -> Result<PartitionOffset, LogClientError> {
        let end = self.log.lock().records.len() as Offset;
        Ok(PartitionOffset {
            offset: end,
            error: None,
        })
    }

    async fn produce_record_batch(
        &self,
        _tp: &TopicPartition,
        batch: RecordBatch,
    ) -> Result<ProduceResponse, LogClientError> {
        let mut log = self.log.lock();
        let base_offset = log.records.len() as Offset;
        for (i, rec) in batch.into_iter().enumerate() {
            log.records.push(FetchedRecord {
                offset: base_offset + i as Offset,
                key: rec.key,
                value: rec.value,
            });
        }
        Ok(ProduceResponse { base_offset })
    }

    fn make_fetch_batch_reader(
        &self,
        _tp: &TopicPartition,
        start_offset: Offset,
        end_offset: Offset,
    ) -> BoxStream<'static, Result<FetchedRecord, LogClientError>> {
        let records: Vec<_> = self
            .log
            .lock()
            .records
            .iter()
            .filter(|r| r.offset >= start_offset && r.offset < end_offset)
            .cloned()
            .collect();
        stream::iter(records.into_iter().map(Ok)).boxed()
    }
}

/// Wraps a [`MockLogClient`], forcing the first `produce_record_batch` call to report a base
/// offset one higher than what actually landed -- simulating another writer's record winning
/// the race -- then delegating to the real mock for every subsequent call.
#[derive(Debug)]
pub struct RacingLogClient {
    inner: MockLogClient,
    collisions_remaining: Mutex<u32>,
}

impl RacingLogClient {
    /// Wraps `inner`, injecting `collisions` one-offset-too-high responses before behaving
    /// normally.
    pub fn new(inner: MockLogClient, collisions: u32) -> Self {
        Self {
            inner,
            collisions_remaining: Mutex::new(collisions),
        }
    }
}

#[async_trait]
impl LogClient for RacingLogClient {
    async fn list_offsets(&self, tp: &TopicPartition) -> Result<PartitionOffset, LogClientError> {
        self.inner.list_offsets(tp).await
    }

    async fn produce_record_batch(
        &self,
        tp: &TopicPartition,
        batch: RecordBatch,
    ) -> Result<ProduceResponse, LogClientError> {
        let mut remaining = self.collisions_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            drop(remaining);
            // Another node's write lands first; the caller's batch is appended right behind it
            // so that a subsequent catch-up can actually observe a record, but the base offset
            // we report back is deliberately wrong to force a mismatch.
            let real_base = self.inner.produce_record_batch(tp, batch).await?;
            return Ok(ProduceResponse {
                base_offset: real_base.base_offset + 1,
            });
        }
        drop(remaining);
        self.inner.produce_record_batch(tp, batch).await
    }

    fn make_fetch_batch_reader(
        &self,
        tp: &TopicPartition,
        start_offset: Offset,
        end_offset: Offset,
    ) -> BoxStream<'static, Result<FetchedRecord, LogClientError>> {
        self.inner.make_fetch_batch_reader(tp, start_offset, end_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{encode_record, Record, RecordKey};
    use registry_types::{NodeId, SubjectName};

    fn schema_key_record(seq: Offset) -> Record {
        Record {
            key: RecordKey::DeleteSubject(codec::DeleteSubjectKey {
                seq,
                node: NodeId::new("n1"),
                subject: SubjectName::new("s1"),
            }),
            value: None,
        }
    }

    #[tokio::test]
    async fn produce_then_fetch_round_trips() {
        test_helpers::maybe_start_logging();
        let client = MockLogClient::new();
        let tp = TopicPartition::internal_topic();

        let encoded = encode_record(&schema_key_record(0)).unwrap();
        let resp = client.produce_record_batch(&tp, vec![encoded]).await.unwrap();
        assert_eq!(resp.base_offset, 0);

        let offsets = client.list_offsets(&tp).await.unwrap();
        assert_eq!(offsets.offset, 1);

        let mut stream = client.make_fetch_batch_reader(&tp, 0, 1);
        let fetched = stream.next().await.unwrap().unwrap();
        assert_eq!(fetched.offset, 0);
    }

    #[tokio::test]
    async fn racing_client_reports_wrong_offset_once() {
        test_helpers::maybe_start_logging();
        let inner = MockLogClient::new();
        let racing = RacingLogClient::new(inner, 1);
        let tp = TopicPartition::internal_topic();

        let encoded = encode_record(&schema_key_record(0)).unwrap();
        let first = racing.produce_record_batch(&tp, vec![encoded.clone()]).await.unwrap();
        assert_eq!(first.base_offset, 1, "collision inflates the reported offset by one");

        let second = racing.produce_record_batch(&tp, vec![encoded]).await.unwrap();
        assert_eq!(second.base_offset, 1, "real offset once the injected collision is spent");
    }
}
