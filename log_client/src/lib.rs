//! The Log Client interface the sequenced writer depends on, plus an in-memory mock
//! implementation used by tests (a real deployment wires in a Kafka-compatible client such as
//! `rdkafka`/`rskafka` behind the same trait).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod core;
pub mod mock;

pub use crate::core::{
    FetchedRecord, LogClient, LogClientError, LogClientErrorKind, PartitionOffset, ProduceResponse,
    TopicPartition,
};
