//! A crate wrapper for tracing dependencies, to ensure consistent versions across the
//! workspace and to give a single place to update when pulling in a new observability stack.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

pub use tracing;
