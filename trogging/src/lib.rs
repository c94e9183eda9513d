//! Assembles a [`tracing_subscriber`] pipeline from a small, `clap`-friendly [`LoggingConfig`],
//! switching between `logfmt` and JSON output the way the rest of the ambient stack expects.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::io;

use logfmt::LogFmtLayer;
use observability_deps::tracing::Subscriber;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

/// Output format for emitted log lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ArgEnum))]
pub enum LogFormat {
    /// `key=value` pairs, one line per event (the default; cheap to grep).
    Logfmt,
    /// Structured JSON, one object per line.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Logfmt
    }
}

/// Logging configuration surface, meant to be flattened into a binary's `clap::Parser`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct LoggingConfig {
    /// Log output format.
    #[cfg_attr(
        feature = "clap",
        clap(long = "log-format", env = "LOG_FORMAT", default_value = "logfmt")
    )]
    pub log_format: LogFormat,

    /// `tracing_subscriber` env-filter directive string, e.g. `info,sequenced_writer=debug`.
    #[cfg_attr(
        feature = "clap",
        clap(long = "log-filter", env = "LOG_FILTER", default_value = "info")
    )]
    pub log_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
        }
    }
}

/// Builds and installs the global `tracing` subscriber described by `config`.
///
/// Returns an error if a global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Error> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()));

    let registry = Registry::default().with(filter);

    match config.log_format {
        LogFormat::Logfmt => registry
            .with(LogFmtLayer::new(io::stdout()))
            .try_init()
            .map_err(|source| Error::AlreadyInitialized { source })?,
        LogFormat::Json => registry
            .with(fmt::layer().json())
            .try_init()
            .map_err(|source| Error::AlreadyInitialized { source })?,
    };

    Ok(())
}

/// Builds a `tracing` [`Layer`] for tests that want logs captured without installing a global
/// subscriber (mirrors `test_helpers`'s init-once helper).
pub fn test_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer().with_test_writer()
}

/// Errors raised while assembling the logging pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A global `tracing` subscriber was already installed by this process.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized {
        /// The underlying `tracing_subscriber` error.
        source: tracing_subscriber::util::TryInitError,
    },
}
