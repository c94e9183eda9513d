//! Small test-only utilities shared across the workspace's crates: once-only logging setup and
//! (optionally) a timeout wrapper for futures that must not hang.
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::sync::Once;

static LOG_SETUP: Once = Once::new();

/// Installs a `tracing` subscriber suitable for `cargo test` output, once per process. Safe to
/// call from every test; subsequent calls are no-ops.
pub fn maybe_start_logging() {
    LOG_SETUP.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(feature = "future_timeout")]
mod timeout {
    use std::{future::Future, time::Duration};

    /// Awaits `fut`, panicking if it does not resolve within `duration`. Useful for guarding
    /// against a test that would otherwise hang forever on a deadlocked permit.
    pub async fn timeout<F: Future>(duration: Duration, fut: F) -> F::Output {
        tokio::time::timeout(duration, fut)
            .await
            .expect("future did not complete within timeout")
    }
}

#[cfg(feature = "future_timeout")]
pub use timeout::timeout;
