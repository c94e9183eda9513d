//! Time abstraction so tests can control the clock deterministically (e.g. to assert backoff
//! jitter bounds) without making the writer's retry loop itself non-deterministic in production.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A point in time, wrapping a UTC timestamp.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Wraps an existing `chrono` UTC timestamp.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the wrapped `chrono` UTC timestamp.
    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// Duration elapsed since `earlier`, or zero if `earlier` is in the future.
    pub fn checked_duration_since(&self, earlier: Self) -> Option<chrono::Duration> {
        Some(self.0 - earlier.0)
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Supplies the current time. Implemented by [`SystemProvider`] in production and
/// [`MockProvider`] in tests.
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] backed by the operating system clock.
#[derive(Debug, Copy, Clone, Default)]
pub struct SystemProvider;

impl SystemProvider {
    /// Creates a new system-clock time provider.
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a fixed, externally controlled time. Used by tests that need
/// deterministic timestamps.
#[derive(Debug, Clone)]
pub struct MockProvider {
    now: Arc<Mutex<Time>>,
}

impl MockProvider {
    /// Creates a new mock provider starting at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Overwrites the current time.
    pub fn set(&self, time: Time) {
        *self.now.lock() = time;
    }

    /// Advances the current time by `duration`.
    pub fn inc(&self, duration: chrono::Duration) {
        let mut now = self.now.lock();
        *now = Time(now.0 + duration);
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances_on_inc() {
        let start = Time::from_datetime(Utc::now());
        let mock = MockProvider::new(start);
        mock.inc(chrono::Duration::seconds(5));
        assert_eq!(
            mock.now().checked_duration_since(start),
            Some(chrono::Duration::seconds(5))
        );
    }
}
