//! A small metrics registry, modeled on the instrument-per-attribute-set pattern: a [`Metric`]
//! is registered once by name and description, and yields a cheap, clonable recorder per
//! attribute set (e.g. per `op_name`).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

/// A set of key-value pairs identifying one time series of a [`Metric`].
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attributes(BTreeMap<&'static str, String>);

impl Attributes {
    /// Creates an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-value pair, builder-style.
    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }
}

impl<const N: usize> From<[(&'static str, &'static str); N]> for Attributes {
    fn from(pairs: [(&'static str, &'static str); N]) -> Self {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k, v.to_string());
        }
        Self(map)
    }
}

/// A monotonically increasing counter of 64-bit unsigned integers.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Increments the counter by `delta`.
    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns the current value, primarily for tests.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A histogram of observed durations, bucketed lazily by sum/count (enough for this crate's
/// needs: no quantile estimation is exposed outside of tests).
#[derive(Debug, Clone, Default)]
pub struct DurationHistogram(Arc<Mutex<DurationHistogramState>>);

#[derive(Debug, Default)]
struct DurationHistogramState {
    count: u64,
    sum: Duration,
}

impl DurationHistogram {
    /// Records one observed duration.
    pub fn record(&self, value: Duration) {
        let mut state = self.0.lock();
        state.count += 1;
        state.sum += value;
    }

    /// Returns `(count, sum)`, primarily for tests.
    pub fn fetch(&self) -> (u64, Duration) {
        let state = self.0.lock();
        (state.count, state.sum)
    }
}

/// A named, described instrument that yields a recorder per [`Attributes`] set.
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    description: &'static str,
    recorders: Mutex<BTreeMap<Attributes, T>>,
}

impl<T> Metric<T>
where
    T: Clone + Default,
{
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            recorders: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns (creating if necessary) the recorder for `attributes`.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T {
        self.recorders
            .lock()
            .entry(attributes.into())
            .or_default()
            .clone()
    }

    /// The metric's registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The metric's registered human-readable description.
    pub fn description(&self) -> &'static str {
        self.description
    }
}

/// Central registry of all metrics exposed by a process. Cloning is cheap: it shares the
/// underlying storage.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Vec<&'static str>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (and returns) a new metric. Calling this twice with the same name creates two
    /// independent instruments; callers are expected to register each metric exactly once,
    /// typically at startup, and hold onto the returned [`Metric`].
    pub fn register_metric<T>(&self, name: &'static str, description: &'static str) -> Metric<T>
    where
        T: Clone + Default,
    {
        self.inner.lock().push(name);
        Metric::new(name, description)
    }

    /// Names of every metric registered so far, primarily for tests and `/metrics`-style
    /// introspection endpoints that live outside this core.
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_recorder_is_shared_per_attribute_set() {
        let registry = Registry::new();
        let metric = registry.register_metric::<U64Counter>("retries", "retry attempts");

        let a = metric.recorder(Attributes::new().with("op", "write_subject_version"));
        let b = metric.recorder(Attributes::new().with("op", "write_subject_version"));
        let c = metric.recorder(Attributes::new().with("op", "write_config"));

        a.inc();
        b.inc();
        c.inc();

        assert_eq!(a.fetch(), 2);
        assert_eq!(c.fetch(), 1);
    }

    #[test]
    fn histogram_tracks_count_and_sum() {
        let registry = Registry::new();
        let metric = registry.register_metric::<DurationHistogram>("produce_latency", "produce call latency");
        let h = metric.recorder(Attributes::new());

        h.record(Duration::from_millis(10));
        h.record(Duration::from_millis(20));

        let (count, sum) = h.fetch();
        assert_eq!(count, 2);
        assert_eq!(sum, Duration::from_millis(30));
    }
}
