//! A [`tracing_subscriber::Layer`] that writes events out in [logfmt] format.
//!
//! [logfmt]: https://www.brandur.org/logfmt
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::{
    fmt::Write as _,
    io::Write,
    sync::{Arc, Mutex},
};

use observability_deps::tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{
    layer::Context,
    registry::LookupSpan,
    Layer,
};

/// A [`tracing_subscriber::Layer`] that writes out logfmt formatted events (`key=value`
/// pairs, one line per event).
#[derive(Debug, Clone)]
pub struct LogFmtLayer<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> LogFmtLayer<W>
where
    W: Write + 'static,
{
    /// Creates a new layer that writes formatted lines to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

impl<S, W> Layer<S> for LogFmtLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = String::new();
        let meta = event.metadata();

        let _ = write!(line, "level={}", level_str(*meta.level()));
        let _ = write!(line, " target={}", quote_if_needed(meta.target()));

        let mut visitor = FieldVisitor { out: &mut line };
        event.record(&mut visitor);

        line.push('\n');

        if let Ok(mut w) = self.writer.lock() {
            let _ = w.write_all(line.as_bytes());
        }
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Quotes `s` with `"..."` if it contains whitespace or an `=`, matching the logfmt convention
/// that bare tokens cannot contain either.
fn quote_if_needed(s: &str) -> String {
    if s.chars().any(|c| c.is_whitespace() || c == '=' || c == '"') {
        format!("{:?}", s)
    } else {
        s.to_string()
    }
}

struct FieldVisitor<'a> {
    out: &'a mut String,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(
            self.out,
            " {}={}",
            field.name(),
            quote_if_needed(&format!("{:?}", value))
        );
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        let _ = write!(self.out, " {}={}", field.name(), quote_if_needed(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let _ = write!(self.out, " {}={}", field.name(), value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let _ = write!(self.out, " {}={}", field.name(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let _ = write!(self.out, " {}={}", field.name(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct VecWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn quoting_bare_tokens_is_unquoted() {
        assert_eq!(quote_if_needed("s1"), "s1");
        assert_eq!(quote_if_needed("has space"), "\"has space\"");
    }
}
