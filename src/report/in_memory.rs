use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{ReportError, ReportResult};
use crate::report::{model, SpanReporter};

/// A reporter that stores finished spans in memory.
///
/// Useful for tests and debugging: spans are appended in finish order and
/// can be retrieved with [`get_finished_spans`](InMemoryReporter::get_finished_spans).
/// Cloning shares the underlying store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReporter {
    spans: Arc<Mutex<Vec<model::Span>>>,
}

impl InMemoryReporter {
    /// Create an empty in-memory reporter.
    pub fn new() -> Self {
        InMemoryReporter::default()
    }

    /// Returns the finished spans reported so far.
    pub fn get_finished_spans(&self) -> Result<Vec<model::Span>, ReportError> {
        let spans = self
            .spans
            .lock()
            .map(|spans_guard| spans_guard.clone())
            .map_err(ReportError::from)?;
        Ok(spans)
    }

    /// Clears the internal storage of finished spans.
    pub fn reset(&self) {
        let _ = self.spans.lock().map(|mut spans_guard| spans_guard.clear());
    }
}

impl fmt::Display for InMemoryReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InMemoryReporter{{}}")
    }
}

impl SpanReporter for InMemoryReporter {
    fn report(&self, span: model::Span) -> ReportResult {
        let mut spans = self.spans.lock().map_err(ReportError::from)?;
        spans.push(span);
        Ok(())
    }
}
