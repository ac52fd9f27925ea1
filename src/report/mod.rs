//! # Reporting
//!
//! The reporter sink receives finished spans in the zipkin v2 wire shape.
//! Shipping them (batching, transport, retries) is the reporter's concern,
//! not the tracer's: the tracer calls `report` synchronously on the
//! finishing thread and swallows failures, so implementations are expected
//! to buffer rather than block.

pub mod model;

mod in_memory;

pub use in_memory::InMemoryReporter;

use std::fmt;

use crate::error::{ReportError, ReportResult};
use crate::internal_logging::trace_info;

/// Sink for finished spans.
pub trait SpanReporter: Send + Sync + fmt::Debug + fmt::Display {
    /// Accept a finished span. Errors are logged at debug level by the
    /// tracer and never reach the code that finished the span.
    fn report(&self, span: model::Span) -> ReportResult;

    /// True for the recognized do-nothing reporter, letting the tracer skip
    /// wire conversion entirely.
    fn is_noop(&self) -> bool {
        false
    }
}

/// A reporter that drops every span.
///
/// Recognized by the tracer: spans are not converted to the wire shape, and
/// factory methods return no-op spans unless a finished-span handler needs
/// them.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter {
    _private: (),
}

impl NoopReporter {
    /// Create a no-op reporter.
    pub fn new() -> Self {
        NoopReporter::default()
    }
}

impl fmt::Display for NoopReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoopReporter{{}}")
    }
}

impl SpanReporter for NoopReporter {
    fn report(&self, _span: model::Span) -> ReportResult {
        Ok(())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Default reporter, logging spans as JSON through `tracing`.
///
/// Installed when no reporter is configured so instrumentation has a
/// visible effect out of the box.
#[derive(Clone, Debug)]
pub struct LoggingReporter {
    name: &'static str,
}

impl Default for LoggingReporter {
    fn default() -> Self {
        LoggingReporter {
            name: concat!(env!("CARGO_PKG_NAME"), "::Tracer"),
        }
    }
}

impl LoggingReporter {
    /// Create the default logging reporter.
    pub fn new() -> Self {
        LoggingReporter::default()
    }
}

impl fmt::Display for LoggingReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoggingReporter{{name={}}}", self.name)
    }
}

impl SpanReporter for LoggingReporter {
    fn report(&self, span: model::Span) -> ReportResult {
        let encoded = serde_json::to_string(&span).map_err(|e| ReportError::Other(Box::new(e)))?;
        trace_info!(name: "LoggingReporter.Report", span = encoded);
        Ok(())
    }
}
