//! # FinishedSpanHandler
//!
//! Hooks invoked on the finishing thread, once per finished span, before
//! anything is reported. Handlers run in registration order and may read or
//! mutate the span, veto it, or declare that spans should be recorded
//! locally regardless of the remote sampling decision.

use std::fmt;

use crate::context::TraceContext;
use crate::internal_logging::trace_debug;
use crate::report::model::{self, Endpoint};
use crate::report::SpanReporter;
use crate::span::Kind;

/// Recorder state for one span, frozen when the span finishes.
///
/// Exclusively owned by the tracer until finish; handlers receive it by
/// mutable borrow and user code only reaches it through `Span` handles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutableSpan {
    pub(crate) name: Option<String>,
    pub(crate) kind: Option<Kind>,
    pub(crate) start_timestamp: Option<u64>,
    pub(crate) finish_timestamp: Option<u64>,
    pub(crate) annotations: Vec<(u64, String)>,
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) local_endpoint: Option<Endpoint>,
    pub(crate) remote_endpoint: Option<Endpoint>,
    pub(crate) error: Option<String>,
}

impl MutableSpan {
    /// The operation name, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Replace the operation name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// The RPC or messaging role, if set.
    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    /// Replace the span kind.
    pub fn set_kind(&mut self, kind: Kind) {
        self.kind = Some(kind);
    }

    /// Epoch microseconds when the span started, if started.
    pub fn start_timestamp(&self) -> Option<u64> {
        self.start_timestamp
    }

    /// Epoch microseconds when the span finished; absent on flushed spans.
    pub fn finish_timestamp(&self) -> Option<u64> {
        self.finish_timestamp
    }

    /// Timestamped events, in recording order.
    pub fn annotations(&self) -> &[(u64, String)] {
        &self.annotations
    }

    /// Add a timestamped event.
    pub fn annotate(&mut self, timestamp: u64, value: impl Into<String>) {
        self.annotations.push((timestamp, value.into()));
    }

    /// Tags, in first-insertion order.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Lookup a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Set a tag; the last write for a key wins, keeping its position.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.tags.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.tags.push((key, value)),
        }
    }

    /// The host that recorded this span, when overriding the tracer default.
    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.local_endpoint.as_ref()
    }

    /// Override the local endpoint for this span.
    pub fn set_local_endpoint(&mut self, endpoint: Endpoint) {
        self.local_endpoint = Some(endpoint);
    }

    /// The other side of the connection, when known.
    pub fn remote_endpoint(&self) -> Option<&Endpoint> {
        self.remote_endpoint.as_ref()
    }

    /// Set the remote side of the connection.
    pub fn set_remote_endpoint(&mut self, endpoint: Endpoint) {
        self.remote_endpoint = Some(endpoint);
    }

    /// The error message, if the span failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Record an error message; becomes the `error` tag unless one exists.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }
}

/// Hook run once per finished span.
///
/// Returning `false` vetoes the span: later handlers don't run and nothing
/// is reported. `always_sample_local` lets a handler see spans the remote
/// sampler dropped, e.g. for local aggregation.
pub trait FinishedSpanHandler: Send + Sync + fmt::Debug {
    /// Process a finished span. Return `false` to drop it.
    fn handle(&self, context: &TraceContext, span: &mut MutableSpan) -> bool;

    /// When true, spans are recorded and passed to this handler even when
    /// not sampled remotely.
    fn always_sample_local(&self) -> bool {
        false
    }
}

/// The ordered pipeline a finished span runs through: user handlers first,
/// then conversion and reporting unless vetoed or unsampled.
pub(crate) struct FinishedSpanHandlers {
    handlers: Vec<Box<dyn FinishedSpanHandler>>,
    terminal: Terminal,
    always_report_spans: bool,
}

pub(crate) enum Terminal {
    /// A recognized no-op reporter: skip conversion entirely.
    Noop,
    Report(SpanConverter),
}

/// Converts finished spans to the wire shape and hands them to the sink.
pub(crate) struct SpanConverter {
    local_endpoint: Endpoint,
    reporter: Box<dyn SpanReporter>,
}

impl SpanConverter {
    pub(crate) fn new(local_endpoint: Endpoint, reporter: Box<dyn SpanReporter>) -> Self {
        SpanConverter {
            local_endpoint,
            reporter,
        }
    }

    fn report(&self, context: &TraceContext, span: MutableSpan) {
        let wire_span = model::into_report_span(&self.local_endpoint, context, span);
        if let Err(error) = self.reporter.report(wire_span) {
            // never surfaces to the span's finisher
            trace_debug!(name: "Reporter.ReportFailed", error = error.to_string());
        }
    }
}

impl FinishedSpanHandlers {
    pub(crate) fn new(
        handlers: Vec<Box<dyn FinishedSpanHandler>>,
        terminal: Terminal,
        always_report_spans: bool,
    ) -> Self {
        FinishedSpanHandlers {
            handlers,
            terminal,
            always_report_spans,
        }
    }

    /// True when no hook or reporter would ever observe a span.
    pub(crate) fn is_noop(&self) -> bool {
        self.handlers.is_empty() && matches!(self.terminal, Terminal::Noop)
    }

    /// True when any handler wants unsampled spans recorded locally.
    pub(crate) fn always_sample_local(&self) -> bool {
        self.handlers
            .iter()
            .any(|handler| handler.always_sample_local())
    }

    pub(crate) fn handle_finished(&self, context: &TraceContext, mut span: MutableSpan) {
        let mut vetoed = false;
        for handler in &self.handlers {
            if !handler.handle(context, &mut span) {
                vetoed = true;
                if !self.always_report_spans {
                    return;
                }
            }
        }
        if vetoed {
            return;
        }
        if context.sampled() == Some(true) || self.always_report_spans {
            if let Terminal::Report(converter) = &self.terminal {
                converter.report(context, span);
            }
        }
    }
}

impl fmt::Display for FinishedSpanHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.terminal {
            Terminal::Report(converter) => fmt::Display::fmt(&converter.reporter, f),
            Terminal::Noop => write!(f, "NoopReporter{{}}"),
        }
    }
}

impl fmt::Debug for FinishedSpanHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishedSpanHandlers")
            .field("handlers", &self.handlers)
            .field("noop", &self.is_noop())
            .finish()
    }
}
