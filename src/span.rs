//! # Span
//!
//! The user-facing recording API. A span handle is either real (backed by a
//! pending record in the recorder) or a no-op that carries identity but
//! records nothing; both expose the same surface, so instrumentation never
//! branches on the sampling decision.

use std::fmt;
use std::sync::Arc;

use crate::context::TraceContext;
use crate::current::Scope;
use crate::recorder::Recorder;
use crate::report::model::Endpoint;

/// How a span participated in an RPC or messaging exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Started a request to a server.
    Client,
    /// Handled a request from a client.
    Server,
    /// Sent a message to a broker.
    Producer,
    /// Received a message from a broker.
    Consumer,
}

/// A handle to one unit of work in a trace.
///
/// Handles are values: cloning one yields another handle to the same
/// pending record, and two handles are equal when their contexts are.
#[derive(Clone)]
pub enum Span {
    /// A recording span.
    Real(RealSpan),
    /// Identity without recording: mutations are dropped, `context`
    /// round-trips.
    Noop(NoopSpan),
}

impl Span {
    /// Identity of this span, preserved on no-op handles.
    pub fn context(&self) -> &TraceContext {
        match self {
            Span::Real(span) => &span.context,
            Span::Noop(span) => &span.context,
        }
    }

    /// True when mutations are dropped.
    pub fn is_noop(&self) -> bool {
        matches!(self, Span::Noop(_))
    }

    /// Set the start timestamp from the clock.
    pub fn start(&self) -> &Self {
        if let Span::Real(span) = self {
            let timestamp = span.recorder.clock().current_time_micros();
            span.recorder.start(&span.context, timestamp);
        }
        self
    }

    /// Set an explicit start timestamp, in epoch microseconds.
    pub fn start_with_timestamp(&self, timestamp: u64) -> &Self {
        if let Span::Real(span) = self {
            span.recorder.start(&span.context, timestamp);
        }
        self
    }

    /// Set the operation name.
    pub fn name(&self, name: impl Into<String>) -> &Self {
        if let Span::Real(span) = self {
            span.recorder
                .with_span(&span.context, |s| s.set_name(name.into()));
        }
        self
    }

    /// Set the span kind.
    pub fn kind(&self, kind: Kind) -> &Self {
        if let Span::Real(span) = self {
            span.recorder.with_span(&span.context, |s| s.set_kind(kind));
        }
        self
    }

    /// Set a tag; the last write for a key wins.
    pub fn tag(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        if let Span::Real(span) = self {
            span.recorder
                .with_span(&span.context, |s| s.set_tag(key.into(), value.into()));
        }
        self
    }

    /// Add an event at the current time.
    pub fn annotate(&self, value: impl Into<String>) -> &Self {
        if let Span::Real(span) = self {
            let timestamp = span.recorder.clock().current_time_micros();
            span.recorder
                .with_span(&span.context, |s| s.annotate(timestamp, value.into()));
        }
        self
    }

    /// Add an event at an explicit time, in epoch microseconds.
    pub fn annotate_at(&self, timestamp: u64, value: impl Into<String>) -> &Self {
        if let Span::Real(span) = self {
            span.recorder
                .with_span(&span.context, |s| s.annotate(timestamp, value.into()));
        }
        self
    }

    /// Record an error message.
    pub fn error(&self, message: impl Into<String>) -> &Self {
        if let Span::Real(span) = self {
            span.recorder
                .with_span(&span.context, |s| s.set_error(message.into()));
        }
        self
    }

    /// Set the remote side of the connection.
    pub fn remote_endpoint(&self, endpoint: Endpoint) -> &Self {
        if let Span::Real(span) = self {
            span.recorder
                .with_span(&span.context, |s| s.set_remote_endpoint(endpoint));
        }
        self
    }

    /// Finish with a timestamp from the clock. Idempotent.
    pub fn finish(&self) {
        if let Span::Real(span) = self {
            span.recorder.finish(&span.context, None);
        }
    }

    /// Finish at an explicit time, in epoch microseconds. Idempotent.
    pub fn finish_with_timestamp(&self, timestamp: u64) {
        if let Span::Real(span) = self {
            span.recorder.finish(&span.context, Some(timestamp));
        }
    }

    /// Report the span as-is, even though it isn't finished: no finish
    /// timestamp and no duration. Used when work hands off to another
    /// process.
    pub fn flush(&self) {
        if let Span::Real(span) = self {
            span.recorder.flush(&span.context);
        }
    }

    /// Drop the pending record without reporting anything.
    pub fn abandon(&self) {
        if let Span::Real(span) = self {
            span.recorder.abandon(&span.context);
        }
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.context() == other.context()
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Span::Real(span) => f
                .debug_struct("RealSpan")
                .field("context", &span.context)
                .finish(),
            Span::Noop(span) => f
                .debug_struct("NoopSpan")
                .field("context", &span.context)
                .finish(),
        }
    }
}

/// The recording variant of [`Span`].
#[derive(Clone)]
pub struct RealSpan {
    context: TraceContext,
    recorder: Arc<Recorder>,
}

impl RealSpan {
    pub(crate) fn new(context: TraceContext, recorder: Arc<Recorder>) -> Self {
        RealSpan { context, recorder }
    }
}

/// The non-recording variant of [`Span`].
#[derive(Clone)]
pub struct NoopSpan {
    context: TraceContext,
}

impl NoopSpan {
    pub(crate) fn new(context: TraceContext) -> Self {
        NoopSpan { context }
    }
}

/// Write access to the current span without owning its lifecycle.
///
/// Handed out by [`Tracer::current_span_customizer`]; the no-op variant
/// applies when nothing is in scope, the current span isn't recording, or
/// the tracer is globally no-op.
///
/// [`Tracer::current_span_customizer`]: crate::Tracer::current_span_customizer
#[derive(Clone, Debug)]
pub enum SpanCustomizer {
    /// Writes through to the current span's pending record.
    Real(RealSpanCustomizer),
    /// Drops every mutation.
    Noop,
}

impl SpanCustomizer {
    /// True when mutations are dropped.
    pub fn is_noop(&self) -> bool {
        matches!(self, SpanCustomizer::Noop)
    }

    /// Set the operation name.
    pub fn name(&self, name: impl Into<String>) -> &Self {
        if let SpanCustomizer::Real(customizer) = self {
            customizer
                .recorder
                .with_span(&customizer.context, |s| s.set_name(name.into()));
        }
        self
    }

    /// Set a tag.
    pub fn tag(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        if let SpanCustomizer::Real(customizer) = self {
            customizer
                .recorder
                .with_span(&customizer.context, |s| s.set_tag(key.into(), value.into()));
        }
        self
    }

    /// Add an event at the current time.
    pub fn annotate(&self, value: impl Into<String>) -> &Self {
        if let SpanCustomizer::Real(customizer) = self {
            let timestamp = customizer.recorder.clock().current_time_micros();
            customizer
                .recorder
                .with_span(&customizer.context, |s| s.annotate(timestamp, value.into()));
        }
        self
    }
}

/// The recording variant of [`SpanCustomizer`].
#[derive(Clone)]
pub struct RealSpanCustomizer {
    context: TraceContext,
    recorder: Arc<Recorder>,
}

impl RealSpanCustomizer {
    pub(crate) fn new(context: TraceContext, recorder: Arc<Recorder>) -> Self {
        RealSpanCustomizer { context, recorder }
    }
}

impl fmt::Debug for RealSpanCustomizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealSpanCustomizer")
            .field("context", &self.context)
            .finish()
    }
}

/// A span that is also current until finished.
///
/// Created by [`Tracer::start_scoped_span`]; `finish` finalizes the span
/// and closes its scope. The scope also closes when the handle is dropped
/// on an early exit, though the record then stays pending until something
/// finishes or abandons it.
///
/// [`Tracer::start_scoped_span`]: crate::Tracer::start_scoped_span
#[derive(Debug)]
pub enum ScopedSpan {
    /// A recording scoped span.
    Real(RealScopedSpan),
    /// A scoped span with identity but no recording.
    Noop(NoopScopedSpan),
}

impl ScopedSpan {
    /// Identity of this span.
    pub fn context(&self) -> &TraceContext {
        match self {
            ScopedSpan::Real(span) => &span.context,
            ScopedSpan::Noop(span) => &span.context,
        }
    }

    /// True when mutations are dropped.
    pub fn is_noop(&self) -> bool {
        matches!(self, ScopedSpan::Noop(_))
    }

    /// Set a tag on the span.
    pub fn tag(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        if let ScopedSpan::Real(span) = self {
            span.recorder
                .with_span(&span.context, |s| s.set_tag(key.into(), value.into()));
        }
        self
    }

    /// Add an event at the current time.
    pub fn annotate(&self, value: impl Into<String>) -> &Self {
        if let ScopedSpan::Real(span) = self {
            let timestamp = span.recorder.clock().current_time_micros();
            span.recorder
                .with_span(&span.context, |s| s.annotate(timestamp, value.into()));
        }
        self
    }

    /// Record an error message.
    pub fn error(&self, message: impl Into<String>) -> &Self {
        if let ScopedSpan::Real(span) = self {
            span.recorder
                .with_span(&span.context, |s| s.set_error(message.into()));
        }
        self
    }

    /// Finish the span and close its scope.
    pub fn finish(self) {
        match self {
            ScopedSpan::Real(span) => {
                span.recorder.finish(&span.context, None);
                span.scope.close();
            }
            ScopedSpan::Noop(span) => span.scope.close(),
        }
    }
}

/// The recording variant of [`ScopedSpan`].
pub struct RealScopedSpan {
    context: TraceContext,
    recorder: Arc<Recorder>,
    scope: Scope,
}

impl RealScopedSpan {
    pub(crate) fn new(context: TraceContext, recorder: Arc<Recorder>, scope: Scope) -> Self {
        RealScopedSpan {
            context,
            recorder,
            scope,
        }
    }
}

impl fmt::Debug for RealScopedSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealScopedSpan")
            .field("context", &self.context)
            .finish()
    }
}

/// The non-recording variant of [`ScopedSpan`].
#[derive(Debug)]
pub struct NoopScopedSpan {
    context: TraceContext,
    scope: Scope,
}

impl NoopScopedSpan {
    pub(crate) fn new(context: TraceContext, scope: Scope) -> Self {
        NoopScopedSpan { context, scope }
    }
}

/// Guard making a span current until dropped or closed.
///
/// Returned by [`Tracer::with_span_in_scope`]; restores the previous
/// current span on every exit path. Scopes must unwind in LIFO order.
///
/// [`Tracer::with_span_in_scope`]: crate::Tracer::with_span_in_scope
#[derive(Debug)]
pub struct SpanInScope {
    scope: Scope,
}

impl SpanInScope {
    pub(crate) fn new(scope: Scope) -> Self {
        SpanInScope { scope }
    }

    /// Restore the previous current span now instead of at drop.
    pub fn close(self) {
        self.scope.close();
    }
}
