//! Pending-span table: accumulates mutations between start and finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::clock::Clock;
use crate::context::TraceContext;
use crate::handler::{FinishedSpanHandlers, MutableSpan};

/// Owns every in-flight [`MutableSpan`], keyed by its context.
///
/// Spans are created lazily on first mutation and removed at finish, flush
/// or abandon. A context that is already gone makes finish a no-op, which
/// is how double finish stays harmless.
pub(crate) struct Recorder {
    clock: Arc<dyn Clock>,
    handlers: FinishedSpanHandlers,
    pending: Mutex<HashMap<TraceContext, MutableSpan>>,
}

impl Recorder {
    pub(crate) fn new(clock: Arc<dyn Clock>, handlers: FinishedSpanHandlers) -> Self {
        Recorder {
            clock,
            handlers,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn handlers(&self) -> &FinishedSpanHandlers {
        &self.handlers
    }

    /// Run a mutation against the pending span for `context`, creating the
    /// record if this is the first mutation.
    pub(crate) fn with_span<T>(
        &self,
        context: &TraceContext,
        f: impl FnOnce(&mut MutableSpan) -> T,
    ) -> T {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        f(pending.entry(context.clone()).or_default())
    }

    pub(crate) fn start(&self, context: &TraceContext, timestamp: u64) {
        self.with_span(context, |span| span.start_timestamp = Some(timestamp));
    }

    /// Freeze the span and run the finished-span pipeline. Ignored when the
    /// context has no pending record (double finish, or abandon raced it).
    pub(crate) fn finish(&self, context: &TraceContext, finish_timestamp: Option<u64>) {
        let Some(mut span) = self.take(context) else {
            return;
        };
        span.finish_timestamp =
            Some(finish_timestamp.unwrap_or_else(|| self.clock.current_time_micros()));
        self.handlers.handle_finished(context, span);
    }

    /// Report the span as-is, with no finish timestamp and no duration.
    pub(crate) fn flush(&self, context: &TraceContext) {
        let Some(span) = self.take(context) else {
            return;
        };
        self.handlers.handle_finished(context, span);
    }

    /// Drop the pending record without reporting.
    pub(crate) fn abandon(&self, context: &TraceContext) {
        let _ = self.take(context);
    }

    fn take(&self, context: &TraceContext) -> Option<MutableSpan> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(context)
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("clock", &self.clock)
            .field("handlers", &self.handlers)
            .finish()
    }
}
