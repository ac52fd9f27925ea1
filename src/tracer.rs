//! # Tracer
//!
//! The tracer manufactures spans: brand new traces, children of a parent,
//! and server-side spans joined onto an incoming client span. It reconciles
//! whatever identity arrived from upstream with the local sampling policy,
//! tracks which span is current on the calling thread, and routes finished
//! spans through the handler pipeline to the reporter.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::{merge_extra, Extra, TraceContext};
use crate::current::CurrentTraceContext;
use crate::id_generator::IdGenerator;
use crate::propagation::{ExtractedContext, Extraction, PropagationFactory, SamplingFlags};
use crate::recorder::Recorder;
use crate::sampler::Sampler;
use crate::span::{
    NoopScopedSpan, NoopSpan, RealScopedSpan, RealSpan, RealSpanCustomizer, ScopedSpan, Span,
    SpanCustomizer, SpanInScope,
};

/// Creates and finalizes spans. Obtained from [`Tracing`](crate::Tracing).
///
/// Cheap to clone: clones share the recorder, the current-span state and the
/// no-op switch. Safe to use from many threads.
#[derive(Clone)]
pub struct Tracer {
    pub(crate) sampler: Box<dyn Sampler>,
    pub(crate) propagation_factory: Arc<dyn PropagationFactory>,
    pub(crate) current_trace_context: Arc<dyn CurrentTraceContext>,
    pub(crate) id_generator: Arc<dyn IdGenerator>,
    pub(crate) recorder: Arc<Recorder>,
    pub(crate) noop: Arc<AtomicBool>,
    pub(crate) supports_join: bool,
    pub(crate) trace_id_128bit: bool,
    pub(crate) always_sample_local: bool,
    pub(crate) always_report_spans: bool,
    pub(crate) handlers_noop: bool,
}

impl Tracer {
    /// Explicitly start a new trace: the returned span is a root, and the
    /// local root of everything derived from it in this process.
    pub fn new_trace(&self) -> Span {
        let context = self.new_root_context(SamplingFlags::EMPTY, Vec::new());
        self.to_span_internal(context)
    }

    /// Continue an incoming span on its own span id: the result shares
    /// identifiers with `context` and is flagged `shared`, pairing the
    /// server record with the client record upstream.
    ///
    /// Falls back to [`new_child`](Tracer::new_child) when the propagation
    /// format cannot represent a shared span.
    pub fn join_span(&self, context: &TraceContext) -> Span {
        if !self.supports_join {
            return self.new_child(context);
        }
        let sampled = self.decide(context.sampled(), context.debug(), context.trace_id());
        let local_root_id = if context.local_root_id() != 0 {
            context.local_root_id()
        } else {
            context.span_id()
        };
        let joined = context
            .to_builder()
            .shared(true)
            .sampled(sampled)
            .local_root_id(local_root_id)
            .build_unchecked();
        let joined = self.decorate(joined);
        self.to_span_internal(joined)
    }

    /// Create a span whose parent is `parent`.
    pub fn new_child(&self, parent: &TraceContext) -> Span {
        let child = self.new_child_context(parent, &[]);
        self.to_span_internal(child)
    }

    /// Create a child of the current span, or a new trace when nothing is
    /// in scope.
    pub fn next_span(&self) -> Span {
        match self.current_trace_context.get() {
            Some(parent) => self.new_child(&parent),
            None => self.new_trace(),
        }
    }

    /// Create a span continuing whatever an extractor recovered upstream.
    ///
    /// With only sampling flags, this behaves like [`next_span`]: a child
    /// of the current span (merging any extracted extras onto it) or a new
    /// trace honoring the flags. A bare trace id starts a fresh local root
    /// on that trace; a full context gets child semantics.
    ///
    /// [`next_span`]: Tracer::next_span
    pub fn next_span_with(&self, extracted: ExtractedContext) -> Span {
        let context = match extracted.value() {
            Extraction::Flags(flags) => match self.current_trace_context.get() {
                Some(parent) => self.new_child_context(&parent, extracted.extra()),
                None => self.new_root_context(*flags, extracted.extra().to_vec()),
            },
            Extraction::TraceId(trace_id_context) => {
                let span_id = self.id_generator.next_id();
                let sampled = self.decide(
                    trace_id_context.sampled(),
                    trace_id_context.debug(),
                    trace_id_context.trace_id(),
                );
                let context = TraceContext::builder()
                    .trace_id_high(trace_id_context.trace_id_high())
                    .trace_id(trace_id_context.trace_id())
                    .span_id(span_id)
                    .sampled(sampled)
                    .debug(trace_id_context.debug())
                    .local_root_id(span_id)
                    .extra(extracted.extra().to_vec())
                    .build_unchecked();
                self.decorate(context)
            }
            Extraction::Context(parent) => self.new_child_context(parent, extracted.extra()),
        };
        self.to_span_internal(context)
    }

    /// Wrap an existing context in a span handle. Real when the context
    /// records in this tracer, otherwise a no-op preserving the identity.
    pub fn to_span(&self, context: &TraceContext) -> Span {
        self.to_span_internal(context.clone())
    }

    /// Make `span` (or, for `None`, no span at all) current until the
    /// returned guard closes; the previous entry is then restored.
    ///
    /// A `None` scope hides an outer span: within it, [`current_span`]
    /// returns `None` and the customizer is the no-op.
    ///
    /// [`current_span`]: Tracer::current_span
    pub fn with_span_in_scope(&self, span: Option<&Span>) -> SpanInScope {
        let context = span.map(|span| span.context().clone());
        SpanInScope::new(self.current_trace_context.new_scope(context))
    }

    /// Start a span that is also current until finished: a child of the
    /// current span, or a new trace when nothing is in scope.
    pub fn start_scoped_span(&self, name: impl Into<String>) -> ScopedSpan {
        self.start_scoped_span_with_parent(name, None)
    }

    /// Like [`start_scoped_span`], with an explicit parent taking
    /// precedence over the current span.
    ///
    /// [`start_scoped_span`]: Tracer::start_scoped_span
    pub fn start_scoped_span_with_parent(
        &self,
        name: impl Into<String>,
        parent: Option<&TraceContext>,
    ) -> ScopedSpan {
        let context = match parent.cloned().or_else(|| self.current_trace_context.get()) {
            Some(parent) => self.new_child_context(&parent, &[]),
            None => self.new_root_context(SamplingFlags::EMPTY, Vec::new()),
        };
        let scope = self.current_trace_context.new_scope(Some(context.clone()));
        if self.is_noop(&context) {
            return ScopedSpan::Noop(NoopScopedSpan::new(context, scope));
        }
        let name = name.into();
        let timestamp = self.recorder.clock().current_time_micros();
        self.recorder.with_span(&context, |span| {
            span.set_name(name);
            span.start_timestamp = Some(timestamp);
        });
        ScopedSpan::Real(RealScopedSpan::new(context, self.recorder.clone(), scope))
    }

    /// The span current on this thread, if any.
    pub fn current_span(&self) -> Option<Span> {
        self.current_trace_context
            .get()
            .map(|context| self.to_span_internal(context))
    }

    /// Write access to the current span, or the no-op customizer when
    /// nothing is in scope, the current span isn't recording, or the tracer
    /// is globally no-op.
    pub fn current_span_customizer(&self) -> SpanCustomizer {
        match self.current_trace_context.get() {
            Some(context) if !self.is_noop(&context) => SpanCustomizer::Real(
                RealSpanCustomizer::new(context, self.recorder.clone()),
            ),
            _ => SpanCustomizer::Noop,
        }
    }

    /// A view of this tracer that uses `sampler` for new decisions and
    /// shares everything else.
    pub fn with_sampler<S: Sampler + 'static>(&self, sampler: S) -> Tracer {
        let mut tracer = self.clone();
        tracer.sampler = Box::new(sampler);
        tracer
    }

    fn new_root_context(&self, flags: SamplingFlags, extra: Vec<Extra>) -> TraceContext {
        let span_id = self.id_generator.next_id();
        let trace_id_high = if self.trace_id_128bit {
            self.id_generator.next_id()
        } else {
            0
        };
        let trace_id = self.id_generator.next_id();
        let sampled = self.decide(flags.sampled(), flags.debug(), trace_id);
        let context = TraceContext::builder()
            .trace_id_high(trace_id_high)
            .trace_id(trace_id)
            .span_id(span_id)
            .sampled(sampled)
            .debug(flags.debug())
            .local_root_id(span_id)
            .extra(extra)
            .build_unchecked();
        self.decorate(context)
    }

    fn new_child_context(&self, parent: &TraceContext, extracted_extra: &[Extra]) -> TraceContext {
        let span_id = self.id_generator.next_id();
        let sampled = self.decide(parent.sampled(), parent.debug(), parent.trace_id());
        let local_root_id = if parent.local_root_id() != 0 {
            parent.local_root_id()
        } else {
            span_id
        };
        let child = TraceContext::builder()
            .trace_id_high(parent.trace_id_high())
            .trace_id(parent.trace_id())
            .parent_id(parent.span_id())
            .span_id(span_id)
            .sampled(sampled)
            .sampled_local(parent.sampled_local())
            .debug(parent.debug())
            .local_root_id(local_root_id)
            .extra(merge_extra(parent.extra(), extracted_extra))
            .build_unchecked();
        self.decorate(child)
    }

    /// Resolve a pending sampling decision. Debug wins; an upstream
    /// decision is honored; otherwise the sampler decides from the trace id.
    fn decide(&self, sampled: Option<bool>, debug: bool, trace_id: u64) -> Option<bool> {
        if debug {
            return Some(true);
        }
        match sampled {
            Some(decision) => Some(decision),
            None => Some(self.sampler.is_sampled(trace_id)),
        }
    }

    fn decorate(&self, context: TraceContext) -> TraceContext {
        let context = if self.always_sample_local && !context.sampled_local() {
            context.to_builder().sampled_local(true).build_unchecked()
        } else {
            context
        };
        self.propagation_factory.decorate(context)
    }

    fn to_span_internal(&self, context: TraceContext) -> Span {
        if self.is_noop(&context) {
            Span::Noop(NoopSpan::new(context))
        } else {
            Span::Real(RealSpan::new(context, self.recorder.clone()))
        }
    }

    /// True when a span for `context` would record nothing.
    fn is_noop(&self, context: &TraceContext) -> bool {
        if self.noop.load(Ordering::Relaxed) || self.handlers_noop {
            return true;
        }
        if self.always_report_spans {
            return false;
        }
        !(context.sampled() == Some(true)
            || context.sampled_local()
            || context.debug()
            || self.always_sample_local)
    }
}

impl fmt::Display for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tracer{{")?;
        if let Some(context) = self.current_trace_context.get() {
            write!(f, "currentSpan={context}, ")?;
        }
        if self.noop.load(Ordering::Relaxed) {
            write!(f, "noop=true, ")?;
        }
        write!(f, "finishedSpanHandler={}}}", self.recorder.handlers())
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("noop", &self.noop.load(Ordering::Relaxed))
            .field("supports_join", &self.supports_join)
            .field("trace_id_128bit", &self.trace_id_128bit)
            .field("finished_span_handler", &self.recorder.handlers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FakeClock;
    use crate::handler::{FinishedSpanHandler, MutableSpan};
    use crate::propagation::{FieldsPropagation, TraceIdContext};
    use crate::report::{InMemoryReporter, NoopReporter, SpanReporter};
    use crate::sampler::NeverSampler;
    use crate::span::Kind;
    use crate::{report::model, Builder, Tracing};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn test_builder() -> Builder {
        Tracing::builder()
            .with_local_service_name("my-service")
            .with_clock(Arc::new(FakeClock::default()))
    }

    fn test_tracer() -> (Tracer, InMemoryReporter) {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder().with_reporter(Box::new(reporter.clone())).build();
        (tracing.tracer(), reporter)
    }

    #[test]
    fn new_trace_is_root_span() {
        let (tracer, _) = test_tracer();
        let span = tracer.new_trace();

        assert!(!span.is_noop());
        assert_eq!(span.context().parent_id(), None);
        assert_eq!(span.context().local_root_id(), span.context().span_id());
    }

    #[test]
    fn new_trace_trace_id_128bit() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder()
            .with_reporter(Box::new(reporter))
            .with_trace_id_128bit(true)
            .build();

        let context = tracing.tracer().new_trace().context().clone();
        assert_ne!(context.trace_id_high(), 0);
        assert_eq!(context.trace_id_string().len(), 32);
    }

    #[test]
    fn new_trace_not_sampled_is_noop() {
        let (tracer, _) = test_tracer();
        let tracer = tracer.with_sampler(NeverSampler);

        assert!(tracer.new_trace().is_noop());
    }

    #[test]
    fn join_sets_shared() {
        let (tracer, _) = test_tracer();
        let from_incoming_request = tracer.new_trace().context().clone();

        let joined = tracer.join_span(&from_incoming_request).context().clone();
        assert!(joined.shared());
        assert_eq!(joined.trace_id(), from_incoming_request.trace_id());
        assert_eq!(joined.span_id(), from_incoming_request.span_id());
        assert_eq!(joined.parent_id(), from_incoming_request.parent_id());
        assert_eq!(joined.sampled(), from_incoming_request.sampled());
    }

    /// Data from loopback requests should be partitioned into two spans: one
    /// for the client and the other for the server.
    #[test]
    fn join_shared_data_is_separate() {
        let (tracer, reporter) = test_tracer();

        let client_side = tracer.new_trace();
        client_side.kind(Kind::Client).start_with_timestamp(1);
        let server_side = tracer.join_span(client_side.context());
        server_side.kind(Kind::Server).start_with_timestamp(2);
        server_side.finish_with_timestamp(3);
        client_side.finish_with_timestamp(4);

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);

        // same span id on both halves
        let span_id = spans[0].id().unwrap().to_owned();
        assert_eq!(spans[1].id(), Some(span_id.as_str()));

        assert_eq!(
            (spans[0].kind(), spans[0].shared(), spans[0].timestamp(), spans[0].duration()),
            (Some(model::Kind::Server), Some(true), Some(2), Some(1))
        );
        assert_eq!(
            (spans[1].kind(), spans[1].shared(), spans[1].timestamp(), spans[1].duration()),
            (Some(model::Kind::Client), None, Some(1), Some(3))
        );
    }

    #[test]
    fn join_creates_child_when_unsupported() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder()
            .with_reporter(Box::new(reporter))
            .with_supports_join(false)
            .build();
        let tracer = tracing.tracer();

        let from_incoming_request = tracer.new_trace().context().clone();

        let should_be_child = tracer.join_span(&from_incoming_request).context().clone();
        assert!(!should_be_child.shared());
        assert_eq!(
            should_be_child.parent_id(),
            Some(from_incoming_request.span_id())
        );
    }

    #[derive(Debug)]
    struct NoJoinPropagation;

    impl crate::propagation::PropagationFactory for NoJoinPropagation {
        fn supports_join(&self) -> bool {
            false
        }
    }

    #[test]
    fn join_creates_child_when_unsupported_by_propagation() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder()
            .with_reporter(Box::new(reporter))
            .with_propagation_factory(Arc::new(NoJoinPropagation))
            .build();
        let tracer = tracing.tracer();

        let from_incoming_request = tracer.new_trace().context().clone();

        let should_be_child = tracer.join_span(&from_incoming_request).context().clone();
        assert!(!should_be_child.shared());
        assert_eq!(
            should_be_child.parent_id(),
            Some(from_incoming_request.span_id())
        );
    }

    #[test]
    fn join_noop() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder().with_reporter(Box::new(reporter)).build();
        let tracer = tracing.tracer();
        let from_incoming_request = tracer.new_trace().context().clone();

        tracing.set_noop(true);

        assert!(tracer.join_span(&from_incoming_request).is_noop());
    }

    #[test]
    fn join_noop_reporter() {
        let tracing = test_builder()
            .with_reporter(Box::new(NoopReporter::new()))
            .build();
        let tracer = tracing.tracer();
        let from_incoming_request = tracer.new_trace().context().clone();

        let joined = tracer.join_span(&from_incoming_request);
        // context is sampled, but we aren't recording
        assert_eq!(joined.context().sampled(), Some(true));
        assert!(joined.is_noop());
    }

    #[test]
    fn join_ensures_sampling() {
        let (tracer, _) = test_tracer();
        let not_yet_sampled = tracer
            .new_trace()
            .context()
            .to_builder()
            .sampled(None)
            .build()
            .unwrap();

        let joined = tracer.join_span(&not_yet_sampled).context().clone();
        assert_eq!(joined.sampled(), Some(true));
    }

    #[test]
    fn new_child_ensures_sampling() {
        let (tracer, _) = test_tracer();
        let not_yet_sampled = tracer
            .new_trace()
            .context()
            .to_builder()
            .sampled(None)
            .build()
            .unwrap();

        assert_eq!(
            tracer.new_child(&not_yet_sampled).context().sampled(),
            Some(true)
        );
    }

    #[test]
    fn next_span_ensures_sampling_when_creating_new_child() {
        let (tracer, _) = test_tracer();
        let not_yet_sampled = tracer
            .new_trace()
            .context()
            .to_builder()
            .sampled(None)
            .build()
            .unwrap();

        let extracted = ExtractedContext::from_context(not_yet_sampled);
        assert_eq!(
            tracer.next_span_with(extracted).context().sampled(),
            Some(true)
        );
    }

    #[test]
    fn to_span() {
        let (tracer, _) = test_tracer();
        let context = tracer.new_trace().context().clone();

        let span = tracer.to_span(&context);
        assert!(!span.is_noop());
        assert_eq!(span.context(), &context);
    }

    #[test]
    fn to_span_noop() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder().with_reporter(Box::new(reporter)).build();
        let tracer = tracing.tracer();
        let context = tracer.new_trace().context().clone();

        tracing.set_noop(true);

        assert!(tracer.to_span(&context).is_noop());
    }

    #[test]
    fn to_span_noop_reporter() {
        let tracing = test_builder()
            .with_reporter(Box::new(NoopReporter::new()))
            .build();
        let tracer = tracing.tracer();
        let context = tracer.new_trace().context().clone();

        let span = tracer.to_span(&context);
        // context is sampled, but we aren't recording
        assert_eq!(span.context().sampled(), Some(true));
        assert!(span.is_noop());
    }

    #[test]
    fn to_span_sampled_local_is_not_noop() {
        let (tracer, _) = test_tracer();
        let sampled_local = tracer
            .new_trace()
            .context()
            .to_builder()
            .sampled(false)
            .sampled_local(true)
            .build()
            .unwrap();

        assert!(!tracer.to_span(&sampled_local).is_noop());
    }

    #[test]
    fn to_span_not_sampled_is_noop() {
        let (tracer, _) = test_tracer();
        let not_sampled = tracer
            .new_trace()
            .context()
            .to_builder()
            .sampled(false)
            .build()
            .unwrap();

        let span = tracer.to_span(&not_sampled);
        assert!(span.is_noop());
        // identity round-trips through the no-op handle
        assert_eq!(span.context(), &not_sampled);
    }

    #[test]
    fn new_child() {
        let (tracer, _) = test_tracer();
        let parent = tracer.new_trace().context().clone();

        let child = tracer.new_child(&parent);
        assert!(!child.is_noop());
        assert_eq!(child.context().trace_id(), parent.trace_id());
        assert_eq!(child.context().parent_id(), Some(parent.span_id()));
    }

    /// A child span is not sharing a span id with its parent by definition.
    #[test]
    fn new_child_isnt_shared() {
        let (tracer, _) = test_tracer();
        let parent = tracer.new_trace().context().clone();

        assert!(!tracer.new_child(&parent).context().shared());
    }

    #[test]
    fn new_child_noop() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder().with_reporter(Box::new(reporter)).build();
        let tracer = tracing.tracer();
        let parent = tracer.new_trace().context().clone();

        tracing.set_noop(true);

        assert!(tracer.new_child(&parent).is_noop());
    }

    #[test]
    fn new_child_not_sampled_is_noop() {
        let (tracer, _) = test_tracer();
        let not_sampled = tracer
            .new_trace()
            .context()
            .to_builder()
            .sampled(false)
            .build()
            .unwrap();

        assert!(tracer.new_child(&not_sampled).is_noop());
    }

    #[test]
    fn current_span_defaults_to_none() {
        let (tracer, _) = test_tracer();
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn current_span_customizer_defaults_to_noop() {
        let (tracer, _) = test_tracer();
        assert!(tracer.current_span_customizer().is_noop());
    }

    #[test]
    fn current_span_customizer_noop_when_not_sampled() {
        let (tracer, _) = test_tracer();
        let tracer = tracer.with_sampler(NeverSampler);

        let parent = tracer.start_scoped_span("parent");
        assert!(tracer.current_span_customizer().is_noop());
        parent.finish();
    }

    #[test]
    fn current_span_customizer_noop_reporter() {
        let tracing = test_builder()
            .with_reporter(Box::new(NoopReporter::new()))
            .build();
        let tracer = tracing.tracer();

        let parent = tracer.start_scoped_span("parent");
        assert!(tracer.current_span_customizer().is_noop());
        parent.finish();
    }

    #[test]
    fn current_span_customizer_real_when_sampled() {
        let (tracer, _) = test_tracer();

        let parent = tracer.start_scoped_span("parent");
        assert!(!tracer.current_span_customizer().is_noop());
        parent.finish();
    }

    #[test]
    fn next_span_defaults_to_make_new_trace() {
        let (tracer, _) = test_tracer();
        assert_eq!(tracer.next_span().context().parent_id(), None);
    }

    #[test]
    fn next_span_makes_child_of_current() {
        let (tracer, _) = test_tracer();
        let parent = tracer.new_trace();

        let scope = tracer.with_span_in_scope(Some(&parent));
        assert_eq!(
            tracer.next_span().context().parent_id(),
            Some(parent.context().span_id())
        );
        scope.close();
    }

    #[test]
    fn next_span_extracted_nothing_makes_child_of_current() {
        let (tracer, _) = test_tracer();
        let parent = tracer.new_trace();

        let scope = tracer.with_span_in_scope(Some(&parent));
        let next_span = tracer.next_span_with(ExtractedContext::empty());
        assert_eq!(
            next_span.context().parent_id(),
            Some(parent.context().span_id())
        );
        scope.close();
    }

    #[test]
    fn next_span_extracted_nothing_defaults_to_make_new_trace() {
        let (tracer, _) = test_tracer();
        let next_span = tracer.next_span_with(ExtractedContext::empty());

        assert_eq!(next_span.context().parent_id(), None);
    }

    #[test]
    fn next_span_extracted_flags_are_honored() {
        let (tracer, _) = test_tracer();

        let not_sampled =
            tracer.next_span_with(ExtractedContext::from_flags(SamplingFlags::NOT_SAMPLED));
        assert_eq!(not_sampled.context().sampled(), Some(false));

        let debug = tracer.next_span_with(ExtractedContext::from_flags(SamplingFlags::DEBUG));
        assert!(debug.context().debug());
        assert_eq!(debug.context().sampled(), Some(true));
    }

    #[test]
    fn next_span_extracted_extra_new_trace() {
        let (tracer, _) = test_tracer();
        let bundle: Extra = Arc::new(1u64);
        let extracted = ExtractedContext::empty().add_extra(bundle.clone());

        let context = tracer.next_span_with(extracted).context().clone();
        assert_eq!(context.extra().len(), 1);
        assert!(Arc::ptr_eq(&context.extra()[0], &bundle));
    }

    #[test]
    fn next_span_extracted_extra_child_of_current() {
        let (tracer, _) = test_tracer();
        let parent = tracer.new_trace();
        let bundle: Extra = Arc::new(1u64);
        let extracted = ExtractedContext::empty().add_extra(bundle.clone());

        let scope = tracer.with_span_in_scope(Some(&parent));
        let context = tracer.next_span_with(extracted).context().clone();
        scope.close();

        assert_eq!(context.extra().len(), 1);
        assert!(Arc::ptr_eq(&context.extra()[0], &bundle));
    }

    #[test]
    fn next_span_extracted_extra_appends_to_child_of_current() {
        let (tracer, _) = test_tracer();
        let parent_bundle: Extra = Arc::new(1u64);
        let parent_context = tracer
            .new_trace()
            .context()
            .to_builder()
            .extra(vec![parent_bundle.clone()])
            .build()
            .unwrap();
        let parent = tracer.to_span(&parent_context);

        let extracted_bundle: Extra = Arc::new(1.0f64);
        let extracted = ExtractedContext::empty().add_extra(extracted_bundle.clone());

        let scope = tracer.with_span_in_scope(Some(&parent));
        let context = tracer.next_span_with(extracted).context().clone();
        scope.close();

        // parent's extra first, then the extracted-only entry
        assert_eq!(context.extra().len(), 2);
        assert!(Arc::ptr_eq(&context.extra()[0], &parent_bundle));
        assert!(Arc::ptr_eq(&context.extra()[1], &extracted_bundle));
    }

    #[test]
    fn next_span_extracted_trace_id() {
        let (tracer, _) = test_tracer();
        let extracted = ExtractedContext::from_trace_id(TraceIdContext::new(1));

        let context = tracer.next_span_with(extracted).context().clone();
        assert_eq!(context.trace_id(), 1);
        assert_eq!(context.parent_id(), None);
        assert_eq!(context.local_root_id(), context.span_id());
        // sampler applied since the extraction had no decision
        assert_eq!(context.sampled(), Some(true));
    }

    #[test]
    fn next_span_extracted_trace_id_extra() {
        let (tracer, _) = test_tracer();
        let bundle: Extra = Arc::new(1u64);
        let extracted =
            ExtractedContext::from_trace_id(TraceIdContext::new(1)).add_extra(bundle.clone());

        let context = tracer.next_span_with(extracted).context().clone();
        assert_eq!(context.extra().len(), 1);
        assert!(Arc::ptr_eq(&context.extra()[0], &bundle));
    }

    #[test]
    fn next_span_extracted_trace_context() {
        let (tracer, _) = test_tracer();
        let trace_context = TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .build()
            .unwrap();

        let context = tracer
            .next_span_with(ExtractedContext::from_context(trace_context))
            .context()
            .clone();
        assert_eq!(context.trace_id(), 1);
        assert_eq!(context.parent_id(), Some(2));
    }

    #[test]
    fn next_span_extracted_trace_context_extra() {
        let (tracer, _) = test_tracer();
        let bundle: Extra = Arc::new(1u64);
        let trace_context = TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .build()
            .unwrap();
        let extracted =
            ExtractedContext::from_context(trace_context).add_extra(bundle.clone());

        let context = tracer.next_span_with(extracted).context().clone();
        assert!(context
            .extra()
            .iter()
            .any(|extra| Arc::ptr_eq(extra, &bundle)));
    }

    #[test]
    fn start_scoped_span_is_in_scope() {
        let (tracer, _) = test_tracer();
        let current = tracer.start_scoped_span("foo");
        assert!(!current.is_noop());

        assert_eq!(
            tracer.current_span().map(|span| span.context().clone()),
            Some(current.context().clone())
        );
        assert!(!tracer.current_span_customizer().is_noop());
        current.finish();

        // context was cleared
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn start_scoped_span_noop_is_in_scope() {
        let (tracer, _) = test_tracer();
        let tracer = tracer.with_sampler(NeverSampler);
        let current = tracer.start_scoped_span("foo");
        assert!(current.is_noop());

        assert_eq!(
            tracer.current_span().map(|span| span.context().clone()),
            Some(current.context().clone())
        );
        assert!(tracer.current_span_customizer().is_noop());
        current.finish();

        // context was cleared
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn start_scoped_span_reports_name_and_duration() {
        let (tracer, reporter) = test_tracer();

        let scoped = tracer.start_scoped_span("foo");
        scoped.finish();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].name(), Some("foo"));
        assert!(spans[0].duration().unwrap_or(0) > 0);
    }

    #[test]
    fn with_span_in_scope() {
        let (tracer, _) = test_tracer();
        let current = tracer.new_trace();

        let scope = tracer.with_span_in_scope(Some(&current));
        assert_eq!(tracer.current_span(), Some(current.clone()));
        assert!(!tracer.current_span_customizer().is_noop());
        scope.close();

        // context was cleared
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn with_noop_span_in_scope() {
        let (tracer, _) = test_tracer();
        let current = tracer.with_sampler(NeverSampler).next_span();

        let scope = tracer.with_span_in_scope(Some(&current));
        assert_eq!(tracer.current_span(), Some(current.clone()));
        assert!(tracer.current_span_customizer().is_noop());
        scope.close();

        // context was cleared
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn with_span_in_scope_nested() {
        let (tracer, _) = test_tracer();
        let parent = tracer.new_trace();

        let parent_scope = tracer.with_span_in_scope(Some(&parent));

        let child = tracer.new_child(parent.context());
        let child_scope = tracer.with_span_in_scope(Some(&child));
        assert_eq!(tracer.current_span(), Some(child.clone()));
        child_scope.close();

        // old parent reverted
        assert_eq!(tracer.current_span(), Some(parent.clone()));
        parent_scope.close();
    }

    #[test]
    fn with_span_in_scope_clear() {
        let (tracer, _) = test_tracer();
        let parent = tracer.new_trace();

        let parent_scope = tracer.with_span_in_scope(Some(&parent));
        {
            let clear_scope = tracer.with_span_in_scope(None);
            assert!(tracer.current_span().is_none());
            assert!(tracer.current_span_customizer().is_noop());
            clear_scope.close();
        }

        // old parent reverted
        assert_eq!(tracer.current_span(), Some(parent.clone()));
        parent_scope.close();
    }

    #[test]
    fn to_string_with_span_in_scope() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder().with_reporter(Box::new(reporter)).build();
        let tracer = tracing.tracer();

        let context = TraceContext::builder()
            .trace_id(1)
            .span_id(10)
            .sampled(true)
            .build()
            .unwrap();
        let span = tracer.to_span(&context);
        let scope = tracer.with_span_in_scope(Some(&span));
        assert_eq!(
            tracer.to_string(),
            "Tracer{currentSpan=0000000000000001/000000000000000a, \
             finishedSpanHandler=InMemoryReporter{}}"
        );
        scope.close();
    }

    #[test]
    fn to_string_when_noop() {
        let reporter = InMemoryReporter::new();
        let tracing = test_builder().with_reporter(Box::new(reporter)).build();
        let tracer = tracing.tracer();

        tracing.set_noop(true);

        assert_eq!(
            tracer.to_string(),
            "Tracer{noop=true, finishedSpanHandler=InMemoryReporter{}}"
        );
    }

    #[test]
    fn reporter_has_nice_to_string() {
        let tracing = Tracing::builder().build();

        assert_eq!(
            tracing.tracer().to_string(),
            "Tracer{finishedSpanHandler=LoggingReporter{name=tracekit::Tracer}}"
        );
    }

    #[derive(Debug)]
    struct BadReporter;

    impl fmt::Display for BadReporter {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "BadReporter{{}}")
        }
    }

    impl SpanReporter for BadReporter {
        fn report(&self, _span: model::Span) -> crate::error::ReportResult {
            Err("reporter down".into())
        }
    }

    #[test]
    fn finish_doesnt_crash_on_bad_reporter() {
        let tracing = test_builder().with_reporter(Box::new(BadReporter)).build();
        let tracer = tracing.tracer();

        let span = tracer.new_trace();
        span.start();
        span.finish();
    }

    #[test]
    fn with_sampler_shares_everything_else() {
        let (tracer, reporter) = test_tracer();
        let never = tracer.with_sampler(NeverSampler);

        assert!(never.new_trace().is_noop());

        // the original keeps sampling and reporting through the shared pipeline
        let span = tracer.new_trace();
        span.start();
        span.finish();
        assert_eq!(reporter.get_finished_spans().unwrap().len(), 1);
    }

    fn fields_builder() -> Builder {
        test_builder()
            .with_reporter(Box::new(NoopReporter::new()))
            .with_propagation_factory(Arc::new(FieldsPropagation::new(["service"])))
    }

    #[test]
    fn join_gets_extra_from_propagation_factory() {
        let tracer = fields_builder().build().tracer();

        let context = tracer.next_span().context().clone();
        FieldsPropagation::set(&context, "service", "napkin");

        let joined = tracer.join_span(&context).context().clone();

        assert_eq!(
            FieldsPropagation::get(&joined, "service").as_deref(),
            Some("napkin")
        );
    }

    #[test]
    fn new_child_gets_extra_from_propagation_factory() {
        let tracer = fields_builder().build().tracer();

        let context = tracer.next_span().context().clone();
        FieldsPropagation::set(&context, "service", "napkin");

        let child = tracer.new_child(&context).context().clone();

        assert_eq!(
            FieldsPropagation::get(&child, "service").as_deref(),
            Some("napkin")
        );
    }

    #[test]
    fn next_span_gets_extra_from_propagation_factory() {
        let tracer = fields_builder().build().tracer();

        let parent = tracer.next_span();
        FieldsPropagation::set(parent.context(), "service", "napkin");

        let scope = tracer.with_span_in_scope(Some(&parent));
        let next_span = tracer.next_span().context().clone();
        scope.close();

        assert_eq!(
            FieldsPropagation::get(&next_span, "service").as_deref(),
            Some("napkin")
        );
    }

    #[test]
    fn start_scoped_span_with_parent_gets_extra_from_propagation_factory() {
        let tracer = fields_builder().build().tracer();

        let context = tracer.next_span().context().clone();
        FieldsPropagation::set(&context, "service", "napkin");

        let scoped = tracer.start_scoped_span_with_parent("foo", Some(&context));
        let scoped_context = scoped.context().clone();
        scoped.finish();

        assert_eq!(
            FieldsPropagation::get(&scoped_context, "service").as_deref(),
            Some("napkin")
        );
    }

    #[derive(Debug)]
    struct LocalRootCollector {
        reported_names: Arc<Mutex<BTreeMap<u64, Vec<String>>>>,
    }

    impl FinishedSpanHandler for LocalRootCollector {
        fn handle(&self, context: &TraceContext, span: &mut MutableSpan) -> bool {
            assert_ne!(context.local_root_id(), 0);
            if let Ok(mut reported) = self.reported_names.lock() {
                reported
                    .entry(context.local_root_id())
                    .or_default()
                    .push(span.name().unwrap_or_default().to_owned());
            }
            true // retain
        }

        fn always_sample_local(&self) -> bool {
            true
        }
    }

    /// Runs a mix of join/new_child/next_span/scoped spans under two
    /// incoming contexts and asserts reported names group by local root.
    fn local_root_id_partition(
        entry: impl Fn(&Tracer, &ExtractedContext) -> Span,
        ctx1: ExtractedContext,
        ctx2: ExtractedContext,
    ) {
        let reported_names = Arc::new(Mutex::new(BTreeMap::new()));
        let tracing = test_builder()
            .with_finished_span_handler(Box::new(LocalRootCollector {
                reported_names: reported_names.clone(),
            }))
            .with_reporter(Box::new(NoopReporter::new()))
            .build();
        let tracer = tracing.tracer();

        let server1 = entry(&tracer, &ctx1);
        server1.name("server1").kind(Kind::Server).start();
        let server2 = entry(&tracer, &ctx2);
        server2.name("server2").kind(Kind::Server).start();

        let client1 = tracer.new_child(server1.context());
        client1.name("client1").kind(Kind::Client).start();
        let processor1 = tracer.start_scoped_span_with_parent("processor1", Some(server1.context()));
        let processor2 = tracer.start_scoped_span_with_parent("processor2", Some(server2.context()));

        let client2 = tracer.next_span();
        client2.name("client2").kind(Kind::Client).start();
        client2.finish();
        let client3 = tracer.next_span();
        client3.name("client3").kind(Kind::Client).start();
        client3.finish();

        processor2.finish();
        server2.finish();
        client1.finish();
        processor1.finish();
        server1.finish();

        let reported = reported_names.lock().unwrap();
        let mut groups: Vec<Vec<String>> = reported.values().cloned().collect();
        groups.sort();
        assert_eq!(
            groups,
            vec![
                vec!["client1".to_owned(), "processor1".to_owned(), "server1".to_owned()],
                vec![
                    "client2".to_owned(),
                    "client3".to_owned(),
                    "processor2".to_owned(),
                    "server2".to_owned()
                ],
            ]
        );
    }

    fn incoming_context(span_id: u64, sampled: Option<bool>) -> ExtractedContext {
        ExtractedContext::from_context(
            TraceContext::builder()
                .trace_id(1)
                .span_id(span_id)
                .sampled(sampled)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn local_root_id_join_span_not_yet_sampled() {
        local_root_id_partition(
            |tracer, extracted| match extracted.value() {
                Extraction::Context(context) => tracer.join_span(context),
                _ => unreachable!(),
            },
            incoming_context(2, None),
            incoming_context(3, None),
        );
    }

    #[test]
    fn local_root_id_join_span_not_sampled() {
        local_root_id_partition(
            |tracer, extracted| match extracted.value() {
                Extraction::Context(context) => tracer.join_span(context),
                _ => unreachable!(),
            },
            incoming_context(2, Some(false)),
            incoming_context(3, Some(false)),
        );
    }

    #[test]
    fn local_root_id_join_span_sampled() {
        local_root_id_partition(
            |tracer, extracted| match extracted.value() {
                Extraction::Context(context) => tracer.join_span(context),
                _ => unreachable!(),
            },
            incoming_context(2, Some(true)),
            incoming_context(3, Some(true)),
        );
    }

    #[test]
    fn local_root_id_next_span_contexts() {
        local_root_id_partition(
            |tracer, extracted| tracer.next_span_with(extracted.clone()),
            incoming_context(2, None),
            incoming_context(3, None),
        );
    }

    #[test]
    fn local_root_id_next_span_trace_ids() {
        local_root_id_partition(
            |tracer, extracted| tracer.next_span_with(extracted.clone()),
            ExtractedContext::from_trace_id(TraceIdContext::new(1)),
            ExtractedContext::from_trace_id(TraceIdContext::new(2)),
        );
    }

    #[test]
    fn local_root_id_next_span_trace_ids_not_sampled() {
        local_root_id_partition(
            |tracer, extracted| tracer.next_span_with(extracted.clone()),
            ExtractedContext::from_trace_id(TraceIdContext::new(1).with_sampled(false)),
            ExtractedContext::from_trace_id(TraceIdContext::new(2).with_sampled(false)),
        );
    }

    #[test]
    fn local_root_id_next_span_flags_empty() {
        local_root_id_partition(
            |tracer, extracted| tracer.next_span_with(extracted.clone()),
            ExtractedContext::from_flags(SamplingFlags::EMPTY),
            ExtractedContext::from_flags(SamplingFlags::EMPTY),
        );
    }

    #[test]
    fn local_root_id_next_span_flags_not_sampled() {
        local_root_id_partition(
            |tracer, extracted| tracer.next_span_with(extracted.clone()),
            ExtractedContext::from_flags(SamplingFlags::NOT_SAMPLED),
            ExtractedContext::from_flags(SamplingFlags::NOT_SAMPLED),
        );
    }

    #[test]
    fn local_root_id_next_span_flags_debug() {
        local_root_id_partition(
            |tracer, extracted| tracer.next_span_with(extracted.clone()),
            ExtractedContext::from_flags(SamplingFlags::DEBUG),
            ExtractedContext::from_flags(SamplingFlags::DEBUG),
        );
    }

    #[test]
    fn span_handles_share_the_record() {
        let (tracer, reporter) = test_tracer();
        let span = tracer.new_trace();
        let same = tracer.to_span(span.context());

        span.start_with_timestamp(1);
        same.tag("a", "b");
        span.finish_with_timestamp(3);

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].tag("a"), Some("b"));
        assert_eq!(spans[0].duration(), Some(2));
    }

    #[test]
    fn records_tags_annotations_and_error() {
        let (tracer, reporter) = test_tracer();
        let span = tracer.new_trace();

        span.start_with_timestamp(1);
        span.tag("http.path", "/checkout")
            .annotate_at(2, "retry")
            .error("connection reset");
        span.finish_with_timestamp(3);

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].tag("http.path"), Some("/checkout"));
        assert_eq!(spans[0].tag("error"), Some("connection reset"));
        assert_eq!(spans[0].annotations()[0].timestamp(), 2);
        assert_eq!(spans[0].annotations()[0].value(), "retry");
    }

    #[test]
    fn scoped_span_records_tags_annotations_and_error() {
        let (tracer, reporter) = test_tracer();

        let scoped = tracer.start_scoped_span("foo");
        scoped
            .tag("http.path", "/checkout")
            .annotate("retry")
            .error("connection reset");
        scoped.finish();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].name(), Some("foo"));
        assert_eq!(spans[0].tag("http.path"), Some("/checkout"));
        assert_eq!(spans[0].tag("error"), Some("connection reset"));
        assert_eq!(spans[0].annotations()[0].value(), "retry");
        // annotated after the start timestamp was taken
        assert!(spans[0].annotations()[0].timestamp() > spans[0].timestamp().unwrap());
    }

    #[test]
    fn current_span_customizer_writes_to_current_span() {
        let (tracer, reporter) = test_tracer();
        let span = tracer.new_trace();
        span.start();

        let scope = tracer.with_span_in_scope(Some(&span));
        let customizer = tracer.current_span_customizer();
        assert!(!customizer.is_noop());
        customizer
            .name("renamed")
            .tag("shard", "epsilon")
            .annotate("cache miss");
        scope.close();
        span.finish();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].name(), Some("renamed"));
        assert_eq!(spans[0].tag("shard"), Some("epsilon"));
        assert_eq!(spans[0].annotations()[0].value(), "cache miss");
    }

    #[test]
    fn remote_endpoint_survives_conversion() {
        let (tracer, reporter) = test_tracer();
        let span = tracer.new_trace();

        span.kind(Kind::Client).remote_endpoint(model::Endpoint::new(
            "backend",
            Some("10.0.0.2:9411".parse().unwrap()),
        ));
        span.finish();

        let spans = reporter.get_finished_spans().unwrap();
        let remote = spans[0].remote_endpoint().unwrap();
        assert_eq!(remote.service_name(), Some("backend"));
        assert_eq!(remote.port(), Some(9411));
    }

    #[test]
    fn abandon_reports_nothing() {
        let (tracer, reporter) = test_tracer();
        let span = tracer.new_trace();

        span.start();
        span.abandon();
        span.finish();

        assert!(reporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn flush_reports_without_duration() {
        let (tracer, reporter) = test_tracer();
        let span = tracer.new_trace();

        span.start_with_timestamp(1);
        span.flush();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].timestamp(), Some(1));
        assert_eq!(spans[0].duration(), None);
    }

    #[test]
    fn spans_finish_from_many_threads() {
        let (tracer, reporter) = test_tracer();
        let root = tracer.new_trace();
        root.start();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tracer = tracer.clone();
                let parent = root.context().clone();
                std::thread::spawn(move || {
                    let child = tracer.new_child(&parent);
                    child.name(format!("child{i}")).start();
                    child.finish();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        root.finish();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 5);
        // the root finished last on this thread
        assert_eq!(spans[4].id(), Some(root.context().span_id_string().as_str()));
    }

    #[test]
    fn descendants_inherit_local_root_id() {
        let (tracer, _) = test_tracer();
        let root = tracer.new_trace();
        let root_span_id = root.context().span_id();
        assert_eq!(root.context().local_root_id(), root_span_id);

        let child = tracer.new_child(root.context());
        assert_eq!(child.context().local_root_id(), root_span_id);

        let grandchild = tracer.new_child(child.context());
        assert_eq!(grandchild.context().local_root_id(), root_span_id);

        let joined = tracer.join_span(child.context());
        assert_eq!(joined.context().local_root_id(), root_span_id);
    }
}
