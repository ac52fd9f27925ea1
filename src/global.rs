//! # Tracing
//!
//! [`Tracing`] owns the configured pipeline and hands out [`Tracer`]s. A
//! process usually builds one instance at startup, optionally installs it
//! as the process-wide current instance, and closes it on shutdown.

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::current::{CurrentTraceContext, ThreadLocalCurrentTraceContext};
use crate::handler::{FinishedSpanHandler, FinishedSpanHandlers, SpanConverter, Terminal};
use crate::id_generator::{IdGenerator, RandomIdGenerator};
use crate::internal_logging::trace_warn;
use crate::propagation::{B3Propagation, PropagationFactory};
use crate::recorder::Recorder;
use crate::report::model::Endpoint;
use crate::report::{LoggingReporter, SpanReporter};
use crate::sampler::{AlwaysSampler, Sampler};
use crate::tracer::Tracer;

static CURRENT_TRACING: Lazy<RwLock<Option<Tracing>>> = Lazy::new(|| RwLock::new(None));

/// Service name applied when neither a name nor an endpoint is configured.
const DEFAULT_SERVICE_NAME: &str = "unknown";

/// An instance of the tracing pipeline.
///
/// Clones share the same pipeline; dropping clones has no effect on it.
#[derive(Clone)]
pub struct Tracing {
    inner: Arc<TracingInner>,
}

struct TracingInner {
    tracer: Tracer,
}

impl Tracing {
    /// Start configuring a new instance.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The process-wide instance, if one was installed.
    pub fn current() -> Option<Tracing> {
        CURRENT_TRACING
            .read()
            .ok()
            .and_then(|current| current.clone())
    }

    /// Install this instance process-wide. Returns false (and logs) when
    /// another instance is already installed.
    pub fn install(&self) -> bool {
        match CURRENT_TRACING.write() {
            Ok(mut current) => {
                if current.is_some() {
                    trace_warn!(name: "Tracing.InstallIgnored");
                    return false;
                }
                *current = Some(self.clone());
                true
            }
            Err(_) => false,
        }
    }

    /// A tracer backed by this instance's pipeline.
    pub fn tracer(&self) -> Tracer {
        self.inner.tracer.clone()
    }

    /// When true, factory methods return no-op spans and nothing is
    /// recorded or reported, without touching instrumentation.
    pub fn is_noop(&self) -> bool {
        self.inner.tracer.noop.load(Ordering::Relaxed)
    }

    /// Flip the kill switch shared by every tracer of this instance.
    pub fn set_noop(&self, noop: bool) {
        self.inner.tracer.noop.store(noop, Ordering::Relaxed);
    }

    /// Tear down: spans created afterwards are no-ops, and the process-wide
    /// slot is freed if this instance occupied it.
    pub fn close(&self) {
        self.set_noop(true);
        if let Ok(mut current) = CURRENT_TRACING.write() {
            let installed_here = current
                .as_ref()
                .is_some_and(|installed| Arc::ptr_eq(&installed.inner, &self.inner));
            if installed_here {
                *current = None;
            }
        }
    }
}

impl fmt::Debug for Tracing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracing")
            .field("tracer", &self.inner.tracer)
            .finish()
    }
}

/// Configures and builds a [`Tracing`] instance.
///
/// Capability-driven normalization happens in [`build`](Builder::build):
/// a propagation factory that requires 128-bit trace ids forces them on,
/// and one that cannot represent shared spans forces join off.
pub struct Builder {
    local_service_name: Option<String>,
    local_endpoint: Option<Endpoint>,
    reporter: Option<Box<dyn SpanReporter>>,
    sampler: Box<dyn Sampler>,
    propagation_factory: Arc<dyn PropagationFactory>,
    current_trace_context: Arc<dyn CurrentTraceContext>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    trace_id_128bit: bool,
    supports_join: bool,
    finished_span_handlers: Vec<Box<dyn FinishedSpanHandler>>,
    always_report_spans: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            local_service_name: None,
            local_endpoint: None,
            reporter: None,
            sampler: Box::new(AlwaysSampler),
            propagation_factory: Arc::new(B3Propagation::new()),
            current_trace_context: Arc::new(ThreadLocalCurrentTraceContext::new()),
            id_generator: Arc::new(RandomIdGenerator::default()),
            clock: Arc::new(SystemClock::new()),
            trace_id_128bit: false,
            supports_join: true,
            finished_span_handlers: Vec::new(),
            always_report_spans: false,
        }
    }
}

impl Builder {
    /// Lower-case label of this node in the service graph, e.g. "favstar".
    /// Ignored when an explicit local endpoint is set.
    pub fn with_local_service_name(mut self, local_service_name: impl Into<String>) -> Self {
        self.local_service_name = Some(local_service_name.into());
        self
    }

    /// The network context of this node, stamped on every reported span.
    pub fn with_local_endpoint(mut self, local_endpoint: Endpoint) -> Self {
        self.local_endpoint = Some(local_endpoint);
        self
    }

    /// Sink for finished spans. Defaults to [`LoggingReporter`]; pass
    /// [`NoopReporter`](crate::report::NoopReporter) to drop spans without
    /// conversion overhead.
    pub fn with_reporter(mut self, reporter: Box<dyn SpanReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sampling policy for new traces. Defaults to always sample.
    pub fn with_sampler<S: Sampler + 'static>(mut self, sampler: S) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Propagation plugin consulted on every new or joined context.
    pub fn with_propagation_factory(mut self, factory: Arc<dyn PropagationFactory>) -> Self {
        self.propagation_factory = factory;
        self
    }

    /// How the current span is tracked. Defaults to a thread-local slot.
    pub fn with_current_trace_context(
        mut self,
        current_trace_context: Arc<dyn CurrentTraceContext>,
    ) -> Self {
        self.current_trace_context = current_trace_context;
        self
    }

    /// Source of trace and span ids.
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Source of span timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Generate 128-bit trace ids on new traces.
    pub fn with_trace_id_128bit(mut self, trace_id_128bit: bool) -> Self {
        self.trace_id_128bit = trace_id_128bit;
        self
    }

    /// Whether `join_span` reuses the incoming span id. When false, joins
    /// create children instead.
    pub fn with_supports_join(mut self, supports_join: bool) -> Self {
        self.supports_join = supports_join;
        self
    }

    /// Append a hook run once per finished span, in registration order.
    pub fn with_finished_span_handler(mut self, handler: Box<dyn FinishedSpanHandler>) -> Self {
        self.finished_span_handlers.push(handler);
        self
    }

    /// Report spans to the sink even when unsampled or when a vetoing
    /// handler chain ran to completion. Intended for tests and local
    /// debugging.
    pub fn with_always_report_spans(mut self, always_report_spans: bool) -> Self {
        self.always_report_spans = always_report_spans;
        self
    }

    /// Normalize the configuration and build the instance.
    pub fn build(self) -> Tracing {
        let trace_id_128bit =
            self.trace_id_128bit || self.propagation_factory.requires_128bit_trace_id();
        let supports_join = self.supports_join && self.propagation_factory.supports_join();

        let local_endpoint = self.local_endpoint.unwrap_or_else(|| {
            Endpoint::new(
                self.local_service_name
                    .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_owned()),
                None,
            )
        });

        let terminal = match self.reporter {
            None => Terminal::Report(SpanConverter::new(
                local_endpoint,
                Box::new(LoggingReporter::new()),
            )),
            Some(reporter) if reporter.is_noop() => Terminal::Noop,
            Some(reporter) => Terminal::Report(SpanConverter::new(local_endpoint, reporter)),
        };

        let handlers = FinishedSpanHandlers::new(
            self.finished_span_handlers,
            terminal,
            self.always_report_spans,
        );
        let always_sample_local = handlers.always_sample_local();
        let handlers_noop = handlers.is_noop();

        let tracer = Tracer {
            sampler: self.sampler,
            propagation_factory: self.propagation_factory,
            current_trace_context: self.current_trace_context,
            id_generator: self.id_generator,
            recorder: Arc::new(Recorder::new(self.clock, handlers)),
            noop: Arc::new(AtomicBool::new(false)),
            supports_join,
            trace_id_128bit,
            always_sample_local,
            always_report_spans: self.always_report_spans,
            handlers_noop,
        };

        Tracing {
            inner: Arc::new(TracingInner { tracer }),
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("local_service_name", &self.local_service_name)
            .field("local_endpoint", &self.local_endpoint)
            .field("trace_id_128bit", &self.trace_id_128bit)
            .field("supports_join", &self.supports_join)
            .field("always_report_spans", &self.always_report_spans)
            .finish()
    }
}
