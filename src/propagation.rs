//! # Propagation
//!
//! Types carrying trace identity across process boundaries, and the factory
//! capability that lets propagation plugins decorate new contexts. Concrete
//! wire codecs (header formats) live outside the core: an extractor hands
//! the tracer an [`ExtractedContext`], which is as much or as little as the
//! incoming request carried.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::context::{Extra, TraceContext};

/// Sampling intent without trace identifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplingFlags {
    sampled: Option<bool>,
    debug: bool,
}

impl SamplingFlags {
    /// No sampling decision was made upstream.
    pub const EMPTY: SamplingFlags = SamplingFlags {
        sampled: None,
        debug: false,
    };

    /// Upstream decided to sample.
    pub const SAMPLED: SamplingFlags = SamplingFlags {
        sampled: Some(true),
        debug: false,
    };

    /// Upstream decided not to sample.
    pub const NOT_SAMPLED: SamplingFlags = SamplingFlags {
        sampled: Some(false),
        debug: false,
    };

    /// Upstream forced the trace. Implies sampled.
    pub const DEBUG: SamplingFlags = SamplingFlags {
        sampled: Some(true),
        debug: true,
    };

    /// The sampling decision, `None` when not yet decided.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// True on a forced trace.
    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// An incoming trace id without a span id, as some header formats send only
/// the trace identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceIdContext {
    trace_id_high: u64,
    trace_id: u64,
    sampled: Option<bool>,
    debug: bool,
}

impl TraceIdContext {
    /// Create from the low 64 bits of the trace id.
    pub fn new(trace_id: u64) -> Self {
        TraceIdContext {
            trace_id_high: 0,
            trace_id,
            sampled: None,
            debug: false,
        }
    }

    /// Set the high 64 bits for a 128-bit trace id.
    pub fn with_trace_id_high(mut self, trace_id_high: u64) -> Self {
        self.trace_id_high = trace_id_high;
        self
    }

    /// Attach an upstream sampling decision.
    pub fn with_sampled(mut self, sampled: impl Into<Option<bool>>) -> Self {
        self.sampled = sampled.into();
        self
    }

    /// Mark the trace as forced.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// High 64 bits of the trace id, zero for 64-bit traces.
    pub fn trace_id_high(&self) -> u64 {
        self.trace_id_high
    }

    /// Low 64 bits of the trace id.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// The sampling decision, `None` when not yet decided.
    pub fn sampled(&self) -> Option<bool> {
        if self.debug {
            Some(true)
        } else {
            self.sampled
        }
    }

    /// True on a forced trace.
    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// What an extractor recovered from an incoming request.
#[derive(Clone, Debug)]
pub enum Extraction {
    /// Only sampling flags (possibly empty) were present.
    Flags(SamplingFlags),
    /// A trace id without a span id.
    TraceId(TraceIdContext),
    /// A complete parent context.
    Context(TraceContext),
}

/// Union of an [`Extraction`] and any extra bundles the extractor decoded,
/// handed to [`Tracer::next_span_with`](crate::Tracer::next_span_with).
#[derive(Clone)]
pub struct ExtractedContext {
    value: Extraction,
    extra: Vec<Extra>,
}

impl ExtractedContext {
    /// An extraction that found nothing.
    pub fn empty() -> Self {
        ExtractedContext::from_flags(SamplingFlags::EMPTY)
    }

    /// Extraction carrying only sampling flags.
    pub fn from_flags(flags: SamplingFlags) -> Self {
        ExtractedContext {
            value: Extraction::Flags(flags),
            extra: Vec::new(),
        }
    }

    /// Extraction carrying a trace id without a span id.
    pub fn from_trace_id(trace_id_context: TraceIdContext) -> Self {
        ExtractedContext {
            value: Extraction::TraceId(trace_id_context),
            extra: Vec::new(),
        }
    }

    /// Extraction carrying a complete parent context.
    pub fn from_context(context: TraceContext) -> Self {
        ExtractedContext {
            value: Extraction::Context(context),
            extra: Vec::new(),
        }
    }

    /// Append a bundle decoded by the extractor.
    pub fn add_extra(mut self, extra: Extra) -> Self {
        self.extra.push(extra);
        self
    }

    /// The populated variant.
    pub fn value(&self) -> &Extraction {
        &self.value
    }

    /// Bundles decoded alongside the identifiers.
    pub fn extra(&self) -> &[Extra] {
        &self.extra
    }

    /// Sampling intent of whichever variant is populated.
    pub fn sampling_flags(&self) -> SamplingFlags {
        match &self.value {
            Extraction::Flags(flags) => *flags,
            Extraction::TraceId(trace_id_context) => SamplingFlags {
                sampled: trace_id_context.sampled(),
                debug: trace_id_context.debug(),
            },
            Extraction::Context(context) => SamplingFlags {
                sampled: context.sampled(),
                debug: context.debug(),
            },
        }
    }
}

impl fmt::Debug for ExtractedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedContext")
            .field("value", &self.value)
            .field("extra", &self.extra.len())
            .finish()
    }
}

/// Capability used by the tracer on every new or joined context.
///
/// A factory declares whether the wire format can represent a shared span
/// (`supports_join`) and whether it needs 128-bit trace ids, and gets the
/// chance to attach or rewrite extra bundles via `decorate`.
pub trait PropagationFactory: Send + Sync + fmt::Debug {
    /// False when the wire format cannot carry a shared span id, in which
    /// case `join_span` degrades to `new_child`.
    fn supports_join(&self) -> bool {
        true
    }

    /// True when the wire format requires 128-bit trace ids.
    fn requires_128bit_trace_id(&self) -> bool {
        false
    }

    /// Called on every context that leaves the tracer.
    fn decorate(&self, context: TraceContext) -> TraceContext {
        context
    }
}

/// Default factory for the B3 header family: joinable, 64-bit ids, no
/// decoration.
#[derive(Clone, Debug, Default)]
pub struct B3Propagation {
    _private: (),
}

impl B3Propagation {
    /// Create the default propagation factory.
    pub fn new() -> Self {
        B3Propagation::default()
    }
}

impl PropagationFactory for B3Propagation {}

/// Propagates named string fields alongside trace identifiers.
///
/// Declare the allowed field names up front; `decorate` attaches a
/// [`Fields`] bundle to each local root, and descendants share that bundle
/// by reference, so a value set anywhere in the chain is visible everywhere.
#[derive(Clone, Debug)]
pub struct FieldsPropagation {
    field_names: Arc<[String]>,
}

impl FieldsPropagation {
    /// Create a factory propagating the given field names.
    pub fn new<I, S>(field_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldsPropagation {
            field_names: field_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Read a field from any context decorated by this factory.
    pub fn get(context: &TraceContext, name: &str) -> Option<String> {
        context.find_extra::<Fields>()?.get(name)
    }

    /// Write a field, visible to every context sharing the bundle. Returns
    /// false when the context has no bundle or the name was not declared.
    pub fn set(context: &TraceContext, name: &str, value: impl Into<String>) -> bool {
        match context.find_extra::<Fields>() {
            Some(fields) => fields.set(name, value.into()),
            None => false,
        }
    }
}

impl PropagationFactory for FieldsPropagation {
    fn decorate(&self, context: TraceContext) -> TraceContext {
        if context.find_extra::<Fields>().is_some() {
            return context;
        }
        context.with_extra(Arc::new(Fields::new(self.field_names.clone())))
    }
}

/// The state bundle attached by [`FieldsPropagation`].
#[derive(Debug)]
pub struct Fields {
    names: Arc<[String]>,
    values: Mutex<HashMap<String, String>>,
}

impl Fields {
    fn new(names: Arc<[String]>) -> Self {
        Fields {
            names,
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Current value of a field, if set.
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.lock().ok()?.get(name).cloned()
    }

    /// Set a declared field. Returns false for undeclared names.
    pub fn set(&self, name: &str, value: String) -> bool {
        if !self.names.iter().any(|declared| declared == name) {
            return false;
        }
        if let Ok(mut values) = self.values.lock() {
            values.insert(name.to_owned(), value);
            true
        } else {
            false
        }
    }
}
