//! # TraceContext
//!
//! A `TraceContext` is the immutable identity of one span: trace and span
//! ids, the sampling state that travels with them, and any opaque state
//! attached by propagation plugins. Contexts are freely shareable values;
//! deriving a child or resolving a sampling decision always produces a new
//! context.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::ContextError;

/// Opaque state bundle attached to a context by a propagation plugin.
///
/// Bundles are carried by reference: a child context shares its parent's
/// bundles, and merging two lists deduplicates by pointer identity.
pub type Extra = Arc<dyn Any + Send + Sync>;

/// Identity of one span within a trace.
///
/// Equality and hashing cover identifiers only (`trace_id_high`, `trace_id`,
/// `span_id` and the `shared` flag); sampling state and extra bundles do not
/// participate. The `shared` flag is part of identity because the server
/// side of a joined span reuses the client's span id and the two halves must
/// remain distinct records.
#[derive(Clone)]
pub struct TraceContext {
    pub(crate) trace_id_high: u64,
    pub(crate) trace_id: u64,
    pub(crate) parent_id: Option<u64>,
    pub(crate) span_id: u64,
    pub(crate) sampled: Option<bool>,
    pub(crate) sampled_local: bool,
    pub(crate) debug: bool,
    pub(crate) shared: bool,
    pub(crate) local_root_id: u64,
    pub(crate) extra: Vec<Extra>,
}

impl TraceContext {
    /// Start building a context. At minimum `trace_id` and `span_id` must be
    /// set to non-zero values.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Rebuild this context with changes.
    pub fn to_builder(&self) -> Builder {
        Builder {
            trace_id_high: self.trace_id_high,
            trace_id: self.trace_id,
            parent_id: self.parent_id,
            span_id: self.span_id,
            sampled: self.sampled,
            sampled_local: self.sampled_local,
            debug: self.debug,
            shared: self.shared,
            local_root_id: self.local_root_id,
            extra: self.extra.clone(),
        }
    }

    /// High 64 bits of the trace id, zero for 64-bit traces.
    pub fn trace_id_high(&self) -> u64 {
        self.trace_id_high
    }

    /// Low 64 bits of the trace id. Never zero.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// The parent's span id, absent on a root span.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// Id of this span. Never zero.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Whether the trace should be reported to the collector: `Some(true)`,
    /// `Some(false)`, or `None` when the decision has not been made yet.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// When true the span is recorded and passed to finished-span handlers
    /// even if it won't be reported remotely.
    pub fn sampled_local(&self) -> bool {
        self.sampled_local
    }

    /// True on a forced trace: implies `sampled() == Some(true)` and is
    /// propagated downstream.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// True when the span id was supplied by the remote peer, i.e. this is
    /// the server side of an RPC sharing the client's span id.
    pub fn shared(&self) -> bool {
        self.shared
    }

    /// Id of the topmost span created in this process within this causal
    /// chain. Zero only on a context that has never traversed the tracer.
    pub fn local_root_id(&self) -> u64 {
        self.local_root_id
    }

    /// State bundles attached by propagation plugins, in attachment order.
    pub fn extra(&self) -> &[Extra] {
        &self.extra
    }

    /// Returns the first extra bundle of type `T`, if any.
    pub fn find_extra<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extra
            .iter()
            .find_map(|extra| Arc::clone(extra).downcast::<T>().ok())
    }

    /// Returns a copy of this context with one more extra bundle appended.
    pub fn with_extra(&self, extra: Extra) -> TraceContext {
        let mut copy = self.clone();
        copy.extra.push(extra);
        copy
    }

    /// The trace id in lower-hex: 32 characters when 128-bit, 16 otherwise.
    pub fn trace_id_string(&self) -> String {
        if self.trace_id_high != 0 {
            format!("{:016x}{:016x}", self.trace_id_high, self.trace_id)
        } else {
            format!("{:016x}", self.trace_id)
        }
    }

    /// The span id in 16 character lower-hex.
    pub fn span_id_string(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    /// The parent id in 16 character lower-hex, if present.
    pub fn parent_id_string(&self) -> Option<String> {
        self.parent_id.map(|id| format!("{id:016x}"))
    }
}

impl PartialEq for TraceContext {
    fn eq(&self, other: &Self) -> bool {
        self.trace_id_high == other.trace_id_high
            && self.trace_id == other.trace_id
            && self.span_id == other.span_id
            && self.shared == other.shared
    }
}

impl Eq for TraceContext {}

impl Hash for TraceContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.trace_id_high.hash(state);
        self.trace_id.hash(state);
        self.span_id.hash(state);
        self.shared.hash(state);
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trace_id_high != 0 {
            write!(f, "{:016x}", self.trace_id_high)?;
        }
        write!(f, "{:016x}/{:016x}", self.trace_id, self.span_id)
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("trace_id", &self.trace_id_string())
            .field("parent_id", &self.parent_id_string())
            .field("span_id", &self.span_id_string())
            .field("sampled", &self.sampled)
            .field("sampled_local", &self.sampled_local)
            .field("debug", &self.debug)
            .field("shared", &self.shared)
            .field("local_root_id", &self.local_root_id)
            .field("extra", &self.extra.len())
            .finish()
    }
}

/// Builder for [`TraceContext`].
#[derive(Clone, Default)]
pub struct Builder {
    trace_id_high: u64,
    trace_id: u64,
    parent_id: Option<u64>,
    span_id: u64,
    sampled: Option<bool>,
    sampled_local: bool,
    debug: bool,
    shared: bool,
    local_root_id: u64,
    extra: Vec<Extra>,
}

impl Builder {
    /// High 64 bits of the trace id. Zero (the default) means 64-bit.
    pub fn trace_id_high(mut self, trace_id_high: u64) -> Self {
        self.trace_id_high = trace_id_high;
        self
    }

    /// Low 64 bits of the trace id. Required, non-zero.
    pub fn trace_id(mut self, trace_id: u64) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// The parent span id, or `None` for a root span.
    pub fn parent_id(mut self, parent_id: impl Into<Option<u64>>) -> Self {
        self.parent_id = parent_id.into();
        self
    }

    /// The span id. Required, non-zero.
    pub fn span_id(mut self, span_id: u64) -> Self {
        self.span_id = span_id;
        self
    }

    /// The sampling decision; pass `None` to mark it not yet decided.
    pub fn sampled(mut self, sampled: impl Into<Option<bool>>) -> Self {
        self.sampled = sampled.into();
        self
    }

    /// Record this span locally even when it won't be reported remotely.
    pub fn sampled_local(mut self, sampled_local: bool) -> Self {
        self.sampled_local = sampled_local;
        self
    }

    /// Force the trace: sets `sampled` to yes and propagates downstream.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Mark the span id as supplied by the remote peer.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub(crate) fn local_root_id(mut self, local_root_id: u64) -> Self {
        self.local_root_id = local_root_id;
        self
    }

    /// Replace the extra bundle list.
    pub fn extra(mut self, extra: Vec<Extra>) -> Self {
        self.extra = extra;
        self
    }

    /// Append one extra bundle.
    pub fn add_extra(mut self, extra: Extra) -> Self {
        self.extra.push(extra);
        self
    }

    /// Validate and build the context.
    pub fn build(self) -> Result<TraceContext, ContextError> {
        if self.trace_id == 0 {
            return Err(ContextError::InvalidTraceId);
        }
        if self.span_id == 0 {
            return Err(ContextError::InvalidSpanId);
        }
        if self.parent_id == Some(self.span_id) {
            return Err(ContextError::ParentEqualsSpanId);
        }
        Ok(self.finish())
    }

    /// Build without validation, for internal paths where ids come from the
    /// generator and cannot be zero.
    pub(crate) fn build_unchecked(self) -> TraceContext {
        debug_assert_ne!(self.trace_id, 0);
        debug_assert_ne!(self.span_id, 0);
        self.finish()
    }

    fn finish(self) -> TraceContext {
        // debug means the trace is force-sampled, here and downstream
        let sampled = if self.debug { Some(true) } else { self.sampled };
        TraceContext {
            trace_id_high: self.trace_id_high,
            trace_id: self.trace_id,
            parent_id: self.parent_id,
            span_id: self.span_id,
            sampled,
            sampled_local: self.sampled_local,
            debug: self.debug,
            shared: self.shared,
            local_root_id: self.local_root_id,
            extra: self.extra,
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("trace_id_high", &self.trace_id_high)
            .field("trace_id", &self.trace_id)
            .field("parent_id", &self.parent_id)
            .field("span_id", &self.span_id)
            .field("sampled", &self.sampled)
            .field("shared", &self.shared)
            .finish()
    }
}

/// Concatenates two extra lists, preserving left order and appending only
/// the right-hand bundles not already present by pointer identity.
pub(crate) fn merge_extra(left: &[Extra], right: &[Extra]) -> Vec<Extra> {
    if right.is_empty() {
        return left.to_vec();
    }
    let mut merged = left.to_vec();
    for extra in right {
        if !merged.iter().any(|existing| Arc::ptr_eq(existing, extra)) {
            merged.push(extra.clone());
        }
    }
    merged
}
