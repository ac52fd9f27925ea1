//! # tracekit
//!
//! Core tracer for zipkin-compatible distributed tracing: create and
//! correlate spans across process boundaries, sample at the local root,
//! track the current span per thread, and route finished spans through a
//! handler pipeline to a pluggable reporter.
//!
//! ## Getting started
//!
//! Build a [`Tracing`] instance once at startup and take [`Tracer`]s from
//! it wherever work is instrumented:
//!
//! ```no_run
//! use tracekit::{span::Kind, Tracing};
//!
//! let tracing = Tracing::builder()
//!     .with_local_service_name("frontend")
//!     .build();
//! let tracer = tracing.tracer();
//!
//! // a server span continuing an incoming request would use join_span or
//! // next_span_with; this one starts a fresh trace:
//! let span = tracer.new_trace();
//! span.name("get /checkout").kind(Kind::Server).start();
//! // ... do the work, optionally making the span current ...
//! span.finish();
//! ```
//!
//! Spans that lose the sampling decision come back as no-op handles: they
//! keep their identity (so propagation still works) but record nothing,
//! letting instrumentation run unconditionally.

pub mod clock;
pub mod context;
pub mod current;
pub mod error;
pub mod handler;
pub mod id_generator;
pub mod propagation;
pub mod report;
pub mod sampler;
pub mod span;

mod global;
mod internal_logging;
mod recorder;
mod tracer;

pub use context::TraceContext;
pub use global::{Builder, Tracing};
pub use tracer::Tracer;
