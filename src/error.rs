use thiserror::Error;

/// Errors raised while building a [`TraceContext`](crate::TraceContext).
///
/// Construction is the only recording path that can fail; once a context
/// exists every tracer operation is infallible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    /// Trace ids are 64 or 128 bit values with a non-zero low part.
    #[error("trace id must be non-zero")]
    InvalidTraceId,

    /// Span ids are non-zero 64 bit values.
    #[error("span id must be non-zero")]
    InvalidSpanId,

    /// A span cannot be its own parent.
    #[error("parent id must differ from span id")]
    ParentEqualsSpanId,
}

/// A specialized `Result` type for reporter sinks.
pub type ReportResult = Result<(), ReportError>;

/// Errors returned by a [`SpanReporter`](crate::report::SpanReporter) sink.
///
/// The tracer never surfaces these to the caller of `finish`; they are
/// logged at debug level and swallowed.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReportError {
    /// The reporter was asked to accept spans after shutdown.
    #[error("reporter is shut down")]
    Shutdown,

    /// Other errors propagated from the reporter implementation.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<String> for ReportError {
    fn from(err_msg: String) -> Self {
        ReportError::Other(err_msg.into())
    }
}

impl From<&'static str> for ReportError {
    fn from(err_msg: &'static str) -> Self {
        ReportError::Other(err_msg.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ReportError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ReportError::Other(err.to_string().into())
    }
}
