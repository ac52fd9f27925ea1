//! Zipkin v2 compatible wire model.

mod annotation;
mod endpoint;
mod span;

pub use annotation::Annotation;
pub use endpoint::Endpoint;
pub use span::{Kind, Span};

use std::collections::BTreeMap;

use crate::context::TraceContext;
use crate::handler::MutableSpan;

const ERROR_TAG: &str = "error";

/// Freeze a finished recorder span into the wire shape.
pub(crate) fn into_report_span(
    local_endpoint: &Endpoint,
    context: &TraceContext,
    span: MutableSpan,
) -> Span {
    let MutableSpan {
        name,
        kind,
        start_timestamp,
        finish_timestamp,
        annotations,
        tags,
        local_endpoint: local_override,
        remote_endpoint,
        error,
    } = span;

    let duration = match (start_timestamp, finish_timestamp) {
        // zero-duration artifacts are indistinguishable from absent data
        (Some(start), Some(finish)) => Some(finish.saturating_sub(start).max(1)),
        _ => None,
    };

    let mut tag_map: BTreeMap<String, String> = tags.into_iter().collect();
    if let Some(message) = error {
        tag_map.entry(ERROR_TAG.to_owned()).or_insert(message);
    }

    let annotations: Option<Vec<Annotation>> = if annotations.is_empty() {
        None
    } else {
        Some(
            annotations
                .into_iter()
                .map(|(timestamp, value)| {
                    Annotation::builder().timestamp(timestamp).value(value).build()
                })
                .collect(),
        )
    };

    Span::builder()
        .trace_id(context.trace_id_string())
        .parent_id(context.parent_id_string())
        .id(context.span_id_string())
        .kind(kind.map(Into::into))
        .name(name)
        .timestamp(start_timestamp)
        .duration(duration)
        .local_endpoint(local_override.unwrap_or_else(|| local_endpoint.clone()))
        .remote_endpoint(remote_endpoint)
        .annotations(annotations)
        .tags(if tag_map.is_empty() { None } else { Some(tag_map) })
        .debug(context.debug().then_some(true))
        .shared(context.shared().then_some(true))
        .build()
}

impl From<crate::span::Kind> for Kind {
    fn from(kind: crate::span::Kind) -> Self {
        match kind {
            crate::span::Kind::Client => Kind::Client,
            crate::span::Kind::Server => Kind::Server,
            crate::span::Kind::Producer => Kind::Producer,
            crate::span::Kind::Consumer => Kind::Consumer,
        }
    }
}
