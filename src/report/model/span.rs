use crate::report::model::{annotation::Annotation, endpoint::Endpoint};
use serde::Serialize;
use std::collections::BTreeMap;
use typed_builder::TypedBuilder;

/// How a span participated in an RPC or messaging exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Client,
    Server,
    Producer,
    Consumer,
}

/// A finished span in the zipkin v2 wire shape.
///
/// Absent fields serialize as absent, not null or false; in particular
/// `debug` and `shared` only appear when true, which is how the client and
/// server halves of a joined span stay distinguishable.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<Kind>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    local_endpoint: Option<Endpoint>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_endpoint: Option<Endpoint>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<Vec<Annotation>>,
    #[builder(setter(into), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<BTreeMap<String, String>>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<bool>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    shared: Option<bool>,
}

impl Span {
    /// The trace id in 16 or 32 lower-hex characters.
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// The parent span id in 16 lower-hex characters, absent on a root.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// The span id in 16 lower-hex characters.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The RPC or messaging role, when known.
    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    /// The logical operation name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Epoch microseconds of the start of this span.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Duration in microseconds, at least one.
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    /// The host that recorded this span.
    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.local_endpoint.as_ref()
    }

    /// The other side of the connection, when known.
    pub fn remote_endpoint(&self) -> Option<&Endpoint> {
        self.remote_endpoint.as_ref()
    }

    /// Events that explain latency.
    pub fn annotations(&self) -> &[Annotation] {
        self.annotations.as_deref().unwrap_or(&[])
    }

    /// Lookup a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref()?.get(key).map(String::as_str)
    }

    /// All tags on this span.
    pub fn tags(&self) -> Option<&BTreeMap<String, String>> {
        self.tags.as_ref()
    }

    /// True when this span is part of a forced trace.
    pub fn debug(&self) -> Option<bool> {
        self.debug
    }

    /// True when the span id was supplied by the remote peer.
    pub fn shared(&self) -> Option<bool> {
        self.shared
    }
}
