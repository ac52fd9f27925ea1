use serde::Serialize;
use typed_builder::TypedBuilder;

/// A timestamped event explaining latency within a span.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    timestamp: u64,
    #[builder(setter(into))]
    value: String,
}

impl Annotation {
    /// Epoch microseconds of the event.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// What happened at the timestamp.
    pub fn value(&self) -> &str {
        &self.value
    }
}
