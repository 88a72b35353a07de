//! Span and trace data model (§4.10, §4.12).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trace::ring_buffer::Identified;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
    Timeout,
}

/// One unit of work within a trace. `events` are point-in-time markers;
/// `attributes` are a span-wide key/value bag set any time before `end()`.
/// Errors are recorded as the `error.message` / `error.class` attributes
/// rather than a dedicated field, so a streamed or serialized span carries
/// them the same way any other attribute does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub layer: String,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub status: SpanStatus,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

impl Span {
    pub fn new(id: String, trace_id: String, parent_id: Option<String>, name: String, layer: &str) -> Self {
        Span {
            id,
            trace_id,
            parent_id,
            name,
            layer: layer.to_owned(),
            start_ms: now_ms(),
            end_ms: None,
            status: SpanStatus::Ok,
            attributes: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_owned(), value);
    }

    pub fn event(&mut self, name: &str, attributes: HashMap<String, Value>) {
        self.events.push(SpanEvent {
            name: name.to_owned(),
            timestamp_ms: now_ms(),
            attributes,
        });
    }

    /// Marks the span errored and records `error.message` (and, when
    /// `class` is given, `error.class`) as attributes. Honored only before
    /// `end()` — a caller that errors a span after it closed is dropped,
    /// matching `end()`'s own immutability-after-close rule.
    pub fn record_error(&mut self, message: &str, class: Option<&str>) {
        if self.is_ended() {
            return;
        }
        self.status = SpanStatus::Error;
        self.attributes.insert("error.message".to_owned(), Value::String(message.to_owned()));
        if let Some(class) = class {
            self.attributes.insert("error.class".to_owned(), Value::String(class.to_owned()));
        }
    }

    /// Marks the span timed out. Like `record_error`, only honored before
    /// `end()`.
    pub fn record_timeout(&mut self) {
        if self.is_ended() {
            return;
        }
        self.status = SpanStatus::Timeout;
    }

    pub fn is_ended(&self) -> bool {
        self.end_ms.is_some()
    }

    /// Ends the span. A span may only end once; later calls are no-ops so
    /// a handler and an outer instrumentation wrapper can both call `end()`
    /// without double-counting duration.
    pub fn end(&mut self) {
        if self.end_ms.is_none() {
            self.end_ms = Some(now_ms());
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end_ms.map(|end| end.saturating_sub(self.start_ms))
    }
}

impl Identified for Span {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A trace: one root span plus every descendant, keyed by span id for O(1)
/// lookup during mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub root_span_id: String,
    pub started_ms: u64,
    pub spans: HashMap<String, Span>,
}

impl Trace {
    pub fn new(id: String, root: Span) -> Self {
        let started_ms = root.start_ms;
        let root_span_id = root.id.clone();
        let mut spans = HashMap::new();
        spans.insert(root_span_id.clone(), root);
        Trace {
            id,
            root_span_id,
            started_ms,
            spans,
        }
    }

    pub fn root(&self) -> Option<&Span> {
        self.spans.get(&self.root_span_id)
    }

    pub fn is_ended(&self) -> bool {
        self.root().map(|s| s.is_ended()).unwrap_or(false)
    }

    /// `trace.duration = root.endTime - root.startTime` (§8).
    pub fn duration_ms(&self) -> Option<u64> {
        self.root().and_then(|s| s.duration_ms())
    }

    /// Children of `span_id`, in no particular order.
    pub fn children_of<'a>(&'a self, span_id: &'a str) -> impl Iterator<Item = &'a Span> {
        self.spans
            .values()
            .filter(move |s| s.parent_id.as_deref() == Some(span_id))
    }
}

impl Identified for Trace {
    fn id(&self) -> &str {
        &self.id
    }
}
