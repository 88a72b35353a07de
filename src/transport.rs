//! Wire transport for traces: snapshot/single-trace JSON retrieval, an
//! append-only streaming feed of span-end events for connected observers,
//! and the inbound `client:spans` merge path (§4.13).

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use hyper::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::trace::{Span, Trace, TraceHandle, TraceSubscriber, Tracer};

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientSpansPayload {
    pub trace_id: String,
    pub spans: Vec<Span>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("building a JSON response from a valid status/body never fails")
}

/// `GET` of every resident trace, most recent first.
pub fn snapshot_response(tracer: &Tracer) -> Response<Body> {
    json_response(StatusCode::OK, json!({ "traces": tracer.snapshot() }))
}

/// `GET` of a single trace by id; 404 if it has been evicted or never
/// existed.
pub fn single_trace_response(tracer: &Tracer, trace_id: &str) -> Response<Body> {
    match tracer.get_trace(trace_id) {
        Some(trace) => json_response(StatusCode::OK, serde_json::to_value(&trace).unwrap_or_default()),
        None => json_response(StatusCode::NOT_FOUND, json!({ "error": format!("no trace with id {trace_id:?}") })),
    }
}

/// Parses and applies an inbound `client:spans` payload (a browser
/// reporting spans for a trace the server started), returning 404 if the
/// referenced trace is no longer resident.
pub fn merge_client_spans(tracer: &Tracer, payload: ClientSpansPayload) -> Response<Body> {
    match tracer.get_trace(&payload.trace_id) {
        None => json_response(StatusCode::NOT_FOUND, json!({ "error": format!("no trace with id {:?}", payload.trace_id) })),
        Some(_) => {
            let handle = TraceHandle::for_existing(tracer.clone(), payload.trace_id.clone());
            handle.merge_client_spans(payload.spans);
            json_response(StatusCode::OK, json!({ "merged": true }))
        }
    }
}

/// One event pushed to a connected streaming observer: a span just ended,
/// in the context of its full trace so the observer can render ancestry
/// without a follow-up request.
#[derive(Debug, Clone, Serialize)]
struct StreamEvent<'a> {
    trace: &'a Trace,
    span: &'a Span,
}

/// Fans every span-end event out to connected observers as newline-
/// delimited JSON. Modeled as a `TraceSubscriber` so it participates in
/// the same synchronous, panic-isolated fan-out as any other subscriber.
pub struct StreamBroadcaster {
    senders: std::sync::Mutex<Vec<mpsc::Sender<Bytes>>>,
}

impl StreamBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(StreamBroadcaster {
            senders: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Registers a new observer and returns a streaming HTTP response body.
    /// The first line is a snapshot of every retained trace at connect
    /// time; every line after that is a live subscriber event, so an
    /// observer that connects mid-session doesn't have to separately poll
    /// the snapshot endpoint to see what already happened.
    pub fn connect(&self, tracer: &Tracer) -> Response<Body> {
        let (tx, rx) = mpsc::channel::<Bytes>(64);
        if let Ok(mut payload) = serde_json::to_vec(&json!({ "snapshot": tracer.snapshot() })) {
            payload.push(b'\n');
            let _ = tx.try_send(Bytes::from(payload));
        }
        self.senders.lock().expect("broadcaster lock poisoned").push(tx);
        let stream = ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/x-ndjson")
            .body(Body::wrap_stream(stream))
            .expect("building a streaming response never fails")
    }
}

impl TraceSubscriber for StreamBroadcaster {
    fn on_span_end(&self, trace: &Trace, span: &Span) {
        let payload = match serde_json::to_vec(&StreamEvent { trace, span }) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        let mut line = payload;
        line.push(b'\n');
        let bytes = Bytes::from(line);
        let mut senders = self.senders.lock().expect("broadcaster lock poisoned");
        senders.retain(|tx| tx.try_send(bytes.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Span as TraceSpan;

    #[tokio::test]
    async fn snapshot_includes_started_traces() {
        let tracer = Tracer::new(16);
        let (_trace, span) = tracer.start_trace("request", "routing");
        span.end();
        let response = snapshot_response(&tracer);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn single_trace_404s_for_unknown_id() {
        let tracer = Tracer::new(16);
        let response = single_trace_response(&tracer, "nope");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn single_trace_200s_for_known_id() {
        let tracer = Tracer::new(16);
        let (trace, _span) = tracer.start_trace("request", "routing");
        let response = single_trace_response(&tracer, trace.trace_id());
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn connect_emits_a_snapshot_before_live_events() {
        let tracer = Tracer::new(16);
        let (_trace, root) = tracer.start_trace("request", "routing");
        root.end();

        let broadcaster = StreamBroadcaster::new();
        let response = broadcaster.connect(&tracer);
        let mut body = response.into_body();
        let first_chunk = body.next().await.unwrap().unwrap();
        let first_line: serde_json::Value = serde_json::from_slice(&first_chunk).unwrap();
        assert!(first_line.get("snapshot").is_some());
        assert_eq!(first_line["snapshot"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merge_client_spans_404s_for_unknown_trace() {
        let tracer = Tracer::new(16);
        let response = merge_client_spans(
            &tracer,
            ClientSpansPayload {
                trace_id: "nope".into(),
                spans: vec![TraceSpan::new("s1".into(), "nope".into(), None, "paint".into(), "rpc")],
            },
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn merge_client_spans_200s_and_adds_new_span() {
        let tracer = Tracer::new(16);
        let (trace, _root) = tracer.start_trace("request", "routing");
        let response = merge_client_spans(
            &tracer,
            ClientSpansPayload {
                trace_id: trace.trace_id().to_owned(),
                spans: vec![TraceSpan::new("client-1".into(), trace.trace_id().to_owned(), None, "paint".into(), "rpc")],
            },
        );
        assert_eq!(response.status(), StatusCode::OK);
        let stored = tracer.get_trace(trace.trace_id()).unwrap();
        assert!(stored.spans.contains_key("client-1"));
    }
}
