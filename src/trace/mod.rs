//! Request tracing engine: hierarchical spans, a bounded trace store, and
//! synchronous subscriber fan-out (§4.10, §4.11).

pub mod ring_buffer;
pub mod span;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

pub use span::{Span, SpanEvent, SpanStatus, Trace};

use ring_buffer::RingBuffer;

/// A trace's per-span cap is silently enforced once this many spans are
/// already resident; further children are discarded (§4.10 Retention).
pub const DEFAULT_SPAN_CAP: usize = 500;

/// Receives a synchronous callback for every lifecycle event a trace or
/// span passes through. Delivery is fan-out and in-process, in emission
/// order; a panicking subscriber is isolated and logged, never allowed to
/// take down the span that triggered it. Every method has a no-op default
/// except `on_span_end`, the one event every subscriber that predates the
/// other four still needs to observe.
pub trait TraceSubscriber: Send + Sync {
    fn on_trace_start(&self, _trace: &Trace) {}
    fn on_trace_end(&self, _trace: &Trace) {}
    fn on_span_start(&self, _trace: &Trace, _span: &Span) {}
    fn on_span_event(&self, _trace: &Trace, _span: &Span, _event: &SpanEvent) {}
    fn on_span_end(&self, trace: &Trace, span: &Span);
}

struct TracerState {
    /// Traces whose root span has not yet ended. Keeping these off the
    /// bounded ring buffer means an in-flight trace can never be evicted
    /// by newer traffic before it finishes (§4.10).
    in_progress: HashMap<String, Trace>,
    /// Completed traces, capacity-bounded, oldest evicted first.
    retained: RingBuffer<Trace>,
    subscribers: Vec<Arc<dyn TraceSubscriber>>,
    span_cap: usize,
}

enum EndOutcome {
    AlreadyEnded,
    Ended { is_root: bool },
}

/// Owns the trace store and subscriber list. Cheap to clone — every clone
/// shares the same underlying state.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<Mutex<TracerState>>,
}

impl Tracer {
    pub fn new(capacity: usize) -> Self {
        Tracer::with_span_cap(capacity, DEFAULT_SPAN_CAP)
    }

    /// As `new`, but with an explicit per-trace span cap instead of the
    /// default of 500.
    pub fn with_span_cap(capacity: usize, span_cap: usize) -> Self {
        Tracer {
            inner: Arc::new(Mutex::new(TracerState {
                in_progress: HashMap::new(),
                retained: RingBuffer::new(capacity),
                subscribers: Vec::new(),
                span_cap,
            })),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn TraceSubscriber>) {
        self.inner.lock().expect("tracer lock poisoned").subscribers.push(subscriber);
    }

    /// Drops every in-progress and retained trace, and every subscriber.
    /// Used by test teardown and by an embedding application's own
    /// shutdown sequence.
    pub fn clear(&mut self) {
        let mut state = self.inner.lock().expect("tracer lock poisoned");
        state.in_progress.clear();
        state.retained.clear();
        state.subscribers.clear();
    }

    /// Starts a new trace with a root span tagged `layer`, storing it in
    /// the in-progress table and notifying subscribers of `trace:start`
    /// and `span:start` before returning handles to both.
    pub fn start_trace(&self, name: &str, layer: &str) -> (TraceHandle, SpanHandle) {
        let trace_id = crate::ids::generate_trace_id();
        let span_id = crate::ids::generate_span_id();
        let root = Span::new(span_id.clone(), trace_id.clone(), None, name.to_owned(), layer);
        let trace = Trace::new(trace_id.clone(), root.clone());

        let subscribers = {
            let mut state = self.inner.lock().expect("tracer lock poisoned");
            state.in_progress.insert(trace_id.clone(), trace.clone());
            state.subscribers.clone()
        };
        Self::dispatch_event(&subscribers, "trace:start", |s| s.on_trace_start(&trace));
        Self::dispatch_event(&subscribers, "span:start", |s| s.on_span_start(&trace, &root));

        (
            TraceHandle {
                tracer: self.clone(),
                trace_id: trace_id.clone(),
            },
            SpanHandle {
                tracer: self.clone(),
                trace_id,
                span_id,
            },
        )
    }

    /// Looks a trace up wherever it currently lives — in-progress or
    /// already retained.
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        let state = self.inner.lock().expect("tracer lock poisoned");
        state
            .in_progress
            .get(trace_id)
            .or_else(|| state.retained.get(trace_id))
            .cloned()
    }

    /// Every retained (completed) trace, most-recently-started first.
    pub fn snapshot(&self) -> Vec<Trace> {
        let state = self.inner.lock().expect("tracer lock poisoned");
        let mut traces: Vec<Trace> = state.retained.iter().cloned().collect();
        traces.sort_by(|a, b| b.started_ms.cmp(&a.started_ms));
        traces
    }

    fn with_span<F, R>(&self, trace_id: &str, span_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Span) -> R,
    {
        let mut state = self.inner.lock().expect("tracer lock poisoned");
        if let Some(trace) = state.in_progress.get_mut(trace_id) {
            return trace.spans.get_mut(span_id).map(f);
        }
        if let Some(trace) = state.retained.get_mut(trace_id) {
            return trace.spans.get_mut(span_id).map(f);
        }
        None
    }

    /// Inserts `span` into `trace_id`'s in-progress span table, unless the
    /// trace is not in-progress or already holds `span_cap` spans, in
    /// which case the child is discarded silently and `None` is returned.
    fn insert_child(&self, trace_id: &str, span: Span) -> Option<(Trace, Vec<Arc<dyn TraceSubscriber>>)> {
        let mut state = self.inner.lock().expect("tracer lock poisoned");
        let span_cap = state.span_cap;
        let trace = state.in_progress.get_mut(trace_id)?;
        if trace.spans.len() >= span_cap {
            return None;
        }
        trace.spans.insert(span.id.clone(), span);
        Some((trace.clone(), state.subscribers.clone()))
    }

    fn record_event(&self, trace_id: &str, span_id: &str, name: &str, attributes: HashMap<String, Value>) -> Option<(Trace, SpanEvent, Vec<Arc<dyn TraceSubscriber>>)> {
        let mut state = self.inner.lock().expect("tracer lock poisoned");
        let subscribers = state.subscribers.clone();
        let trace = if let Some(t) = state.in_progress.get_mut(trace_id) {
            t
        } else if let Some(t) = state.retained.get_mut(trace_id) {
            t
        } else {
            return None;
        };
        let span = trace.spans.get_mut(span_id)?;
        span.event(name, attributes);
        let event = span.events.last().cloned()?;
        Some((trace.clone(), event, subscribers))
    }

    fn end_span(&self, trace_id: &str, span_id: &str) -> Option<EndOutcome> {
        let mut state = self.inner.lock().expect("tracer lock poisoned");
        if let Some(trace) = state.in_progress.get_mut(trace_id) {
            let is_root = trace.root_span_id == span_id;
            let span = trace.spans.get_mut(span_id)?;
            if span.is_ended() {
                return Some(EndOutcome::AlreadyEnded);
            }
            span.end();
            return Some(EndOutcome::Ended { is_root });
        }
        if let Some(trace) = state.retained.get_mut(trace_id) {
            let span = trace.spans.get_mut(span_id)?;
            if span.is_ended() {
                return Some(EndOutcome::AlreadyEnded);
            }
            span.end();
            return Some(EndOutcome::Ended { is_root: false });
        }
        None
    }

    fn notify_span_end(&self, trace_id: &str, span_id: &str) {
        let (trace, span, subscribers) = {
            let state = self.inner.lock().expect("tracer lock poisoned");
            let trace = state.in_progress.get(trace_id).or_else(|| state.retained.get(trace_id));
            let trace = match trace {
                Some(t) => t.clone(),
                None => return,
            };
            let span = match trace.spans.get(span_id) {
                Some(s) => s.clone(),
                None => return,
            };
            (trace, span, state.subscribers.clone())
        };
        Self::dispatch_event(&subscribers, "span:end", |s| s.on_span_end(&trace, &span));
    }

    /// Moves a just-finished trace from the in-progress table into the
    /// retained ring buffer and notifies subscribers of `trace:end`.
    fn finalize_trace(&self, trace_id: &str) {
        let (trace, subscribers) = {
            let mut state = self.inner.lock().expect("tracer lock poisoned");
            let trace = match state.in_progress.remove(trace_id) {
                Some(t) => t,
                None => return,
            };
            state.retained.push(trace.clone());
            (trace, state.subscribers.clone())
        };
        Self::dispatch_event(&subscribers, "trace:end", |s| s.on_trace_end(&trace));
    }

    fn dispatch_event<F>(subscribers: &[Arc<dyn TraceSubscriber>], label: &str, f: F)
    where
        F: Fn(&dyn TraceSubscriber),
    {
        for subscriber in subscribers {
            let result = catch_unwind(AssertUnwindSafe(|| f(subscriber.as_ref())));
            if result.is_err() {
                log::warn!("trace subscriber panicked handling {label}");
            }
        }
    }
}

/// A handle to an in-flight trace, used for cross-origin span merging.
#[derive(Clone)]
pub struct TraceHandle {
    tracer: Tracer,
    trace_id: String,
}

impl TraceHandle {
    /// Rehydrates a handle to a trace the caller already knows the id of
    /// (e.g. from a request header), without starting a new one.
    pub fn for_existing(tracer: Tracer, trace_id: String) -> Self {
        TraceHandle { tracer, trace_id }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Merges client-reported spans into this trace, wherever it
    /// currently lives. A span whose id already exists server-side is
    /// left untouched — the server's record is authoritative; the client
    /// fills in gaps the server cannot see (browser-side rendering,
    /// client-side navigation). A no-op if the trace is no longer
    /// resident.
    pub fn merge_client_spans(&self, spans: Vec<Span>) {
        let mut state = self.tracer.inner.lock().expect("tracer lock poisoned");
        if let Some(trace) = state.in_progress.get_mut(&self.trace_id) {
            for span in spans {
                trace.spans.entry(span.id.clone()).or_insert(span);
            }
            return;
        }
        if let Some(trace) = state.retained.get_mut(&self.trace_id) {
            for span in spans {
                trace.spans.entry(span.id.clone()).or_insert(span);
            }
        }
    }
}

/// A handle to a single span, used by instrumentation call sites to record
/// attributes, events, errors, and children without holding the tracer's
/// lock across `await` points.
#[derive(Clone)]
pub struct SpanHandle {
    tracer: Tracer,
    trace_id: String,
    span_id: String,
}

impl SpanHandle {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.tracer.with_span(&self.trace_id, &self.span_id, |s| s.set_attribute(key, value));
    }

    /// Appends a timestamped event and notifies subscribers of
    /// `span:event`.
    pub fn event(&self, name: &str, attributes: HashMap<String, Value>) {
        if let Some((trace, event, subscribers)) = self.tracer.record_event(&self.trace_id, &self.span_id, name, attributes) {
            let span = match trace.spans.get(&self.span_id) {
                Some(s) => s.clone(),
                None => return,
            };
            Tracer::dispatch_event(&subscribers, "span:event", |s| s.on_span_event(&trace, &span, &event));
        }
    }

    /// Records `error.message` (and `error.class`, if given) as
    /// attributes and marks the span errored. Dropped if the span has
    /// already ended.
    pub fn record_error(&self, message: &str, class: Option<&str>) {
        self.tracer.with_span(&self.trace_id, &self.span_id, |s| s.record_error(message, class));
    }

    /// Marks the span timed out. Dropped if the span has already ended.
    pub fn record_timeout(&self) {
        self.tracer.with_span(&self.trace_id, &self.span_id, |s| s.record_timeout());
    }

    /// Starts a child span under this one, tagged with `layer`, notifying
    /// subscribers of `span:start` unless the parent trace's per-trace
    /// span cap has been reached, in which case the child is silently
    /// discarded — any calls made on the returned handle will then be
    /// no-ops, since nothing resident owns that span id.
    pub fn child(&self, name: &str, layer: &str) -> SpanHandle {
        let child_id = crate::ids::generate_span_id();
        let span = Span::new(child_id.clone(), self.trace_id.clone(), Some(self.span_id.clone()), name.to_owned(), layer);
        if let Some((trace, subscribers)) = self.tracer.insert_child(&self.trace_id, span) {
            if let Some(child_span) = trace.spans.get(&child_id) {
                Tracer::dispatch_event(&subscribers, "span:start", |s| s.on_span_start(&trace, child_span));
            }
        }
        SpanHandle {
            tracer: self.tracer.clone(),
            trace_id: self.trace_id.clone(),
            span_id: child_id,
        }
    }

    /// Ends the span and, the first time only, notifies subscribers of
    /// `span:end`. If this was the trace's root span, also finalizes the
    /// trace — moving it into the retained ring buffer and notifying
    /// `trace:end`.
    pub fn end(&self) {
        match self.tracer.end_span(&self.trace_id, &self.span_id) {
            Some(EndOutcome::Ended { is_root }) => {
                self.tracer.notify_span_end(&self.trace_id, &self.span_id);
                if is_root {
                    self.tracer.finalize_trace(&self.trace_id);
                }
            }
            Some(EndOutcome::AlreadyEnded) | None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber(Arc<AtomicUsize>);
    impl TraceSubscriber for CountingSubscriber {
        fn on_span_end(&self, _trace: &Trace, _span: &Span) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingSubscriber;
    impl TraceSubscriber for PanickingSubscriber {
        fn on_span_end(&self, _trace: &Trace, _span: &Span) {
            panic!("boom");
        }
    }

    /// Records every event kind it observes, with a label, so tests can
    /// assert on delivery order (§8 scenario 4).
    struct RecordingSubscriber(Mutex<Vec<&'static str>>);
    impl RecordingSubscriber {
        fn new() -> Self {
            RecordingSubscriber(Mutex::new(Vec::new()))
        }
        fn events(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }
    impl TraceSubscriber for RecordingSubscriber {
        fn on_trace_start(&self, _trace: &Trace) {
            self.0.lock().unwrap().push("trace:start");
        }
        fn on_trace_end(&self, _trace: &Trace) {
            self.0.lock().unwrap().push("trace:end");
        }
        fn on_span_start(&self, _trace: &Trace, _span: &Span) {
            self.0.lock().unwrap().push("span:start");
        }
        fn on_span_event(&self, _trace: &Trace, _span: &Span, _event: &SpanEvent) {
            self.0.lock().unwrap().push("span:event");
        }
        fn on_span_end(&self, _trace: &Trace, _span: &Span) {
            self.0.lock().unwrap().push("span:end");
        }
    }

    #[test]
    fn ending_a_span_notifies_subscribers_exactly_once() {
        let tracer = Tracer::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        tracer.subscribe(Arc::new(CountingSubscriber(count.clone())));
        let (_trace, span) = tracer.start_trace("request", "routing");
        span.end();
        span.end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_other_subscribers() {
        let tracer = Tracer::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        tracer.subscribe(Arc::new(PanickingSubscriber));
        tracer.subscribe(Arc::new(CountingSubscriber(count.clone())));
        let (_trace, span) = tracer.start_trace("request", "routing");
        span.end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_spans_are_stored_under_the_same_trace() {
        let tracer = Tracer::new(16);
        let (trace, root) = tracer.start_trace("request", "routing");
        let child = root.child("render", "data");
        child.end();
        let stored = tracer.get_trace(trace.trace_id()).unwrap();
        assert_eq!(stored.spans.len(), 2);
        assert_eq!(stored.spans.get(child.span_id()).unwrap().parent_id.as_deref(), Some(root.span_id()));
    }

    #[test]
    fn ring_buffer_eviction_drops_oldest_trace() {
        let tracer = Tracer::new(1);
        let (first, root) = tracer.start_trace("a", "routing");
        root.end();
        let (second, root2) = tracer.start_trace("b", "routing");
        root2.end();
        assert!(tracer.get_trace(first.trace_id()).is_none());
        assert!(tracer.get_trace(second.trace_id()).is_some());
    }

    #[test]
    fn clear_drops_traces_and_subscribers() {
        let mut tracer = Tracer::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        tracer.subscribe(Arc::new(CountingSubscriber(count.clone())));
        let (trace, span) = tracer.start_trace("request", "routing");
        span.end();
        tracer.clear();
        assert!(tracer.get_trace(trace.trace_id()).is_none());
        let (_trace2, span2) = tracer.start_trace("another", "routing");
        span2.end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn merge_client_spans_does_not_overwrite_server_span() {
        let tracer = Tracer::new(16);
        let (trace, root) = tracer.start_trace("request", "routing");
        root.set_attribute("origin", Value::String("server".into()));
        let mut client_copy = Span::new(root.span_id().to_owned(), trace.trace_id().to_owned(), None, "request".into(), "routing");
        client_copy.set_attribute("origin", Value::String("client".into()));
        trace.merge_client_spans(vec![client_copy]);
        let stored = tracer.get_trace(trace.trace_id()).unwrap();
        assert_eq!(
            stored.spans.get(root.span_id()).unwrap().attributes.get("origin"),
            Some(&Value::String("server".into()))
        );
    }

    #[test]
    fn a_trace_stays_in_progress_and_resident_until_its_root_ends() {
        let tracer = Tracer::new(1);
        let (first, root) = tracer.start_trace("a", "routing");
        // A second trace starting does not evict the first: it isn't in
        // the (capacity-1) retained ring buffer yet.
        let (_second, root2) = tracer.start_trace("b", "routing");
        assert!(tracer.get_trace(first.trace_id()).is_some());
        root.end();
        root2.end();
        // Now that both have ended and moved into the bounded buffer, the
        // older one is evicted.
        assert!(tracer.get_trace(first.trace_id()).is_none());
    }

    #[test]
    fn children_beyond_the_span_cap_are_discarded_silently() {
        let tracer = Tracer::with_span_cap(16, 2);
        let (trace, root) = tracer.start_trace("request", "routing");
        let first = root.child("a", "data");
        let _second = root.child("b", "data");
        let third = root.child("c", "data");
        third.set_attribute("dropped", Value::Bool(true));
        let stored = tracer.get_trace(trace.trace_id()).unwrap();
        assert_eq!(stored.spans.len(), 3); // root + 2 accepted children
        assert!(!stored.spans.contains_key(third.span_id()));
        assert!(stored.spans.contains_key(first.span_id()));
    }

    #[test]
    fn subscribers_observe_all_five_event_kinds_in_order() {
        let tracer = Tracer::new(16);
        let recorder = Arc::new(RecordingSubscriber::new());
        tracer.subscribe(recorder.clone());

        let (_trace, root) = tracer.start_trace("request", "routing");
        let routing = root.child("match", "routing");
        let database = routing.child("query", "database");
        database.event("db.get", HashMap::new());
        database.end();
        routing.end();
        root.end();

        assert_eq!(
            recorder.events(),
            vec![
                "trace:start",
                "span:start", // root
                "span:start", // routing
                "span:start", // database
                "span:event", // database event
                "span:end",   // database
                "span:end",   // routing
                "span:end",   // root
                "trace:end",
            ]
        );
    }
}
