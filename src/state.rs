//! Per-request context (§5 design note: the active span travels as
//! explicit state threaded through the middleware chain and handler,
//! never as a thread-local or other implicit global).

use std::any::{Any, TypeId};
use std::collections::HashMap;

use hyper::{HeaderMap, Method};

use crate::matcher::Params;
use crate::trace::{SpanHandle, TraceHandle};

/// The request's query string, as handed to [`RequestContext`] by the
/// router. `None` when the request had no `?...` component.
pub struct RequestSearch(pub Option<String>);

/// Request-scoped state. `extensions` lets one middleware stash a value
/// for a later middleware or the handler to read, keyed by type the same
/// way gotham's state bag is — one value per type, last write wins.
pub struct RequestContext {
    pub method: Method,
    pub pathname: String,
    pub headers: HeaderMap,
    pub params: Params,
    pub request_id: String,
    trace: Option<TraceHandle>,
    span: Option<SpanHandle>,
    extensions: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl RequestContext {
    pub fn new(method: Method, pathname: String, headers: HeaderMap, params: Params) -> Self {
        RequestContext {
            method,
            pathname,
            headers,
            params,
            request_id: crate::ids::generate_request_id(),
            trace: None,
            span: None,
            extensions: HashMap::new(),
        }
    }

    pub fn trace(&self) -> Option<&TraceHandle> {
        self.trace.as_ref()
    }

    pub fn set_trace(&mut self, trace: TraceHandle) {
        self.trace = Some(trace);
    }

    pub fn active_span(&self) -> Option<&SpanHandle> {
        self.span.as_ref()
    }

    pub fn set_active_span(&mut self, span: SpanHandle) {
        self.span = Some(span);
    }

    /// Opens a child span under the active span, tagged with `layer`, and
    /// makes it the new active span. A no-op that returns `None` outside
    /// a traced request.
    pub fn enter_span(&mut self, name: &str, layer: &str) -> Option<SpanHandle> {
        let child = self.span.as_ref()?.child(name, layer);
        self.span = Some(child.clone());
        Some(child)
    }

    pub fn put<T: Send + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Send + 'static>(&self) -> Option<&T> {
        self.extensions.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref())
    }

    pub fn take<T: Send + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }
}
