//! Root-span middleware (§4.14): opens the trace for a request, injects
//! the trace id as a response header, and records handler failures as a
//! span error before translating them to a 500 response.

use std::collections::HashSet;

use hyper::header::{HeaderName, HeaderValue};

use crate::instrumentation::Layer;
use crate::middleware::{DispatchError, DispatchResult, HandlerFuture, Middleware, Next};
use crate::state::{RequestContext, RequestSearch};
use crate::trace::Tracer;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Opens a root span for every request whose pathname is not in
/// `excluded`, and closes it however the chain resolves — success,
/// short-circuit, or error.
pub struct TraceMiddleware {
    tracer: Tracer,
    excluded: HashSet<String>,
}

impl TraceMiddleware {
    pub fn new(tracer: Tracer, excluded: impl IntoIterator<Item = String>) -> Self {
        TraceMiddleware {
            tracer,
            excluded: excluded.into_iter().collect(),
        }
    }

    fn is_excluded(&self, pathname: &str) -> bool {
        self.excluded.contains(pathname)
    }
}

impl Middleware for TraceMiddleware {
    fn call(&self, mut ctx: RequestContext, next: Next) -> HandlerFuture {
        if self.is_excluded(&ctx.pathname) {
            return next(ctx);
        }

        let span_name = format!("{} {}", ctx.method, ctx.pathname);
        let (trace, span) = self.tracer.start_trace(&span_name, Layer::Request.as_str());
        let trace_id = trace.trace_id().to_owned();

        span.set_attribute("request.method", serde_json::Value::String(ctx.method.to_string()));
        span.set_attribute("request.pathname", serde_json::Value::String(ctx.pathname.clone()));
        let search = ctx.get::<RequestSearch>().and_then(|s| s.0.clone());
        span.set_attribute("request.search", serde_json::Value::String(search.unwrap_or_default()));
        if let Some(incoming_trace_id) = propagated_trace_id(&ctx.headers) {
            span.set_attribute("request.propagated_trace_id", serde_json::Value::String(incoming_trace_id));
        }

        ctx.set_trace(trace);
        ctx.set_active_span(span.clone());

        Box::pin(async move {
            let result: DispatchResult = next(ctx).await;
            match &result {
                Ok(ctx) => {
                    let status = ctx.get::<crate::RenderedResponse>().map(|r| r.0.status().as_u16()).unwrap_or(200);
                    span.set_attribute("response.status", serde_json::Value::from(status));
                    if status >= 400 {
                        span.record_error(&format!("response status {status}"), None);
                    }
                }
                Err(err) => {
                    let class = match err {
                        DispatchError::Middleware(_) => "middleware",
                        DispatchError::Handler(_) => "handler",
                    };
                    span.record_error(&err.to_string(), Some(class));
                }
            }
            span.end();
            result.map(|mut ctx| {
                if let Ok(value) = HeaderValue::from_str(&trace_id) {
                    ctx.headers.insert(HeaderName::from_static(TRACE_ID_HEADER), value);
                }
                ctx
            })
        })
    }
}

/// Reads a propagated trace id from an inbound request header, if any —
/// used when a span started client-side should attach to the same trace
/// rather than starting a new one.
pub fn propagated_trace_id(headers: &hyper::HeaderMap) -> Option<String> {
    headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
}

pub fn default_excluded_paths() -> Vec<String> {
    vec!["/favicon.ico".to_owned(), "/__waypoint/health".to_owned()]
}
