//! The tracer's built-in HTTP surface: an HTML snapshot page, a JSON API,
//! and the streaming endpoint, all mounted under `/__<prefix>` (§6
//! External Interfaces).

use hyper::{Body, Response, StatusCode};

use crate::trace::Tracer;
use crate::transport::{self, ClientSpansPayload, StreamBroadcaster};

/// The three endpoint paths contributed under a router's trace prefix,
/// computed once so request routing is a handful of string comparisons.
#[derive(Debug, Clone)]
pub struct ViewerRoutes {
    pub snapshot: String,
    pub api: String,
    pub stream: String,
}

impl ViewerRoutes {
    pub fn new(prefix: &str) -> Self {
        ViewerRoutes {
            snapshot: format!("/__{prefix}/traces"),
            api: format!("/__{prefix}/api/traces"),
            stream: format!("/__{prefix}/trace-ws"),
        }
    }
}

/// `GET /__<prefix>/traces`: a self-contained HTML page with every
/// retained trace inlined as JSON. `<` and `>` are escaped to their
/// unicode forms so a span name or attribute value cannot close the
/// embedding `<script>` tag early.
pub fn snapshot_page(tracer: &Tracer) -> Response<Body> {
    let traces = tracer.snapshot();
    let json = serde_json::to_string(&traces).unwrap_or_else(|_| "[]".to_owned());
    let html = format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Traces</title></head>\n\
<body>\n<h1>Traces</h1>\n<pre id=\"traces\"></pre>\n\
<script>\nwindow.__TRACES__ = {};\n\
document.getElementById('traces').textContent = JSON.stringify(window.__TRACES__, null, 2);\n\
</script>\n</body></html>\n",
        escape_for_script(&json)
    );
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/html; charset=utf-8")
        .body(Body::from(html))
        .expect("building an HTML response from a valid body never fails")
}

fn escape_for_script(json: &str) -> String {
    json.replace('<', "\\u003c").replace('>', "\\u003e")
}

/// `GET /__<prefix>/api/traces`, optionally narrowed to one trace via
/// `?id=`.
pub fn api_traces(tracer: &Tracer, query: Option<&str>) -> Response<Body> {
    match query.and_then(|q| find_query_param(q, "id")) {
        Some(id) => transport::single_trace_response(tracer, &id),
        None => transport::snapshot_response(tracer),
    }
}

fn find_query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        if parts.next()? != key {
            return None;
        }
        let value = parts.next().unwrap_or("");
        Some(percent_encoding::percent_decode_str(value).decode_utf8_lossy().into_owned())
    })
}

/// `GET /__<prefix>/trace-ws`: registers the caller as a streaming
/// observer, sending a snapshot of retained traces first and every
/// subsequent subscriber event after that.
pub fn connect_stream(broadcaster: &StreamBroadcaster, tracer: &Tracer) -> Response<Body> {
    broadcaster.connect(tracer)
}

/// The inbound half of cross-origin span merging: a browser reporting
/// spans for a trace this router started.
pub fn accept_client_spans(tracer: &Tracer, payload: ClientSpansPayload) -> Response<Body> {
    transport::merge_client_spans(tracer, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_to_string(response: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn snapshot_page_escapes_angle_brackets_in_span_data() {
        let tracer = Tracer::new(16);
        let (_trace, span) = tracer.start_trace("<script>alert(1)</script>", "routing");
        span.end();
        let page = snapshot_page(&tracer);
        let body = body_to_string(page).await;
        assert!(!body.contains("<script>alert"));
        assert!(body.contains("\\u003cscript\\u003e"));
    }

    #[test]
    fn api_traces_without_id_returns_the_full_snapshot() {
        let tracer = Tracer::new(16);
        tracer.start_trace("a", "routing");
        let response = api_traces(&tracer, None);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn api_traces_with_unknown_id_404s() {
        let tracer = Tracer::new(16);
        let response = api_traces(&tracer, Some("id=nope"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn api_traces_with_known_id_200s() {
        let tracer = Tracer::new(16);
        let (trace, _span) = tracer.start_trace("a", "routing");
        let response = api_traces(&tracer, Some(&format!("id={}", trace.trace_id())));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn route_paths_are_prefixed_and_namespaced() {
        let routes = ViewerRoutes::new("waypoint");
        assert_eq!(routes.snapshot, "/__waypoint/traces");
        assert_eq!(routes.api, "/__waypoint/api/traces");
        assert_eq!(routes.stream, "/__waypoint/trace-ws");
    }
}
