//! Instrumentation layers (§4.12): named wrapping contracts that open a
//! child span tagged with a fixed `layer` name so viewers can group and
//! color spans by the part of the stack that produced them, without each
//! layer needing its own bespoke span type — the data underneath every
//! layer is the same `Span`. Each adapter function assumes its caller has
//! already opened the layer-tagged span (typically via [`instrument`] or
//! [`crate::state::RequestContext::enter_span`]) and just records the
//! attributes or events that layer's contract calls for.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::state::RequestContext;
use crate::trace::SpanHandle;

/// The instrumentation layers a request can pass through (§1). Stored on
/// `Span::layer` as `as_str()`. Cache lookups, though given their own
/// contract in §4.12, are not a layer of their own — they're recorded
/// against the `data` layer's span, the same as loader work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Request,
    Routing,
    Data,
    Forms,
    Signals,
    Rpc,
    Database,
    Auth,
    Islands,
    Build,
    Errors,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Request => "request",
            Layer::Routing => "routing",
            Layer::Data => "data",
            Layer::Forms => "forms",
            Layer::Signals => "signals",
            Layer::Rpc => "rpc",
            Layer::Database => "database",
            Layer::Auth => "auth",
            Layer::Islands => "islands",
            Layer::Build => "build",
            Layer::Errors => "errors",
        }
    }
}

/// Opens a child span under the request's active span, tagged with
/// `layer`, runs `body`, and ends the span regardless of whether `body`
/// returned an error — recording the error on the span first, tagged
/// with `body`'s error type name as `error.class` since that's the only
/// notion of "typed error" available to a generic wrapper like this one.
pub async fn instrument<F, Fut, T, E>(ctx: &mut RequestContext, layer: Layer, name: &str, body: F) -> Result<T, E>
where
    F: FnOnce(SpanHandle) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let span = ctx.enter_span(name, layer.as_str());
    let result = match &span {
        Some(span) => body(span.clone()).await,
        None => body(noop_span()).await,
    };
    if let (Err(err), Some(span)) = (&result, &span) {
        span.record_error(&err.to_string(), Some(std::any::type_name::<E>()));
    }
    if let Some(span) = &span {
        span.end();
    }
    result
}

/// A detached span for instrumentation call sites outside a traced
/// request (e.g. tests). Its events and attributes are recorded but
/// never observed by any subscriber since it belongs to no stored trace.
fn noop_span() -> SpanHandle {
    let tracer = crate::trace::Tracer::new(1);
    let (_trace, span) = tracer.start_trace("untraced", Layer::Request.as_str());
    span
}

/// Truncates `s` to at most `max` characters, appending an ellipsis when
/// truncated.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

// ---------------------------------------------------------------------
// routing
// ---------------------------------------------------------------------

/// `routing` layer, span name `route.match`: a successful match.
pub fn record_route_match(span: &SpanHandle, pattern: &str, route_id: &str, params: &Value, layouts: &[String]) {
    span.set_attribute("route.pattern", Value::String(pattern.to_owned()));
    span.set_attribute("route.id", Value::String(route_id.to_owned()));
    span.set_attribute("route.params", params.clone());
    span.set_attribute("route.layouts", Value::String(layouts.join(",")));
}

/// `routing` layer, span name `route.match`: no route matched the path.
pub fn record_route_miss(span: &SpanHandle) {
    span.set_attribute("route.matched", Value::Bool(false));
    span.event("404", HashMap::new());
}

// ---------------------------------------------------------------------
// data / loader
// ---------------------------------------------------------------------

/// `data` layer, span name `loader:<key>`.
pub fn record_loader(span: &SpanHandle, key: &str, duration_ms: u64, cache_hit: bool, source: &str, waiting_for: &[String]) {
    span.set_attribute("loader.key", Value::String(key.to_owned()));
    span.set_attribute("loader.duration_ms", json!(duration_ms));
    span.set_attribute("loader.cache_hit", Value::Bool(cache_hit));
    span.set_attribute("loader.source", Value::String(source.to_owned()));
    span.set_attribute("loader.waiting_for", json!(waiting_for));
}

/// One already-finished loader invocation, as handed to
/// [`record_collected_loaders`].
#[derive(Debug, Clone)]
pub struct LoaderMetric {
    pub key: String,
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub source: String,
    pub waiting_for: Vec<String>,
}

/// Records loader work that already ran and completed before tracing
/// could wrap it live, as sibling child spans under `parent` — each
/// opened, attributed, and closed immediately.
pub fn record_collected_loaders(parent: &SpanHandle, loaders: &[LoaderMetric]) {
    for loader in loaders {
        let span = parent.child(&format!("loader:{}", loader.key), Layer::Data.as_str());
        record_loader(&span, &loader.key, loader.duration_ms, loader.cache_hit, &loader.source, &loader.waiting_for);
        span.end();
    }
}

/// `data` layer: records `cache.get`/`cache.set`/`cache.invalidate` as
/// span *events*, not attributes — a span may see several lookups and
/// each one is a distinct point in time, not a single overwritten value.
/// Keys longer than 100 characters are truncated with an ellipsis.
pub fn record_cache_get(span: &SpanHandle, key: &str, hit: bool) {
    let mut attrs = HashMap::new();
    attrs.insert("key".to_owned(), Value::String(truncate(key, 100)));
    attrs.insert("hit".to_owned(), Value::Bool(hit));
    span.event("cache.get", attrs);
}

pub fn record_cache_set(span: &SpanHandle, key: &str) {
    let mut attrs = HashMap::new();
    attrs.insert("key".to_owned(), Value::String(truncate(key, 100)));
    span.event("cache.set", attrs);
}

pub fn record_cache_invalidate(span: &SpanHandle, key: &str) {
    let mut attrs = HashMap::new();
    attrs.insert("key".to_owned(), Value::String(truncate(key, 100)));
    span.event("cache.invalidate", attrs);
}

// ---------------------------------------------------------------------
// forms
// ---------------------------------------------------------------------

/// `forms` layer, span name `form:<name>`.
pub fn record_form_submission(span: &SpanHandle, form_name: &str, field_count: usize) {
    span.set_attribute("form.name", Value::String(form_name.to_owned()));
    span.set_attribute("form.field_count", json!(field_count));
}

// ---------------------------------------------------------------------
// signals
// ---------------------------------------------------------------------

/// `signals` layer: a single signal's value changed.
pub fn record_signal_update(span: &SpanHandle, signal: &str) {
    let mut attrs = HashMap::new();
    attrs.insert("signal".to_owned(), Value::String(signal.to_owned()));
    span.event("signal.update", attrs);
}

/// `signals` layer: several signals committed together.
pub fn record_signal_batch(span: &SpanHandle, count: usize) {
    let mut attrs = HashMap::new();
    attrs.insert("count".to_owned(), json!(count));
    span.event("signal.batch", attrs);
}

// ---------------------------------------------------------------------
// rpc
// ---------------------------------------------------------------------

/// An RPC's call type, as distinguished by the `rpc` layer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCallType {
    Query,
    Mutation,
    Subscription,
}

impl RpcCallType {
    fn as_str(&self) -> &'static str {
        match self {
            RpcCallType::Query => "query",
            RpcCallType::Mutation => "mutation",
            RpcCallType::Subscription => "subscription",
        }
    }
}

/// `rpc` layer, span name `rpc:<procedure>`.
pub fn record_rpc_call(span: &SpanHandle, procedure: &str, call_type: RpcCallType, ok: bool) {
    span.set_attribute("rpc.procedure", Value::String(procedure.to_owned()));
    span.set_attribute("rpc.call_type", Value::String(call_type.as_str().to_owned()));
    span.set_attribute("rpc.ok", Value::Bool(ok));
}

/// `rpc` layer: a request/response payload was validated against its
/// schema.
pub fn record_rpc_validation(span: &SpanHandle, duration_ms: u64, valid: bool) {
    let mut attrs = HashMap::new();
    attrs.insert("duration_ms".to_owned(), json!(duration_ms));
    attrs.insert("valid".to_owned(), Value::Bool(valid));
    span.event("rpc.validation", attrs);
}

// ---------------------------------------------------------------------
// database
// ---------------------------------------------------------------------

const TRACED_DB_METHODS: [&str; 5] = ["query", "execute", "get", "all", "run"];

/// `database` layer, proxy/decorator entry point (a): wraps a single call
/// to one of the five traced adapter methods (`query`, `execute`, `get`,
/// `all`, `run`), opening span name `db.<method>` and recording a
/// statement (truncated to 200 characters), an optional parameter count,
/// and — once `body` resolves — a row count for list-shaped results via
/// `row_count`.
///
/// A `method` outside the traced set, or a call with no active span on
/// `ctx`, passes straight through to `body` untraced — the same
/// pass-through-for-unknown-methods and skip-on-no-active-span contract
/// the source's transparent proxy gives every other adapter method (§9).
pub async fn trace_db_call<F, Fut, T, E>(
    ctx: &mut RequestContext,
    method: &str,
    statement: &str,
    param_count: Option<usize>,
    row_count: impl FnOnce(&T) -> Option<usize>,
    body: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    if !TRACED_DB_METHODS.contains(&method) || ctx.active_span().is_none() {
        return body().await;
    }
    let span = ctx.enter_span(&format!("db.{method}"), Layer::Database.as_str()).expect("active span checked above");
    span.set_attribute("db.statement", Value::String(truncate(statement, 200)));
    if let Some(count) = param_count {
        span.set_attribute("db.param_count", json!(count));
    }
    let result = body().await;
    if let Ok(value) = &result {
        if let Some(rows) = row_count(value) {
            span.set_attribute("db.rows_returned", json!(rows));
        }
    }
    if let Err(err) = &result {
        span.record_error(&err.to_string(), Some(std::any::type_name::<E>()));
    }
    span.end();
    result
}

/// `database` layer, manual entry point (b): records the same attribute
/// shape as [`trace_db_call`] for a caller that already holds an open
/// span rather than one asking this module to open it.
pub fn record_query(span: &SpanHandle, statement: &str, param_count: Option<usize>, rows_returned: usize) {
    span.set_attribute("db.statement", Value::String(truncate(statement, 200)));
    if let Some(count) = param_count {
        span.set_attribute("db.param_count", json!(count));
    }
    span.set_attribute("db.rows_returned", json!(rows_returned));
}

// ---------------------------------------------------------------------
// auth
// ---------------------------------------------------------------------

/// `auth` layer, span name `auth:<operation>`: the check succeeded.
pub fn record_auth_success(span: &SpanHandle, provider: &str, roles: &[String]) {
    span.set_attribute("auth.provider", Value::String(provider.to_owned()));
    span.set_attribute("auth.roles", json!(roles));
    span.set_attribute("auth.result", Value::String("ok".to_owned()));
}

/// `auth` layer: the check failed. `redirect`, when given, is the
/// location captured from a response-style authorization error.
pub fn record_auth_denied(span: &SpanHandle, provider: &str, roles: &[String], redirect: Option<&str>) {
    span.set_attribute("auth.provider", Value::String(provider.to_owned()));
    span.set_attribute("auth.roles", json!(roles));
    span.set_attribute("auth.result", Value::String("denied".to_owned()));
    if let Some(redirect) = redirect {
        span.set_attribute("auth.redirect", Value::String(redirect.to_owned()));
    }
}

// ---------------------------------------------------------------------
// islands
// ---------------------------------------------------------------------

/// An island's hydration strategy (`config.rs`'s `IslandConfig`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationStrategy {
    Load,
    Idle,
    Visible,
    Media,
    None,
}

impl HydrationStrategy {
    fn as_str(&self) -> &'static str {
        match self {
            HydrationStrategy::Load => "load",
            HydrationStrategy::Idle => "idle",
            HydrationStrategy::Visible => "visible",
            HydrationStrategy::Media => "media",
            HydrationStrategy::None => "none",
        }
    }
}

/// `islands` layer, span name `hydrate:<component>`.
pub fn record_island_mount(span: &SpanHandle, component: &str, strategy: HydrationStrategy, props_size: usize) {
    span.set_attribute("island.component", Value::String(component.to_owned()));
    span.set_attribute("island.strategy", Value::String(strategy.as_str().to_owned()));
    span.set_attribute("island.props_size", json!(props_size));
}

/// `islands` layer: a lighter-weight variant that records the mount as a
/// single event instead of a whole child span.
pub fn record_island_mount_event(span: &SpanHandle, component: &str, strategy: HydrationStrategy) {
    let mut attrs = HashMap::new();
    attrs.insert("component".to_owned(), Value::String(component.to_owned()));
    attrs.insert("strategy".to_owned(), Value::String(strategy.as_str().to_owned()));
    span.event("hydrate", attrs);
}

// ---------------------------------------------------------------------
// build
// ---------------------------------------------------------------------

/// `build` layer, span name `build:<stage>`.
pub fn record_build_stage(span: &SpanHandle, stage: &str, file_count: usize) {
    span.set_attribute("build.stage", Value::String(stage.to_owned()));
    span.set_attribute("build.file_count", json!(file_count));
}

// ---------------------------------------------------------------------
// errors
// ---------------------------------------------------------------------

/// Where an error surfaced, for the `errors` layer's `error.phase`
/// attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    Middleware,
    Loader,
    Action,
    Render,
    Rpc,
    Unknown,
}

impl ErrorPhase {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorPhase::Middleware => "middleware",
            ErrorPhase::Loader => "loader",
            ErrorPhase::Action => "action",
            ErrorPhase::Render => "render",
            ErrorPhase::Rpc => "rpc",
            ErrorPhase::Unknown => "unknown",
        }
    }
}

/// `errors` layer: records the phase an error surfaced in and, for typed
/// errors, its class name, then appends an `error` event carrying the
/// message.
pub fn record_error_outcome(span: &SpanHandle, phase: ErrorPhase, class: Option<&str>, message: &str) {
    span.set_attribute("error.phase", Value::String(phase.as_str().to_owned()));
    if let Some(class) = class {
        span.set_attribute("error.class", Value::String(class.to_owned()));
    }
    let mut attrs = HashMap::new();
    attrs.insert("message".to_owned(), Value::String(message.to_owned()));
    span.event("error", attrs);
}
