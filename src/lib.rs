//! Waypoint — a file-based routing engine and request tracing runtime for
//! server-rendered web applications.
//!
//! Waypoint turns a directory of route files into a scored, matchable
//! route tree (`tree`, `matcher`), dispatches matched requests through a
//! Koa-style middleware chain (`middleware`), and records a hierarchical
//! trace of everything that happens along the way (`trace`,
//! `instrumentation`), exposing it over HTTP (`viewer`, `transport`).
//! Turning a routed request into an actual response body is outside
//! Waypoint's scope — see [`Handler`] and [`RenderedResponse`] for the
//! seam where an embedding application plugs in its own rendering.

pub mod config;
pub mod discovery;
pub mod error;
pub mod ids;
pub mod instrumentation;
pub mod matcher;
pub mod middleware;
pub mod params;
pub mod pattern;
pub mod router;
pub mod score;
pub mod segment;
pub mod state;
pub mod trace;
pub mod trace_middleware;
pub mod transport;
pub mod tree;
pub mod viewer;

pub use error::{Result, RouterError};
pub use middleware::{
    compose_middleware, dispatch, method, path, path_prefix, run, when, DispatchError, DispatchResult, ErrorHandler, HandlerFuture, Middleware,
    Next, PathPattern, Registry, RegistryError,
};
pub use router::{Router, RouterOptions, RouteMatch};
pub use state::RequestContext;
pub use trace::{Span, SpanHandle, Trace, TraceHandle, Tracer};

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use thiserror::Error;

use transport::StreamBroadcaster;
use viewer::ViewerRoutes;

/// Failure starting or running the HTTP listener.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("binding listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Hyper(#[from] hyper::Error),
}

/// A value the embedding application's [`Handler`] stashes on the
/// [`RequestContext`] so the serving loop can turn it into a real HTTP
/// response. Waypoint never constructs a response body itself — matching,
/// middleware, and tracing are in scope; rendering is not.
pub struct RenderedResponse(pub Response<Body>);

/// The terminal step of the middleware chain: turns a matched,
/// middleware-processed request into a response by stashing a
/// [`RenderedResponse`] on the context before returning it.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: RequestContext) -> HandlerFuture;
}

impl<F> Handler for F
where
    F: Fn(RequestContext) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, ctx: RequestContext) -> HandlerFuture {
        (self)(ctx)
    }
}

/// Starts a Waypoint application with the default number of worker
/// threads.
pub fn start<H>(addr: SocketAddr, router: Router, handler: H) -> std::result::Result<(), StartError>
where
    H: Handler,
{
    start_with_num_threads(addr, router, handler, num_cpus::get())
}

/// Starts a Waypoint application with a designated number of worker
/// threads.
pub fn start_with_num_threads<H>(addr: SocketAddr, router: Router, handler: H, threads: usize) -> std::result::Result<(), StartError>
where
    H: Handler,
{
    let runtime = new_runtime(threads);
    runtime.block_on(init_server(addr, router, handler))
}

/// Binds the listener and serves forever. Exposed for applications that
/// want to drive Waypoint from a runtime they already own rather than
/// through [`start`] / [`start_with_num_threads`].
pub async fn init_server<H>(addr: SocketAddr, router: Router, handler: H) -> std::result::Result<(), StartError>
where
    H: Handler,
{
    let router = Arc::new(router);
    let handler: Arc<dyn Handler> = Arc::new(handler);
    let broadcaster = StreamBroadcaster::new();
    router.tracer().subscribe(broadcaster.clone());
    let routes = Arc::new(ViewerRoutes::new("waypoint"));

    log::info!("waypoint listening on http://{addr}");

    let make_service = make_service_fn(move |_conn| {
        let router = router.clone();
        let handler = handler.clone();
        let broadcaster = broadcaster.clone();
        let routes = routes.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req| {
                serve(router.clone(), handler.clone(), broadcaster.clone(), routes.clone(), req)
            }))
        }
    });

    Server::bind(&addr).serve(make_service).await?;
    Ok(())
}

fn new_runtime(threads: usize) -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("waypoint-worker")
        .enable_all()
        .build()
        .expect("failed to build the waypoint runtime")
}

/// Routes one inbound request: the tracer's own endpoints first, then the
/// router's matcher/middleware/handler pipeline for everything else.
async fn serve(
    router: Arc<Router>,
    handler: Arc<dyn Handler>,
    broadcaster: Arc<StreamBroadcaster>,
    routes: Arc<ViewerRoutes>,
    req: Request<Body>,
) -> std::result::Result<Response<Body>, std::convert::Infallible> {
    let method = req.method().clone();
    let pathname = req.uri().path().to_owned();
    let query = req.uri().query().map(str::to_owned);

    if method == Method::GET && pathname == routes.snapshot {
        return Ok(viewer::snapshot_page(router.tracer()));
    }
    if method == Method::GET && pathname == routes.api {
        return Ok(viewer::api_traces(router.tracer(), query.as_deref()));
    }
    if method == Method::GET && pathname == routes.stream {
        return Ok(viewer::connect_stream(&broadcaster, router.tracer()));
    }
    if method == Method::POST && pathname == routes.api {
        let body = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
        let payload: std::result::Result<transport::ClientSpansPayload, _> = serde_json::from_slice(&body);
        return Ok(match payload {
            Ok(payload) => viewer::accept_client_spans(router.tracer(), payload),
            Err(_) => fixed_response(StatusCode::BAD_REQUEST, "invalid client spans payload"),
        });
    }

    let headers = req.headers().clone();
    let result = router.dispatch(method, &pathname, query, headers, Box::new(move |ctx| handler.handle(ctx))).await;

    Ok(match result {
        Ok(mut ctx) => ctx.take::<RenderedResponse>().map(|r| r.0).unwrap_or_else(|| empty_response(StatusCode::NO_CONTENT)),
        Err(RouterError::NotFound(_)) => empty_response(StatusCode::NOT_FOUND),
        Err(err) => {
            log::error!("request failed: {err}");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    })
}

fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder().status(status).body(Body::empty()).expect("building an empty response never fails")
}

fn fixed_response(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder().status(status).body(Body::from(body)).expect("building a fixed-body response never fails")
}
