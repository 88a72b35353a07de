//! Koa-style middleware dispatch: each middleware receives the request
//! context and a `next` continuation, and decides whether, when, and how
//! many times to call it (§4.8).
//!
//! `next` is an owned `FnOnce`, so the "call `next` at most once" rule is
//! enforced by the type system rather than a runtime flag: a middleware
//! that calls it twice simply fails to compile, since the closure is
//! consumed by the first call.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::state::RequestContext;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("middleware failed: {0}")]
    Middleware(String),
    #[error("handler failed: {0}")]
    Handler(String),
}

pub type DispatchResult = Result<RequestContext, DispatchError>;
pub type HandlerFuture = BoxFuture<'static, DispatchResult>;
pub type Next = Box<dyn FnOnce(RequestContext) -> HandlerFuture + Send>;

/// A single link in the middleware chain.
pub trait Middleware: Send + Sync {
    fn call(&self, ctx: RequestContext, next: Next) -> HandlerFuture;
}

impl<F> Middleware for F
where
    F: Fn(RequestContext, Next) -> HandlerFuture + Send + Sync,
{
    fn call(&self, ctx: RequestContext, next: Next) -> HandlerFuture {
        (self)(ctx, next)
    }
}

impl std::fmt::Debug for dyn Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<middleware>")
    }
}

/// Recursively invokes `chain[index..]`, finally calling `handler` once
/// every middleware ahead of it has run (or short-circuited).
pub fn dispatch(
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    ctx: RequestContext,
    handler: Box<dyn FnOnce(RequestContext) -> HandlerFuture + Send>,
) -> HandlerFuture {
    match chain.get(index) {
        None => handler(ctx),
        Some(mw) => {
            let mw = mw.clone();
            let rest = chain.clone();
            let next: Next = Box::new(move |ctx| dispatch(rest, index + 1, ctx, handler));
            mw.call(ctx, next)
        }
    }
}

/// Runs `chain` in full, with `handler` as the terminal step.
pub fn run(
    chain: Arc<[Arc<dyn Middleware>]>,
    ctx: RequestContext,
    handler: Box<dyn FnOnce(RequestContext) -> HandlerFuture + Send>,
) -> HandlerFuture {
    dispatch(chain, 0, ctx, handler)
}

/// Wraps an inner middleware/handler so that an `Err` returned downstream
/// is given to `recover` for translation or logging instead of propagating
/// directly.
pub struct ErrorHandler {
    recover: Arc<dyn Fn(DispatchError) -> DispatchResult + Send + Sync>,
}

impl ErrorHandler {
    pub fn new(recover: impl Fn(DispatchError) -> DispatchResult + Send + Sync + 'static) -> Self {
        ErrorHandler {
            recover: Arc::new(recover),
        }
    }
}

impl Middleware for ErrorHandler {
    fn call(&self, ctx: RequestContext, next: Next) -> HandlerFuture {
        let recover = self.recover.clone();
        Box::pin(async move {
            match next(ctx).await {
                Ok(ctx) => Ok(ctx),
                Err(err) => (recover)(err),
            }
        })
    }
}
