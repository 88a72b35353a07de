//! Middleware registry and Koa-style recursive dispatcher (§4.8).

pub mod combinators;
pub mod dispatcher;
pub mod registry;

pub use combinators::{compose_middleware, method, path, path_prefix, when, PathPattern};
pub use dispatcher::{dispatch, run, DispatchError, DispatchResult, ErrorHandler, HandlerFuture, Middleware, Next};
pub use registry::{Registry, RegistryError};
