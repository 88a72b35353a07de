//! Small combinators for building conditional or composite middleware
//! without a bespoke `Middleware` impl for every call site (§4.8).

use std::collections::HashSet;
use std::sync::Arc;

use hyper::Method;
use regex::Regex;

use crate::middleware::dispatcher::{dispatch, HandlerFuture, Middleware, Next};
use crate::state::RequestContext;
use crate::tree::is_path_prefix;

struct When<P> {
    predicate: P,
    inner: Arc<dyn Middleware>,
}

impl<P> Middleware for When<P>
where
    P: Fn(&RequestContext) -> bool + Send + Sync,
{
    fn call(&self, ctx: RequestContext, next: Next) -> HandlerFuture {
        if (self.predicate)(&ctx) {
            self.inner.call(ctx, next)
        } else {
            next(ctx)
        }
    }
}

/// Runs `inner` only when `predicate` holds for the request, otherwise
/// skips straight to `next`.
pub fn when(predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static, inner: Arc<dyn Middleware>) -> Arc<dyn Middleware> {
    Arc::new(When { predicate, inner })
}

/// Runs `inner` only for requests whose method is a member of `methods` —
/// shorthand for `when` on request method membership.
pub fn method(methods: impl IntoIterator<Item = Method>, inner: Arc<dyn Middleware>) -> Arc<dyn Middleware> {
    let methods: HashSet<Method> = methods.into_iter().collect();
    when(move |ctx| methods.contains(&ctx.method), inner)
}

/// Runs `inner` only for requests whose pathname falls under `prefix`.
pub fn path_prefix(prefix: String, inner: Arc<dyn Middleware>) -> Arc<dyn Middleware> {
    when(move |ctx| is_path_prefix(&prefix, &ctx.pathname), inner)
}

/// A single pattern accepted by [`path`]: either a literal string
/// (matched per its own rules) or a regex tested directly against the
/// pathname.
pub enum PathPattern {
    Literal(String),
    Regex(Regex),
}

impl PathPattern {
    fn matches(&self, pathname: &str) -> bool {
        match self {
            PathPattern::Literal(pattern) => matches_literal(pattern, pathname),
            PathPattern::Regex(regex) => regex.is_match(pathname),
        }
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        PathPattern::Literal(pattern.to_owned())
    }
}

impl From<String> for PathPattern {
    fn from(pattern: String) -> Self {
        PathPattern::Literal(pattern)
    }
}

impl From<Regex> for PathPattern {
    fn from(pattern: Regex) -> Self {
        PathPattern::Regex(pattern)
    }
}

/// A string pattern matches by exact equality; a wildcard suffix `/*`
/// matches by prefix on the leading segment; otherwise it matches by
/// prefix, requiring `/` at the boundary the way [`is_path_prefix`] does.
fn matches_literal(pattern: &str, pathname: &str) -> bool {
    if let Some(leading) = pattern.strip_suffix("/*") {
        return pathname.starts_with(leading);
    }
    if pattern == pathname {
        return true;
    }
    is_path_prefix(pattern, pathname)
}

/// Runs `inner` only for requests whose pathname matches at least one of
/// `patterns`.
pub fn path(patterns: Vec<PathPattern>, inner: Arc<dyn Middleware>) -> Arc<dyn Middleware> {
    when(move |ctx| patterns.iter().any(|pattern| pattern.matches(&ctx.pathname)), inner)
}

struct Composed(Arc<[Arc<dyn Middleware>]>);

impl Middleware for Composed {
    fn call(&self, ctx: RequestContext, next: Next) -> HandlerFuture {
        dispatch(self.0.clone(), 0, ctx, next)
    }
}

/// Flattens a fixed sequence of middleware into a single `Middleware`,
/// useful for registering a named group as one registry entry.
pub fn compose_middleware(chain: Vec<Arc<dyn Middleware>>) -> Arc<dyn Middleware> {
    Arc::new(Composed(Arc::from(chain)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Params;
    use hyper::HeaderMap;

    struct Tag(&'static str);
    impl Middleware for Tag {
        fn call(&self, mut ctx: RequestContext, next: Next) -> HandlerFuture {
            ctx.put(self.0);
            next(ctx)
        }
    }

    fn ctx(method: Method, path: &str) -> RequestContext {
        RequestContext::new(method, path.into(), HeaderMap::new(), Params::new())
    }

    #[tokio::test]
    async fn when_skips_inner_if_predicate_is_false() {
        let mw = method([Method::POST], Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::GET, "/"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), None);
    }

    #[tokio::test]
    async fn when_runs_inner_if_predicate_is_true() {
        let mw = method([Method::GET], Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::GET, "/"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"ran"));
    }

    #[tokio::test]
    async fn method_matches_any_member_of_the_set() {
        let mw = method([Method::PUT, Method::PATCH], Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::PATCH, "/"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"ran"));
    }

    #[tokio::test]
    async fn path_prefix_matches_only_under_the_prefix() {
        let mw = path_prefix("/api".into(), Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::GET, "/public"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), None);

        let result = mw
            .call(ctx(Method::GET, "/api/posts"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"ran"));
    }

    #[tokio::test]
    async fn path_matches_exact_string() {
        let mw = path(vec!["/health".into()], Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::GET, "/health"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"ran"));

        let result = mw
            .call(ctx(Method::GET, "/health/deep"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), None);
    }

    #[tokio::test]
    async fn path_matches_wildcard_suffix_as_a_leading_segment_prefix() {
        let mw = path(vec!["/api/*".into()], Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::GET, "/api-docs"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"ran"));
    }

    #[tokio::test]
    async fn path_matches_plain_prefix_at_a_segment_boundary() {
        let mw = path(vec!["/api".into()], Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::GET, "/api/posts"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"ran"));

        let result = mw
            .call(ctx(Method::GET, "/apiary"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), None);
    }

    #[tokio::test]
    async fn path_matches_a_regex_pattern_directly() {
        let mw = path(vec![Regex::new(r"^/posts/\d+$").unwrap().into()], Arc::new(Tag("ran")));
        let result = mw
            .call(ctx(Method::GET, "/posts/42"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"ran"));

        let result = mw
            .call(ctx(Method::GET, "/posts/abc"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), None);
    }

    #[tokio::test]
    async fn compose_middleware_runs_members_in_order() {
        let composed = compose_middleware(vec![Arc::new(Tag("a")), Arc::new(Tag("b"))]);
        let result = composed
            .call(ctx(Method::GET, "/"), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(result.get::<&'static str>(), Some(&"b"));
    }
}
