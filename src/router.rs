//! Wires the route tree, matcher, middleware registry, and tracer into a
//! single orchestration point (§6 External Interfaces).
//!
//! `Router` never renders anything itself: matching a request produces a
//! merged [`RouteConfig`], a resolved middleware chain, and whatever
//! opaque [`ModuleHandle`] the embedding application attached to the
//! matched node; turning that into a response is the caller's job (see
//! spec §1 Out of scope).

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use hyper::{HeaderMap, Method};

use crate::config::{merge_route_configs, MiddlewareRef, RouteConfig};
use crate::discovery;
use crate::error::{Result, RouterError};
use crate::matcher::{Params, RouteMatcher};
use crate::middleware::{run, HandlerFuture, Middleware, Registry};
use crate::state::RequestContext;
use crate::trace::Tracer;
use crate::trace_middleware::{self, TraceMiddleware};
use crate::tree::{ModuleHandle, NodeId, RouteTree};

/// Builder for [`Router`]. Mirrors §6's recognized configuration keys:
/// `routesDir`, `basePath`, `extensions`, `watch`.
pub struct RouterOptions {
    routes_dir: PathBuf,
    base_path: String,
    extensions: Vec<String>,
    watch: bool,
    trace_capacity: usize,
    excluded_trace_paths: Vec<String>,
}

impl RouterOptions {
    pub fn new(routes_dir: impl Into<PathBuf>) -> Self {
        RouterOptions {
            routes_dir: routes_dir.into(),
            base_path: String::new(),
            extensions: discovery::default_extensions().iter().map(|s| (*s).to_owned()).collect(),
            watch: false,
            trace_capacity: 1000,
            excluded_trace_paths: trace_middleware::default_excluded_paths(),
        }
    }

    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    pub fn excluded_trace_paths(mut self, paths: Vec<String>) -> Self {
        self.excluded_trace_paths = paths;
        self
    }

    /// Performs the initial directory scan and builds the tree, matcher,
    /// tracer, and (if requested, behind the `watch` feature) the
    /// background watcher.
    pub fn build(self, registry: Registry) -> Result<Router> {
        Router::build(self, registry)
    }
}

/// A single matched route: its node, bound parameters, merged
/// configuration (outermost layout first, own config last), and whatever
/// module the embedding application attached.
#[derive(Clone)]
pub struct RouteMatch {
    pub node_id: NodeId,
    pub pathname: String,
    pub params: Params,
    pub config: RouteConfig,
    pub module: Option<ModuleHandle>,
}

/// Orchestrates route matching, configuration merging, middleware
/// resolution, and request tracing.
pub struct Router {
    tree: Arc<RwLock<RouteTree>>,
    matcher: Arc<RwLock<RouteMatcher>>,
    registry: Arc<Registry>,
    tracer: Tracer,
    trace_middleware: Arc<TraceMiddleware>,
    base_path: String,
    #[cfg(feature = "watch")]
    _watcher: Option<notify::RecommendedWatcher>,
}

impl Router {
    fn build(options: RouterOptions, registry: Registry) -> Result<Router> {
        let extension_refs: Vec<&str> = options.extensions.iter().map(String::as_str).collect();
        let files = discovery::scan_directory(&options.routes_dir, &extension_refs)?;
        log::info!("discovered {} route file(s) under {:?}", files.len(), options.routes_dir);

        let tree = RouteTree::build(&files);
        let matcher = RouteMatcher::build(&tree);
        let tree = Arc::new(RwLock::new(tree));
        let matcher = Arc::new(RwLock::new(matcher));

        let tracer = Tracer::new(options.trace_capacity);
        let trace_middleware = Arc::new(TraceMiddleware::new(tracer.clone(), options.excluded_trace_paths.clone()));

        #[cfg(feature = "watch")]
        let watcher = if options.watch {
            let (watcher, events) = discovery::watcher::watch(&options.routes_dir, options.extensions.clone())?;
            spawn_watch_loop(tree.clone(), matcher.clone(), options.routes_dir.clone(), options.extensions.clone(), events);
            Some(watcher)
        } else {
            None
        };
        #[cfg(not(feature = "watch"))]
        let _ = options.watch;

        Ok(Router {
            tree,
            matcher,
            registry: Arc::new(registry),
            tracer,
            trace_middleware,
            base_path: options.base_path,
            #[cfg(feature = "watch")]
            _watcher: watcher,
        })
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn trace_middleware(&self) -> Arc<TraceMiddleware> {
        self.trace_middleware.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn find_node(&self, pathname: &str) -> Option<NodeId> {
        self.tree.read().expect("route tree lock poisoned").find_by_path(pathname)
    }

    /// Sets the cached module handle for `node_id`, as an embedding
    /// application would after loading (or reloading) a route file.
    pub fn set_module(&self, node_id: NodeId, module: Option<ModuleHandle>) -> Result<()> {
        let mut tree = self.tree.write().expect("route tree lock poisoned");
        match tree.get_mut(node_id) {
            Some(node) => {
                node.set_module(module);
                Ok(())
            }
            None => Err(RouterError::NotFound(format!("node {node_id}"))),
        }
    }

    /// Sets the parsed `config` export for `node_id` (§4.7).
    pub fn set_config(&self, node_id: NodeId, config: Option<RouteConfig>) -> Result<()> {
        let mut tree = self.tree.write().expect("route tree lock poisoned");
        match tree.get_mut(node_id) {
            Some(node) => {
                node.set_config(config);
                Ok(())
            }
            None => Err(RouterError::NotFound(format!("node {node_id}"))),
        }
    }

    /// Matches `pathname` and merges configuration along its layout chain,
    /// outermost first, with the matched node's own config applied last.
    pub fn resolve(&self, pathname: &str) -> Result<RouteMatch> {
        let tree = self.tree.read().expect("route tree lock poisoned");
        let matcher = self.matcher.read().expect("route matcher lock poisoned");

        let matched = matcher
            .match_path(&tree, pathname)
            .ok_or_else(|| RouterError::NotFound(pathname.to_owned()))?;

        let mut config = RouteConfig::default();
        for ancestor in &matched.layout_chain {
            if let Some(ancestor_config) = tree.get(*ancestor).and_then(|n| n.config()) {
                config = merge_route_configs(&config, ancestor_config);
            }
        }
        if let Some(own_config) = tree.get(matched.node_id).and_then(|n| n.config()) {
            config = merge_route_configs(&config, own_config);
        }

        let module = tree.get(matched.node_id).and_then(|n| n.module()).cloned();

        Ok(RouteMatch {
            node_id: matched.node_id,
            pathname: matched.pathname,
            params: matched.params,
            config,
            module,
        })
    }

    /// Resolves a matched route's `config.middleware` names through the
    /// registry into a concrete, order-validated chain.
    pub fn middleware_chain(&self, route_match: &RouteMatch) -> Result<Vec<Arc<dyn Middleware>>> {
        let names: Vec<MiddlewareRef> = route_match.config.middleware.clone();
        Ok(self.registry.resolve(&names)?)
    }

    /// Matches `pathname`, resolves its middleware, and runs the full
    /// chain with the root trace middleware wrapped around it, handing
    /// `handler` the terminal step.
    pub async fn dispatch(
        &self,
        method: Method,
        pathname: &str,
        search: Option<String>,
        headers: HeaderMap,
        handler: Box<dyn FnOnce(RequestContext) -> HandlerFuture + Send>,
    ) -> Result<RequestContext> {
        let route_match = self.resolve(pathname)?;
        let resolved = self.middleware_chain(&route_match)?;

        let mut full_chain: Vec<Arc<dyn Middleware>> = Vec::with_capacity(resolved.len() + 1);
        full_chain.push(self.trace_middleware.clone());
        full_chain.extend(resolved);

        let mut ctx = RequestContext::new(method, route_match.pathname.clone(), headers, route_match.params.clone());
        ctx.put(crate::state::RequestSearch(search));
        ctx.put(route_match);

        run(Arc::from(full_chain), ctx, handler).await.map_err(RouterError::from)
    }
}

#[cfg(feature = "watch")]
fn spawn_watch_loop(
    tree: Arc<RwLock<RouteTree>>,
    matcher: Arc<RwLock<RouteMatcher>>,
    routes_dir: PathBuf,
    extensions: Vec<String>,
    events: std::sync::mpsc::Receiver<discovery::FileEvent>,
) {
    std::thread::spawn(move || {
        let extension_refs: Vec<&str> = extensions.iter().map(String::as_str).collect();
        for event in events {
            apply_file_event(&tree, &matcher, &routes_dir, &extension_refs, event);
        }
    });
}

#[cfg(feature = "watch")]
fn apply_file_event(
    tree: &RwLock<RouteTree>,
    matcher: &RwLock<RouteMatcher>,
    routes_dir: &std::path::Path,
    extensions: &[&str],
    event: discovery::FileEvent,
) {
    use discovery::FileEvent;

    match event {
        FileEvent::Remove(id) => {
            let node_id = tree.read().expect("route tree lock poisoned").find_by_id(&id);
            if let Some(node_id) = node_id {
                tree.write().expect("route tree lock poisoned").remove_by_id(&id);
                matcher.write().expect("route matcher lock poisoned").remove(node_id);
                log::info!("route {id:?} removed");
            }
        }
        FileEvent::Change(id) => {
            let mut tree = tree.write().expect("route tree lock poisoned");
            if let Some(node_id) = tree.find_by_id(&id) {
                if let Some(node) = tree.get_mut(node_id) {
                    node.invalidate();
                }
            }
            log::debug!("route {id:?} changed, cache invalidated");
        }
        FileEvent::Reload(id) => match discovery::scan_directory(routes_dir, extensions) {
            Ok(files) => {
                let new_tree = RouteTree::build(&files);
                let new_matcher = RouteMatcher::build(&new_tree);
                *tree.write().expect("route tree lock poisoned") = new_tree;
                *matcher.write().expect("route matcher lock poisoned") = new_matcher;
                log::info!("routes reloaded after change to {id:?}");
            }
            Err(err) => log::warn!("failed to rescan routes directory after {id:?} appeared: {err}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MiddlewareRef;
    use crate::middleware::dispatcher::Next;
    use std::fs;

    fn route_tree_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.tsx"), "").unwrap();
        fs::write(dir.path().join("about.tsx"), "").unwrap();
        fs::create_dir(dir.path().join("blog")).unwrap();
        fs::write(dir.path().join("blog/index.tsx"), "").unwrap();
        fs::write(dir.path().join("blog/[slug].tsx"), "").unwrap();
        dir
    }

    #[test]
    fn resolve_matches_a_dynamic_route_with_params() {
        let dir = route_tree_fixture();
        let router = RouterOptions::new(dir.path()).build(Registry::new()).unwrap();
        let m = router.resolve("/blog/hello").unwrap();
        assert_eq!(m.params.get("slug").unwrap().as_str(), Some("hello"));
    }

    #[test]
    fn resolve_fails_for_an_unmatched_path() {
        let dir = route_tree_fixture();
        let router = RouterOptions::new(dir.path()).build(Registry::new()).unwrap();
        assert!(matches!(router.resolve("/nope"), Err(RouterError::NotFound(_))));
    }

    #[test]
    fn resolve_merges_config_along_the_layout_chain() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("_layout.tsx"), "").unwrap();
        fs::create_dir(dir.path().join("blog")).unwrap();
        fs::write(dir.path().join("blog/_layout.tsx"), "").unwrap();
        fs::write(dir.path().join("blog/[slug].tsx"), "").unwrap();

        let router = RouterOptions::new(dir.path()).build(Registry::new()).unwrap();

        let root_layout = router.find_node("/").unwrap();
        router
            .set_config(
                root_layout,
                Some(RouteConfig {
                    middleware: vec![MiddlewareRef::Named("a".into())],
                    ..RouteConfig::default()
                }),
            )
            .unwrap();
        let blog_layout = router.find_node("/blog").unwrap();
        router
            .set_config(
                blog_layout,
                Some(RouteConfig {
                    middleware: vec![MiddlewareRef::Named("b".into())],
                    ..RouteConfig::default()
                }),
            )
            .unwrap();

        let m = router.resolve("/blog/hello").unwrap();
        assert_eq!(
            m.config.middleware,
            vec![MiddlewareRef::Named("a".into()), MiddlewareRef::Named("b".into())]
        );
    }

    #[tokio::test]
    async fn dispatch_runs_resolved_middleware_and_attaches_a_trace_header() {
        struct Tag(&'static str);
        impl Middleware for Tag {
            fn call(&self, mut ctx: RequestContext, next: Next) -> HandlerFuture {
                ctx.put(self.0);
                next(ctx)
            }
        }

        let dir = route_tree_fixture();
        let mut registry = Registry::new();
        registry.register("tagger", Arc::new(Tag("tagged")), &[], &[]).unwrap();

        let router = RouterOptions::new(dir.path()).build(registry).unwrap();
        let about = router.find_node("/about").unwrap();
        router
            .set_config(
                about,
                Some(RouteConfig {
                    middleware: vec![MiddlewareRef::Named("tagger".into())],
                    ..RouteConfig::default()
                }),
            )
            .unwrap();

        let ctx = router
            .dispatch(Method::GET, "/about", None, HeaderMap::new(), Box::new(|ctx| Box::pin(async move { Ok(ctx) })))
            .await
            .unwrap();
        assert_eq!(ctx.get::<&'static str>(), Some(&"tagged"));
        assert!(ctx.headers.contains_key(trace_middleware::TRACE_ID_HEADER));
    }

    #[test]
    fn dispatch_middleware_resolution_fails_for_unregistered_name() {
        let dir = route_tree_fixture();
        let router = RouterOptions::new(dir.path()).build(Registry::new()).unwrap();
        let about = router.find_node("/about").unwrap();
        router
            .set_config(
                about,
                Some(RouteConfig {
                    middleware: vec![MiddlewareRef::Named("missing".into())],
                    ..RouteConfig::default()
                }),
            )
            .unwrap();
        let route_match = router.resolve("/about").unwrap();
        assert!(router.middleware_chain(&route_match).is_err());
    }

    #[cfg(feature = "watch")]
    #[tokio::test]
    async fn watching_router_picks_up_a_new_route_file() {
        let dir = route_tree_fixture();
        let router = RouterOptions::new(dir.path()).watch(true).build(Registry::new()).unwrap();
        assert!(router.find_node("/contact").is_none());

        fs::write(dir.path().join("contact.tsx"), "").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert!(router.find_node("/contact").is_some());
    }
}
