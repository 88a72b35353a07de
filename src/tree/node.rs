//! A single node in the route tree (§3 Route Node, §4.5).

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RouteConfig;
use crate::segment::Segment;

/// Index of a node within a `RouteTree`'s arena. Stable for the lifetime of
/// the node (removal does not renumber surviving nodes).
pub type NodeId = usize;

/// An opaque handle to whatever the embedding application loaded for a
/// route's backing file (a compiled template, a module object, ...).
/// Waypoint never inspects it; UI rendering and module loading are external
/// collaborators (see spec §1 Out of scope).
pub type ModuleHandle = Arc<dyn Any + Send + Sync>;

/// Flags describing the role a node plays in the tree, independent of its
/// position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// This node is the index route of its parent (`index.*`).
    pub is_index: bool,
    /// This node wraps its descendants during rendering (`_layout.*`).
    pub is_layout: bool,
    /// Reserved for fidelity with the data model; middleware files never
    /// become tree nodes (they live in the tree's side table instead, see
    /// `RouteTree::middleware_for`), so this is always `false` in practice.
    pub is_middleware: bool,
}

/// A node in the route tree: a URL path, its backing file, and the tree
/// topology around it.
#[derive(Debug, Clone)]
pub struct RouteNode {
    id: String,
    path: String,
    segments: Vec<Segment>,
    file_path: PathBuf,
    flags: NodeFlags,
    module: Option<ModuleHandle>,
    config: Option<RouteConfig>,
    score: f64,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl RouteNode {
    pub(crate) fn new(id: String, path: String, file_path: PathBuf, flags: NodeFlags) -> Self {
        let segments = crate::segment::parse_segments(&path);
        let score = crate::score::score_segments(&segments);
        RouteNode {
            id,
            path,
            segments,
            file_path,
            flags,
            module: None,
            config: None,
            score,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Synthetic root node, path "/".
    pub(crate) fn root() -> Self {
        RouteNode::new(
            String::new(),
            "/".to_owned(),
            PathBuf::new(),
            NodeFlags {
                is_index: true,
                ..NodeFlags::default()
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn is_index(&self) -> bool {
        self.flags.is_index
    }

    pub fn is_layout(&self) -> bool {
        self.flags.is_layout
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn module(&self) -> Option<&ModuleHandle> {
        self.module.as_ref()
    }

    pub fn set_module(&mut self, module: Option<ModuleHandle>) {
        self.module = module;
    }

    pub fn config(&self) -> Option<&RouteConfig> {
        self.config.as_ref()
    }

    pub fn set_config(&mut self, config: Option<RouteConfig>) {
        self.config = config;
    }

    /// Drops the cached module and configuration, as the watcher does when a
    /// route file changes on disk (§4.6).
    pub fn invalidate(&mut self) {
        self.module = None;
        self.config = None;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) {
        self.children.retain(|&c| c != child);
    }
}
