//! Hierarchical route tree: node graph plus the middleware side table
//! (§3 Route Tree, §4.5).

pub mod node;

use std::path::PathBuf;

pub use node::{ModuleHandle, NodeFlags, NodeId, RouteNode};

/// One file discovered under the routes directory, relative path
/// forward-slash normalized regardless of host OS (§4.6).
#[derive(Debug, Clone)]
pub struct RouteFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

/// A middleware file attached to a URL prefix.
#[derive(Debug, Clone)]
pub struct MiddlewareEntry {
    pub prefix: String,
    pub file_path: PathBuf,
}

/// The node graph plus the path-keyed middleware side table.
pub struct RouteTree {
    nodes: Vec<Option<RouteNode>>,
    root: NodeId,
    middleware: Vec<MiddlewareEntry>,
}

fn is_group_segment(segment: &str) -> bool {
    segment.len() > 1 && segment.starts_with('(') && segment.ends_with(')')
}

fn strip_extension(relative_path: &str) -> &str {
    match relative_path.rfind('.') {
        Some(idx) if relative_path[idx + 1..].find('/').is_none() => &relative_path[..idx],
        _ => relative_path,
    }
}

fn is_middleware_file(relative_no_ext: &str) -> bool {
    relative_no_ext
        .rsplit('/')
        .next()
        .map(|last| last == "_middleware")
        .unwrap_or(false)
}

/// Translates a route file's extension-stripped relative path into its URL
/// path and node flags: strips an `index` / `_layout` final segment
/// (recording the corresponding flag), and removes `(group)` segments.
fn compute_route_path(relative_no_ext: &str) -> (String, NodeFlags) {
    let mut flags = NodeFlags::default();
    let mut parts: Vec<&str> = relative_no_ext.split('/').filter(|s| !s.is_empty()).collect();

    match parts.last().copied() {
        Some("index") => {
            flags.is_index = true;
            parts.pop();
        }
        Some("_layout") => {
            flags.is_layout = true;
            parts.pop();
        }
        _ => {}
    }

    let kept: Vec<&str> = parts.into_iter().filter(|p| !is_group_segment(p)).collect();
    let path = if kept.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", kept.join("/"))
    };
    (path, flags)
}

/// Translates a `_middleware` file's extension-stripped relative path into
/// the URL prefix it applies to.
fn compute_middleware_prefix(relative_no_ext: &str) -> String {
    let mut parts: Vec<&str> = relative_no_ext.split('/').filter(|s| !s.is_empty()).collect();
    if parts.last().copied() == Some("_middleware") {
        parts.pop();
    }
    let kept: Vec<&str> = parts.into_iter().filter(|p| !is_group_segment(p)).collect();
    if kept.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", kept.join("/"))
    }
}

impl RouteTree {
    /// Builds a tree from a flat file set. Middleware files (ending segment
    /// `_middleware`) are partitioned into the side table; everything else
    /// becomes a node. Layouts are processed before non-layouts, then
    /// lexically, so that a directory's layout exists before its children
    /// need to parent onto it.
    pub fn build(files: &[RouteFile]) -> RouteTree {
        let mut tree = RouteTree {
            nodes: vec![Some(RouteNode::root())],
            root: 0,
            middleware: Vec::new(),
        };

        let mut route_files: Vec<&RouteFile> = Vec::new();
        for file in files {
            let no_ext = strip_extension(&file.relative_path);
            if is_middleware_file(no_ext) {
                tree.middleware.push(MiddlewareEntry {
                    prefix: compute_middleware_prefix(no_ext),
                    file_path: file.absolute_path.clone(),
                });
            } else {
                route_files.push(file);
            }
        }

        route_files.sort_by(|a, b| {
            let a_no_ext = strip_extension(&a.relative_path);
            let b_no_ext = strip_extension(&b.relative_path);
            let a_is_layout = a_no_ext.rsplit('/').next() == Some("_layout");
            let b_is_layout = b_no_ext.rsplit('/').next() == Some("_layout");
            b_is_layout
                .cmp(&a_is_layout)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });

        tree.middleware.sort_by(|a, b| {
            a.prefix
                .cmp(&b.prefix)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });

        for file in route_files {
            tree.insert_route_file(file);
        }

        tree
    }

    fn insert_route_file(&mut self, file: &RouteFile) {
        let id = strip_extension(&file.relative_path).to_owned();
        let (path, flags) = compute_route_path(&id);

        let node = RouteNode::new(id, path.clone(), file.absolute_path.clone(), flags);
        let node_id = self.nodes.len();
        self.nodes.push(Some(node));

        let parent_id = self.resolve_parent(&path, node_id);
        self.nodes[node_id].as_mut().unwrap().set_parent(Some(parent_id));
        self.nodes[parent_id].as_mut().unwrap().add_child(node_id);
    }

    /// Walks `path`'s segments, popping one at a time, until an existing
    /// node (other than `exclude`) is found at that prefix; falls back to
    /// the synthetic root.
    fn resolve_parent(&self, path: &str, exclude: NodeId) -> NodeId {
        let mut candidate = path.to_owned();
        loop {
            if let Some(found) = self.find_by_path_excluding(&candidate, exclude) {
                return found;
            }
            match candidate.rfind('/') {
                Some(0) => return self.root,
                Some(idx) => candidate.truncate(idx),
                None => return self.root,
            }
        }
    }

    fn find_by_path_excluding(&self, path: &str, exclude: NodeId) -> Option<NodeId> {
        self.nodes.iter().enumerate().find_map(|(id, slot)| {
            slot.as_ref().and_then(|n| {
                if id != exclude && n.path() == path {
                    Some(id)
                } else {
                    None
                }
            })
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&RouteNode> {
        self.nodes.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut RouteNode> {
        self.nodes.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// All resident nodes (excludes the synthetic root and tombstoned
    /// removed slots), in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &RouteNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(id, _)| *id != self.root)
            .filter_map(|(id, slot)| slot.as_ref().map(|n| (id, n)))
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.nodes.iter().enumerate().find_map(|(node_id, slot)| {
            slot.as_ref().and_then(|n| (n.id() == id).then(|| node_id))
        })
    }

    /// Finds a resident, non-synthetic node at `path`. The synthetic root
    /// also has path "/" but is never returned here — it has no backing
    /// file and is not itself a route.
    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        self.nodes.iter().enumerate().find_map(|(node_id, slot)| {
            slot.as_ref().and_then(|n| {
                (node_id != self.root && n.path() == path).then(|| node_id)
            })
        })
    }

    /// Depth-first removal by route id: splices the node from its parent's
    /// children, reparenting any of its own children onto that parent so
    /// the tree stays connected.
    pub fn remove_by_id(&mut self, id: &str) -> Option<RouteNode> {
        let node_id = self.find_by_id(id)?;
        let parent_id = self.nodes[node_id].as_ref()?.parent().unwrap_or(self.root);
        let children: Vec<NodeId> = self.nodes[node_id].as_ref()?.children().to_vec();

        if let Some(parent) = self.nodes[parent_id].as_mut() {
            parent.remove_child(node_id);
        }
        for child in &children {
            if let Some(c) = self.nodes[*child].as_mut() {
                c.set_parent(Some(parent_id));
            }
            if let Some(parent) = self.nodes[parent_id].as_mut() {
                parent.add_child(*child);
            }
        }

        self.nodes[node_id].take()
    }

    /// Ancestors (and self) marked as a layout, outermost first.
    pub fn layout_chain(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(node_id);
        while let Some(id) = current {
            if let Some(node) = self.get(id) {
                if node.is_layout() {
                    chain.push(id);
                }
                current = node.parent();
            } else {
                break;
            }
        }
        chain.reverse();
        chain
    }

    /// Middleware entries applying to `route_path`: prefix is `/`, equals
    /// the route path, or is a proper directory prefix of it. Sorted
    /// ascending by prefix length for root-to-leaf order; entries sharing a
    /// prefix (Open Question a) keep their construction-time lexical order.
    pub fn middleware_chain(&self, route_path: &str) -> Vec<&MiddlewareEntry> {
        let mut matches: Vec<&MiddlewareEntry> = self
            .middleware
            .iter()
            .filter(|entry| is_prefix_of(&entry.prefix, route_path))
            .collect();
        matches.sort_by_key(|entry| entry.prefix.len());
        matches
    }

    pub fn middleware_entries(&self) -> &[MiddlewareEntry] {
        &self.middleware
    }
}

/// True if `prefix` is `/`, equals `path`, or is a proper directory prefix
/// of `path` (§4.5 Middleware chain lookup).
fn is_prefix_of(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    if prefix == path {
        return true;
    }
    path.starts_with(prefix) && path[prefix.len()..].starts_with('/')
}

/// True if `ancestor` is `/`, equals `path`, or is a proper prefix of it
/// (§4.4 Layout resolution uses the same relation over matched pathnames).
pub fn is_path_prefix(ancestor: &str, path: &str) -> bool {
    is_prefix_of(ancestor, path)
}
