//! Compiles the route tree into a scored, ordered matcher (§3 Compiled
//! Matcher Entry, §4.4).

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;

use crate::pattern;
use crate::segment::{Segment, SegmentKind};
use crate::tree::{NodeId, RouteTree};

/// A single path parameter's bound value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Single(s) => Some(s),
            ParamValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ParamValue::List(items) => Some(items),
            ParamValue::Single(_) => None,
        }
    }
}

/// The bound parameters, keyed by segment name.
pub type Params = HashMap<String, ParamValue>;

/// A successful match: the matched node, its bound parameters, the
/// normalized pathname, and its layout chain outermost-first.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub node_id: NodeId,
    pub params: Params,
    pub pathname: String,
    pub layout_chain: Vec<NodeId>,
}

struct MatcherEntry {
    node_id: NodeId,
    segments: Vec<Segment>,
    regex: Regex,
    score: f64,
}

/// An ordered, compiled view over a `RouteTree`'s matchable routes (every
/// non-layout node, plus layouts that are also an index route — Open
/// Question c).
pub struct RouteMatcher {
    entries: Vec<MatcherEntry>,
}

impl RouteMatcher {
    /// Flattens `tree` into compiled entries and sorts them by descending
    /// score (stable, so insertion order breaks ties deterministically).
    pub fn build(tree: &RouteTree) -> RouteMatcher {
        let mut entries: Vec<MatcherEntry> = tree
            .iter()
            .filter(|(_, node)| !node.is_layout() || node.is_index())
            .map(|(node_id, node)| {
                let segments = node.segments().to_vec();
                let regex = pattern::compile(&segments);
                MatcherEntry {
                    node_id,
                    score: node.score(),
                    segments,
                    regex,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        RouteMatcher { entries }
    }

    /// Removes the entry for `node_id`, if present, preserving the
    /// remaining entries' relative (sorted) order.
    pub fn remove(&mut self, node_id: NodeId) {
        self.entries.retain(|e| e.node_id != node_id);
    }

    /// Inserts (or re-inserts) `node_id` from `tree` at its sorted position.
    pub fn upsert(&mut self, tree: &RouteTree, node_id: NodeId) {
        self.remove(node_id);
        let node = match tree.get(node_id) {
            Some(n) if !n.is_layout() || n.is_index() => n,
            _ => return,
        };
        let segments = node.segments().to_vec();
        let regex = pattern::compile(&segments);
        let entry = MatcherEntry {
            node_id,
            score: node.score(),
            segments,
            regex,
        };
        let pos = self
            .entries
            .iter()
            .position(|e| e.score < entry.score)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalizes `pathname` and walks entries in score order; the first
    /// regex match wins.
    pub fn match_path(&self, tree: &RouteTree, pathname: &str) -> Option<MatchResult> {
        let normalized = normalize(pathname);
        for entry in &self.entries {
            if let Some(caps) = entry.regex.captures(&normalized) {
                let params = extract_params(&entry.segments, &caps);
                let layout_chain = tree.layout_chain(entry.node_id);
                return Some(MatchResult {
                    node_id: entry.node_id,
                    params,
                    pathname: normalized,
                    layout_chain,
                });
            }
        }
        None
    }
}

fn extract_params(segments: &[Segment], caps: &regex::Captures<'_>) -> Params {
    let mut params = Params::new();
    let mut group = 1;
    for segment in segments {
        match segment.kind() {
            SegmentKind::Static => continue,
            SegmentKind::Dynamic => {
                if let (Some(name), Some(m)) = (segment.param_name(), caps.get(group)) {
                    params.insert(name.to_owned(), ParamValue::Single(m.as_str().to_owned()));
                }
                group += 1;
            }
            SegmentKind::Optional => {
                if let Some(name) = segment.param_name() {
                    if let Some(m) = caps.get(group) {
                        params.insert(name.to_owned(), ParamValue::Single(m.as_str().to_owned()));
                    }
                }
                group += 1;
            }
            SegmentKind::CatchAll => {
                if let Some(name) = segment.param_name() {
                    let parts = caps
                        .get(group)
                        .map(|m| m.as_str().split('/').map(str::to_owned).collect())
                        .unwrap_or_default();
                    params.insert(name.to_owned(), ParamValue::List(parts));
                }
                group += 1;
            }
        }
    }
    params
}

/// Empty pathname becomes `/`; consecutive slashes collapse to one;
/// percent-escapes are decoded except `%2F`, which is preserved literally
/// to avoid ambiguity with a structural slash. Decode failures for an
/// individual escape fall back to the raw characters for that escape only.
pub fn normalize(pathname: &str) -> String {
    let pathname = if pathname.is_empty() { "/" } else { pathname };
    let collapsed = collapse_slashes(pathname);
    decode_preserving_2f(&collapsed)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn decode_preserving_2f(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                let decoded = h * 16 + l;
                if decoded == b'/' {
                    out.extend_from_slice(&bytes[i..i + 3]);
                } else {
                    out.push(decoded);
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| path.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::RouteFile;
    use std::path::PathBuf;

    fn build_tree(paths: &[&str]) -> RouteTree {
        let files: Vec<RouteFile> = paths
            .iter()
            .map(|p| RouteFile {
                relative_path: (*p).to_owned(),
                absolute_path: PathBuf::from(p),
            })
            .collect();
        RouteTree::build(&files)
    }

    #[test]
    fn normalize_empty_becomes_root() {
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn normalize_collapses_consecutive_slashes() {
        assert_eq!(normalize("/a//b///c"), "/a/b/c");
    }

    #[test]
    fn normalize_preserves_percent_2f_literally() {
        assert_eq!(normalize("/users/hello%2Fworld"), "/users/hello%2Fworld");
    }

    #[test]
    fn normalize_decodes_ordinary_percent_escapes() {
        assert_eq!(normalize("/users/hello%20world"), "/users/hello world");
    }

    #[test]
    fn normalize_tolerates_invalid_escape() {
        assert_eq!(normalize("/users/%ZZbad"), "/users/%ZZbad");
    }

    #[test]
    fn scenario_matches_index_about_blog_catch_all_and_miss() {
        let tree = build_tree(&[
            "index.tsx",
            "about.tsx",
            "blog/index.tsx",
            "blog/[slug].tsx",
            "docs/[...path].tsx",
        ]);
        let matcher = RouteMatcher::build(&tree);

        let m = matcher.match_path(&tree, "/").unwrap();
        assert_eq!(tree.get(m.node_id).unwrap().id(), "index");

        let m = matcher.match_path(&tree, "/about").unwrap();
        assert_eq!(tree.get(m.node_id).unwrap().id(), "about");

        let m = matcher.match_path(&tree, "/blog").unwrap();
        assert_eq!(tree.get(m.node_id).unwrap().id(), "blog/index");

        let m = matcher.match_path(&tree, "/blog/hello").unwrap();
        assert_eq!(tree.get(m.node_id).unwrap().id(), "blog/[slug]");
        assert_eq!(m.params.get("slug").unwrap().as_str(), Some("hello"));

        let m = matcher.match_path(&tree, "/docs/a/b/c").unwrap();
        assert_eq!(
            m.params.get("path").unwrap().as_list(),
            Some(&["a".to_owned(), "b".to_owned(), "c".to_owned()][..])
        );

        assert!(matcher.match_path(&tree, "/nope").is_none());
    }

    #[test]
    fn scenario_user_id_percent_decoding() {
        let tree = build_tree(&["users/[id].tsx"]);
        let matcher = RouteMatcher::build(&tree);

        let m = matcher.match_path(&tree, "/users/hello%20world").unwrap();
        assert_eq!(m.params.get("id").unwrap().as_str(), Some("hello world"));

        let m = matcher.match_path(&tree, "/users/hello%2Fworld").unwrap();
        assert_eq!(m.params.get("id").unwrap().as_str(), Some("hello%2Fworld"));

        let m = matcher.match_path(&tree, "/users/%ZZbad").unwrap();
        assert_eq!(m.params.get("id").unwrap().as_str(), Some("%ZZbad"));
    }

    #[test]
    fn higher_score_route_wins_when_both_match() {
        let tree = build_tree(&["[id]/posts.tsx", "blog/[slug].tsx"]);
        let matcher = RouteMatcher::build(&tree);
        // Both are two-segment routes; "blog/[slug]" (static, dynamic)
        // outscores "[id]/posts" (dynamic, static).
        assert!(matcher.entries[0].segments[0].kind() == SegmentKind::Static);
    }
}
