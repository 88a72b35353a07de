//! Tokenizes route file paths into typed path segments.
//!
//! A path such as `/blog/[slug]/[...rest]` is split on `/`, empty tokens are
//! discarded, and each remaining token is classified as static, dynamic,
//! optional, or catch-all based on its bracket shape.

use std::fmt;

/// The kind of a single path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Matched by exact string equality.
    Static,
    /// Matches exactly one non-empty, non-slash path component.
    Dynamic,
    /// Matches zero or one path component.
    Optional,
    /// Matches all remaining path components, split on `/`.
    CatchAll,
}

/// A single classified path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    /// The raw token as it appeared in the file path, brackets included.
    raw: String,
    kind: SegmentKind,
    /// The bound parameter name; `None` for static segments.
    param_name: Option<String>,
}

impl Segment {
    fn static_segment(raw: &str) -> Self {
        Segment {
            raw: raw.to_owned(),
            kind: SegmentKind::Static,
            param_name: None,
        }
    }

    fn named(raw: &str, kind: SegmentKind, name: &str) -> Self {
        Segment {
            raw: raw.to_owned(),
            kind,
            param_name: Some(name.to_owned()),
        }
    }

    /// The raw token, brackets included.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The classified kind of this segment.
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// The bound parameter name, for every kind except `Static`.
    pub fn param_name(&self) -> Option<&str> {
        self.param_name.as_deref()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Splits `path` on `/`, discards empty tokens, and classifies each token.
///
/// Classification order is catch-all (`[...name]`), then optional
/// (`[[name]]`), then dynamic (`[name]`), then static. An unrecognized
/// bracket shape (mismatched brackets, empty `[]`) is treated as static —
/// there is no failure mode here.
pub fn parse_segments(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|token| !token.is_empty())
        .map(classify)
        .collect()
}

fn classify(token: &str) -> Segment {
    if let Some(name) = catch_all_name(token) {
        return Segment::named(token, SegmentKind::CatchAll, name);
    }
    if let Some(name) = optional_name(token) {
        return Segment::named(token, SegmentKind::Optional, name);
    }
    if let Some(name) = dynamic_name(token) {
        return Segment::named(token, SegmentKind::Dynamic, name);
    }
    Segment::static_segment(token)
}

fn catch_all_name(token: &str) -> Option<&str> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    let name = inner.strip_prefix("...")?;
    non_empty(name)
}

fn optional_name(token: &str) -> Option<&str> {
    let inner = token
        .strip_prefix("[[")?
        .strip_suffix("]]")?;
    non_empty(inner)
}

fn dynamic_name(token: &str) -> Option<&str> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    non_empty(inner)
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Returns true if `segment` may only legally appear as the final segment of
/// a path (catch-all). Used by callers validating a full segment list.
pub fn is_trailing_only(kind: SegmentKind) -> bool {
    matches!(kind, SegmentKind::CatchAll)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_yields_no_segments() {
        assert!(parse_segments("").is_empty());
        assert!(parse_segments("/").is_empty());
    }

    #[test]
    fn classifies_static_dynamic_optional_catch_all() {
        let segs = parse_segments("/blog/[slug]/[[page]]/[...rest]");
        assert_eq!(segs.len(), 4);
        assert_eq!(segs[0].kind(), SegmentKind::Static);
        assert_eq!(segs[0].raw(), "blog");
        assert_eq!(segs[1].kind(), SegmentKind::Dynamic);
        assert_eq!(segs[1].param_name(), Some("slug"));
        assert_eq!(segs[2].kind(), SegmentKind::Optional);
        assert_eq!(segs[2].param_name(), Some("page"));
        assert_eq!(segs[3].kind(), SegmentKind::CatchAll);
        assert_eq!(segs[3].param_name(), Some("rest"));
    }

    #[test]
    fn unrecognized_bracket_shapes_are_static() {
        let segs = parse_segments("/[/weird]");
        assert!(segs.iter().all(|s| s.kind() == SegmentKind::Static));
    }

    #[test]
    fn consecutive_slashes_discard_empty_tokens() {
        let segs = parse_segments("//a///b/");
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].raw(), "a");
        assert_eq!(segs[1].raw(), "b");
    }

    #[test]
    fn catch_all_takes_priority_over_optional_and_dynamic() {
        // [...x] must not be parsed as dynamic "...x".
        let segs = parse_segments("[...x]");
        assert_eq!(segs[0].kind(), SegmentKind::CatchAll);
    }
}
