//! Compiles a segment list into an anchored regular expression (§4.3).

use regex::Regex;

use crate::segment::{Segment, SegmentKind};

/// Builds the anchored regex matching a normalized pathname for `segments`,
/// with an optional trailing slash. The empty segment list (root) compiles
/// to `^/$`.
pub fn compile(segments: &[Segment]) -> Regex {
    if segments.is_empty() {
        return Regex::new("^/$").expect("static root pattern is valid regex");
    }

    let mut pattern = String::from("^");
    for segment in segments {
        match segment.kind() {
            SegmentKind::Static => {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment.raw()));
            }
            SegmentKind::Dynamic => pattern.push_str("/([^/]+)"),
            SegmentKind::Optional => pattern.push_str("(?:/([^/]+))?"),
            // The dot intentionally matches "/" here: a catch-all captures
            // the remainder of the path as one group, later split on "/".
            SegmentKind::CatchAll => pattern.push_str("(?:/(.+))?"),
        }
    }
    pattern.push_str("/?$");

    Regex::new(&pattern).expect("segment-compiled pattern is valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::parse_segments;

    #[test]
    fn root_pattern_matches_only_slash() {
        let re = compile(&parse_segments(""));
        assert!(re.is_match("/"));
        assert!(!re.is_match("/a"));
    }

    #[test]
    fn static_segments_are_escaped() {
        let re = compile(&parse_segments("/a.b"));
        assert!(re.is_match("/a.b"));
        assert!(!re.is_match("/aXb"));
    }

    #[test]
    fn dynamic_segment_captures_one_component() {
        let re = compile(&parse_segments("/users/[id]"));
        let caps = re.captures("/users/42").unwrap();
        assert_eq!(&caps[1], "42");
        assert!(!re.is_match("/users/42/extra"));
    }

    #[test]
    fn optional_segment_matches_with_or_without_component() {
        let re = compile(&parse_segments("/docs/[[page]]"));
        assert!(re.is_match("/docs"));
        assert!(re.is_match("/docs/intro"));
        let caps = re.captures("/docs/intro").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "intro");
        assert!(re.captures("/docs").unwrap().get(1).is_none());
    }

    #[test]
    fn catch_all_captures_everything_including_slashes() {
        let re = compile(&parse_segments("/files/[...path]"));
        let caps = re.captures("/files/a/b/c").unwrap();
        assert_eq!(&caps[1], "a/b/c");
    }

    #[test]
    fn trailing_slash_is_tolerated() {
        let re = compile(&parse_segments("/about"));
        assert!(re.is_match("/about"));
        assert!(re.is_match("/about/"));
    }
}
