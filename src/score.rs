//! Route specificity scoring (§4.2 of the route matcher specification).
//!
//! Earlier segments dominate the score so that a static prefix always wins
//! over a dynamic one regardless of what follows, e.g. `/blog/[slug]` beats
//! `/[id]/posts`, and any static segment anywhere beats a catch-all.

use crate::segment::{Segment, SegmentKind};

const STATIC_WEIGHT: f64 = 100.0;
const INDEX_WEIGHT: f64 = 90.0;
const DYNAMIC_WEIGHT: f64 = 50.0;
const OPTIONAL_WEIGHT: f64 = 30.0;
const CATCH_ALL_WEIGHT: f64 = 10.0;

fn weight(kind: SegmentKind) -> f64 {
    match kind {
        SegmentKind::Static => STATIC_WEIGHT,
        SegmentKind::Dynamic => DYNAMIC_WEIGHT,
        SegmentKind::Optional => OPTIONAL_WEIGHT,
        SegmentKind::CatchAll => CATCH_ALL_WEIGHT,
    }
}

/// Computes `score = Σᵢ (weight(segment_i) × 1000 / (i + 1))` over 0-based
/// segment positions. An empty segment list (the root route) scores using
/// the index weight so that `index` routes are ranked the way a root static
/// route would be.
pub fn score_segments(segments: &[Segment]) -> f64 {
    if segments.is_empty() {
        return INDEX_WEIGHT * 1000.0;
    }
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| weight(seg.kind()) * 1000.0 / (i as f64 + 1.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::parse_segments;

    #[test]
    fn static_then_dynamic_outranks_dynamic_then_static() {
        let a = score_segments(&parse_segments("/blog/[slug]"));
        let b = score_segments(&parse_segments("/[id]/posts"));
        assert!(a > b, "expected {} > {}", a, b);
    }

    #[test]
    fn static_anywhere_beats_catch_all() {
        let a = score_segments(&parse_segments("/a/b/c"));
        let b = score_segments(&parse_segments("/[...rest]"));
        assert!(a > b);
    }

    #[test]
    fn score_decreases_monotonically_with_position_for_same_kind() {
        let one = score_segments(&parse_segments("/a"));
        let two = score_segments(&parse_segments("/a/b"));
        // Adding a further static segment still increases the total score,
        // but its individual contribution is smaller than the first.
        assert!(two > one);
    }
}
