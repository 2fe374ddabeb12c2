//! Span resolver
//!
//! Arbitrates raw detector candidates into an ordered, non-overlapping
//! span set. The sweep keeps the higher-confidence side of any overlap,
//! breaking ties toward the wider span and then toward family precedence
//! (pattern over entity over contextual). A span below its family's
//! configured confidence floor loses any overlap contest outright, but an
//! isolated low-confidence span is retained: dropping it would trade a
//! cosmetic false positive for a disclosure.
//!
//! Resolution never errors and is idempotent; resolved output is a fixed
//! point.

use crate::config::DetectionConfig;
use crate::phi::span::{DetectorFamily, PhiSpan, ResolvedSpanSet};
use std::cmp::Ordering;

pub fn resolve(candidates: Vec<PhiSpan>, config: &DetectionConfig) -> ResolvedSpanSet {
    if candidates.is_empty() {
        return ResolvedSpanSet::default();
    }

    let mut spans = candidates;
    spans.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });

    let mut kept: Vec<PhiSpan> = Vec::new();
    for span in spans {
        let incumbent = match kept.last() {
            Some(last) if span.overlaps(last) => last,
            _ => {
                kept.push(span);
                continue;
            }
        };

        let span_floored = below_floor(&span, config);
        let incumbent_floored = below_floor(incumbent, config);
        // When exactly one side is below its floor, that side loses; when
        // both or neither are, the ordinary ladder decides.
        let replace = if span_floored != incumbent_floored {
            incumbent_floored
        } else {
            challenger_wins(&span, incumbent)
        };

        if replace {
            kept.pop();
            kept.push(span);
        }
    }

    ResolvedSpanSet::from_sorted(kept)
}

fn below_floor(span: &PhiSpan, config: &DetectionConfig) -> bool {
    let floor = match span.family {
        DetectorFamily::Pattern => config.pattern_floor,
        DetectorFamily::Entity => config.entity_floor,
        DetectorFamily::Contextual => config.contextual_floor,
    };
    span.confidence < floor
}

fn challenger_wins(challenger: &PhiSpan, incumbent: &PhiSpan) -> bool {
    match challenger.confidence.total_cmp(&incumbent.confidence) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match challenger.width().cmp(&incumbent.width()) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => challenger.family.precedence() > incumbent.family.precedence(),
        },
    }
}
