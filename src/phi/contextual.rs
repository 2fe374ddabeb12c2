//! Contextual escalation detector
//!
//! The expensive third layer. It never sees the whole document cold: the
//! detector set hands it only contested segments, where entity confidence
//! fell below the review threshold or where pattern and entity findings
//! disagree. Implementations follow the same never-fails contract as the
//! other detectors and attach a short PHI-free justification to every span
//! they produce; the justification lands in the redaction ledger.

use crate::error::{Error, Result};
use crate::phi::span::{DetectorFamily, PhiSpan, PhiType};
use async_trait::async_trait;
use regex::Regex;

/// Why a segment was escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContestReason {
    /// An entity span fell below the review threshold
    LowConfidenceEntity,
    /// Pattern and entity families disagree about overlapping text
    FamilyDisagreement,
}

impl ContestReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowConfidenceEntity => "low_confidence_entity",
            Self::FamilyDisagreement => "family_disagreement",
        }
    }
}

/// A region of the input escalated for contextual review.
#[derive(Debug, Clone)]
pub struct ContestedSegment {
    pub start: usize,
    pub end: usize,
    pub reason: ContestReason,
}

/// Escalation slot for contested segments.
///
/// The production default is a deterministic heuristic; deployments can
/// plug a model-backed reviewer in without touching the pipeline.
#[async_trait]
pub trait ContextualDetector: Send + Sync {
    /// Examine the contested segments and return any additional spans.
    /// Returned offsets index into `text`, not into the segments.
    async fn review(&self, text: &str, segments: &[ContestedSegment]) -> Vec<PhiSpan>;

    fn name(&self) -> &str;
}

/// Deterministic keyword-window reviewer.
///
/// Looks for capitalized runs inside each segment and classifies them by
/// the language in a small window around the segment: kinship words make
/// a name, employment words an organization, residence words a
/// geographic unit.
pub struct HeuristicContextual {
    cap_run: Regex,
    kinship: Regex,
    employment: Regex,
    residence: Regex,
}

const WINDOW: usize = 48;

impl HeuristicContextual {
    pub fn new() -> Result<Self> {
        let cap_run = Regex::new(r"\p{Lu}[\p{L}'’\-]+(?:\s+\p{Lu}[\p{L}'’\-]+){0,3}")
            .map_err(|e| Error::Internal(format!("invalid contextual pattern: {}", e)))?;
        let kinship = Regex::new(
            r"(?i)\b(?:wife|husband|spouse|daughter|son|mother|father|brother|sister|aunt|uncle|grandmother|grandfather|caregiver|partner)\b",
        )
        .map_err(|e| Error::Internal(format!("invalid contextual pattern: {}", e)))?;
        let employment =
            Regex::new(r"(?i)\b(?:works\s+at|employed\s+(?:by|at)|employer|retired\s+from)\b")
                .map_err(|e| Error::Internal(format!("invalid contextual pattern: {}", e)))?;
        let residence = Regex::new(
            r"(?i)\b(?:lives?\s+(?:in|at|near)|resides?\s+(?:in|at)|moved\s+to|home\s+in|apartment|address)\b",
        )
        .map_err(|e| Error::Internal(format!("invalid contextual pattern: {}", e)))?;

        Ok(Self {
            cap_run,
            kinship,
            employment,
            residence,
        })
    }

    fn classify_window(&self, window: &str) -> Option<(PhiType, f64, &'static str)> {
        if self.kinship.is_match(window) {
            Some((
                PhiType::Name,
                0.80,
                "capitalized run adjacent to kinship reference",
            ))
        } else if self.employment.is_match(window) {
            Some((
                PhiType::Organization,
                0.76,
                "capitalized run adjacent to employment language",
            ))
        } else if self.residence.is_match(window) {
            Some((
                PhiType::GeographicUnit,
                0.78,
                "capitalized run adjacent to residence language",
            ))
        } else {
            None
        }
    }
}

#[async_trait]
impl ContextualDetector for HeuristicContextual {
    async fn review(&self, text: &str, segments: &[ContestedSegment]) -> Vec<PhiSpan> {
        let mut spans = Vec::new();

        for seg in segments {
            if seg.start >= seg.end || seg.end > text.len() {
                continue;
            }
            let w_start = snap_left(text, seg.start.saturating_sub(WINDOW));
            let w_end = snap_right(text, (seg.end + WINDOW).min(text.len()));
            let verdict = match self.classify_window(&text[w_start..w_end]) {
                Some(v) => v,
                None => continue,
            };

            let segment_text = &text[seg.start..seg.end];
            for m in self.cap_run.find_iter(segment_text) {
                let (phi_type, confidence, note) = verdict;
                spans.push(
                    PhiSpan::new(
                        seg.start + m.start(),
                        seg.start + m.end(),
                        phi_type,
                        "contextual",
                        DetectorFamily::Contextual,
                        confidence,
                    )
                    .with_note(note),
                );
            }
        }

        spans
    }

    fn name(&self) -> &str {
        "heuristic_contextual"
    }
}

fn snap_left(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn snap_right(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Reviewer that returns a canned span list. Test support for exercising
/// the escalation path without heuristic behavior in the way.
pub struct StaticContextual {
    spans: Vec<PhiSpan>,
}

impl StaticContextual {
    pub fn new(spans: Vec<PhiSpan>) -> Self {
        Self { spans }
    }
}

#[async_trait]
impl ContextualDetector for StaticContextual {
    async fn review(&self, _text: &str, segments: &[ContestedSegment]) -> Vec<PhiSpan> {
        if segments.is_empty() {
            Vec::new()
        } else {
            self.spans.clone()
        }
    }

    fn name(&self) -> &str {
        "static_contextual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: usize, end: usize) -> ContestedSegment {
        ContestedSegment {
            start,
            end,
            reason: ContestReason::LowConfidenceEntity,
        }
    }

    #[tokio::test]
    async fn test_kinship_window_yields_name() {
        let ctx = HeuristicContextual::new().unwrap();
        let text = "His wife Mary Johnson visited daily";
        let start = text.find("Mary").unwrap();
        let spans = ctx
            .review(text, &[segment(start, start + "Mary Johnson".len())])
            .await;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].phi_type, PhiType::Name);
        assert_eq!(&text[spans[0].start..spans[0].end], "Mary Johnson");
        assert!(spans[0].note.as_deref().unwrap().contains("kinship"));
    }

    #[tokio::test]
    async fn test_employment_window_yields_organization() {
        let ctx = HeuristicContextual::new().unwrap();
        let text = "Patient works at Acme Fabrication and denies exposure";
        let start = text.find("Acme").unwrap();
        let spans = ctx
            .review(text, &[segment(start, start + "Acme Fabrication".len())])
            .await;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].phi_type, PhiType::Organization);
    }

    #[tokio::test]
    async fn test_residence_window_yields_geographic() {
        let ctx = HeuristicContextual::new().unwrap();
        let text = "She lives in Somerville with family";
        let start = text.find("Somerville").unwrap();
        let spans = ctx
            .review(text, &[segment(start, start + "Somerville".len())])
            .await;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].phi_type, PhiType::GeographicUnit);
        assert!(spans[0].note.is_some());
    }

    #[tokio::test]
    async fn test_no_keywords_no_spans() {
        let ctx = HeuristicContextual::new().unwrap();
        let text = "Lab values within Normal Limits overnight";
        let start = text.find("Normal").unwrap();
        let spans = ctx
            .review(text, &[segment(start, start + "Normal Limits".len())])
            .await;
        assert!(spans.is_empty());
    }

    #[tokio::test]
    async fn test_static_stub_gated_on_segments() {
        let canned = vec![PhiSpan::new(
            0,
            4,
            PhiType::Name,
            "static_contextual",
            DetectorFamily::Contextual,
            0.9,
        )];
        let ctx = StaticContextual::new(canned);
        assert!(ctx.review("text", &[]).await.is_empty());
        assert_eq!(ctx.review("text", &[segment(0, 4)]).await.len(), 1);
    }
}
