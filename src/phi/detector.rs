//! Detector layer
//!
//! A detector set runs every enabled family concurrently over the same
//! immutable text snapshot and joins the results, then hands contested
//! regions to the contextual reviewer. Candidates leave this layer
//! unresolved; overlap arbitration belongs to the resolver.

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::phi::contextual::{
    ContestReason, ContestedSegment, ContextualDetector, HeuristicContextual,
};
use crate::phi::entity::EntityDetector;
use crate::phi::patterns::{PatternDetector, PopulationLookup};
use crate::phi::span::{DetectorFamily, PhiSpan};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

/// A single detection strategy.
///
/// Detectors are pure functions of their input and are safe to run
/// concurrently over the same snapshot. They never fail: a detector that
/// cannot proceed returns an empty set rather than an error.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Scan text and report every candidate found.
    async fn detect(&self, text: &str) -> Vec<PhiSpan>;

    /// Name used for audit attribution.
    fn name(&self) -> &str;

    fn family(&self) -> DetectorFamily;
}

/// The configured detector stack for one deployment.
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
    contextual: Option<Box<dyn ContextualDetector>>,
    review_threshold: f64,
}

impl DetectorSet {
    pub fn new(config: &DetectionConfig, population: Arc<dyn PopulationLookup>) -> Result<Self> {
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
        if config.enable_pattern {
            detectors.push(Box::new(PatternDetector::new(config, population)?));
        }
        if config.enable_entity {
            detectors.push(Box::new(EntityDetector::new()?));
        }
        let contextual: Option<Box<dyn ContextualDetector>> = if config.enable_contextual {
            Some(Box::new(HeuristicContextual::new()?))
        } else {
            None
        };
        Ok(Self {
            detectors,
            contextual,
            review_threshold: config.contextual_review_threshold,
        })
    }

    /// Swap the contextual reviewer (model-backed deployments, test stubs).
    pub fn with_contextual(mut self, contextual: Box<dyn ContextualDetector>) -> Self {
        self.contextual = Some(contextual);
        self
    }

    /// Add a custom detector alongside the built-in families.
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Run every detector concurrently, then the contextual pass over
    /// whatever came back contested.
    pub async fn detect_all(&self, text: &str) -> Vec<PhiSpan> {
        let results = join_all(self.detectors.iter().map(|d| d.detect(text))).await;
        let mut candidates: Vec<PhiSpan> = results.into_iter().flatten().collect();

        if let Some(contextual) = &self.contextual {
            let segments = contested_segments(&candidates, self.review_threshold);
            if !segments.is_empty() {
                candidates.extend(contextual.review(text, &segments).await);
            }
        }

        candidates
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }
}

/// Regions worth a second look: entity spans under the review threshold,
/// plus anywhere pattern and entity families disagree about overlapping
/// text. Overlapping regions merge so the reviewer sees each once.
fn contested_segments(candidates: &[PhiSpan], review_threshold: f64) -> Vec<ContestedSegment> {
    let mut segments: Vec<ContestedSegment> = Vec::new();

    for span in candidates {
        if span.family == DetectorFamily::Entity && span.confidence < review_threshold {
            segments.push(ContestedSegment {
                start: span.start,
                end: span.end,
                reason: ContestReason::LowConfidenceEntity,
            });
        }
    }

    for a in candidates.iter().filter(|s| s.family == DetectorFamily::Pattern) {
        for b in candidates.iter().filter(|s| s.family == DetectorFamily::Entity) {
            if a.overlaps(b) && a.phi_type != b.phi_type {
                segments.push(ContestedSegment {
                    start: a.start.min(b.start),
                    end: a.end.max(b.end),
                    reason: ContestReason::FamilyDisagreement,
                });
            }
        }
    }

    merge_segments(segments)
}

fn merge_segments(mut segments: Vec<ContestedSegment>) -> Vec<ContestedSegment> {
    if segments.len() <= 1 {
        return segments;
    }
    segments.sort_by_key(|s| (s.start, s.end));
    let mut merged: Vec<ContestedSegment> = Vec::new();
    for seg in segments {
        match merged.last_mut() {
            Some(last) if seg.start <= last.end => {
                last.end = last.end.max(seg.end);
            }
            _ => merged.push(seg),
        }
    }
    merged
}
