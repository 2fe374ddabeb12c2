//! Detection quality evaluation
//!
//! Scores the detector stack against a gold-labeled corpus. Matching is
//! type-strict and positional: a prediction counts as a true positive
//! only when it names the gold label's PHI type and overlaps it with an
//! intersection-over-union of at least 0.5.
//!
//! A gold corpus lives on disk as `labels/*.labels.json` files describing
//! spans in companion `documents/<document_id>.txt` files.

use crate::compliance::ComplianceStatus;
use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::phi::{resolve, DetectorSet, PhiType};
use crate::pipeline::DocumentType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const IOU_THRESHOLD: f64 = 0.5;

pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One labeled span in a gold case. `text` pins the expected surface
/// form so offset drift in hand-edited labels is caught before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldLabel {
    pub phi_type: PhiType,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// One gold-labeled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldCase {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub document_id: String,
    #[serde(default)]
    pub doc_type: Option<DocumentType>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    pub phi_spans: Vec<GoldLabel>,
    /// Expected compliance outcome, carried for labelers. Span scoring
    /// does not read it.
    #[serde(default)]
    pub compliance_expected: Option<ComplianceStatus>,
    /// Document body, loaded from `documents/<document_id>.txt`.
    #[serde(skip)]
    pub text: String,
}

/// Counts for one PHI type (or the overall tally).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TypeMetrics {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
}

impl TypeMetrics {
    /// An empty denominator scores 1.0: no predictions means no false
    /// alarms.
    pub fn precision(&self) -> f64 {
        let denom = self.true_positives + self.false_positives;
        if denom == 0 {
            1.0
        } else {
            self.true_positives as f64 / denom as f64
        }
    }

    /// An empty denominator scores 1.0: no gold means nothing missed.
    pub fn recall(&self) -> f64 {
        let denom = self.true_positives + self.false_negatives;
        if denom == 0 {
            1.0
        } else {
            self.true_positives as f64 / denom as f64
        }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

/// Score line for one document.
#[derive(Debug, Clone, Serialize)]
pub struct CaseScore {
    pub document_id: String,
    pub gold: usize,
    pub predicted: usize,
    pub metrics: TypeMetrics,
}

/// Full evaluation result.
#[derive(Debug, Serialize)]
pub struct EvalReport {
    pub cases: Vec<CaseScore>,
    pub per_type: BTreeMap<PhiType, TypeMetrics>,
    pub overall: TypeMetrics,
}

impl EvalReport {
    /// Plain-text report for CLI output.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for score in &self.cases {
            out.push_str(&format!(
                "{}: gold={} pred={} P={:.4} R={:.4} F1={:.4}\n",
                score.document_id,
                score.gold,
                score.predicted,
                score.metrics.precision(),
                score.metrics.recall(),
                score.metrics.f1(),
            ));
        }
        out.push('\n');
        out.push_str(&format!(
            "{:<16} {:>6} {:>6} {:>6} {:>12}\n",
            "type", "prec", "rec", "f1", "tp/fp/fn"
        ));
        for (phi_type, m) in &self.per_type {
            out.push_str(&format!(
                "{:<16} {:>6.3} {:>6.3} {:>6.3} {:>12}\n",
                phi_type.as_str(),
                m.precision(),
                m.recall(),
                m.f1(),
                format!("{}/{}/{}", m.true_positives, m.false_positives, m.false_negatives),
            ));
        }
        out.push_str(&format!(
            "{:<16} {:>6.3} {:>6.3} {:>6.3} {:>12}   ({} case(s))\n",
            "overall",
            self.overall.precision(),
            self.overall.recall(),
            self.overall.f1(),
            format!(
                "{}/{}/{}",
                self.overall.true_positives,
                self.overall.false_positives,
                self.overall.false_negatives
            ),
            self.cases.len(),
        ));
        out
    }
}

/// Load a gold corpus: every `labels/*.labels.json` under `dir`, each
/// paired with `documents/<document_id>.txt`.
pub fn load_gold_dir(dir: &Path) -> Result<Vec<GoldCase>> {
    let labels_dir = dir.join("labels");
    let documents_dir = dir.join("documents");

    let entries = std::fs::read_dir(&labels_dir)
        .map_err(|e| Error::Parse(format!("gold labels dir {}: {}", labels_dir.display(), e)))?;
    let mut label_files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".labels.json"))
                .unwrap_or(false)
        })
        .collect();
    label_files.sort();

    if label_files.is_empty() {
        return Err(Error::Parse(format!(
            "no *.labels.json files under {}",
            labels_dir.display()
        )));
    }

    let mut cases = Vec::with_capacity(label_files.len());
    for path in label_files {
        let data = std::fs::read_to_string(&path)?;
        let mut case: GoldCase = serde_json::from_str(&data)
            .map_err(|e| Error::Parse(format!("gold label file {}: {}", path.display(), e)))?;
        let doc_path = documents_dir.join(format!("{}.txt", case.document_id));
        case.text = std::fs::read_to_string(&doc_path)
            .map_err(|e| Error::Parse(format!("gold document {}: {}", doc_path.display(), e)))?;
        cases.push(case);
    }
    Ok(cases)
}

/// Check label sanity before scoring. Errors carry offsets and type
/// names only, never the labeled text.
pub fn validate_case(case: &GoldCase) -> Result<()> {
    let mut sorted: Vec<&GoldLabel> = case.phi_spans.iter().collect();
    sorted.sort_by_key(|l| (l.start, l.end));

    for (i, label) in sorted.iter().enumerate() {
        if label.start >= label.end {
            return Err(Error::Parse(format!(
                "gold case {}: label {}..{} is empty or inverted",
                case.document_id, label.start, label.end
            )));
        }
        if label.end > case.text.len() {
            return Err(Error::Parse(format!(
                "gold case {}: label end {} past text length {}",
                case.document_id,
                label.end,
                case.text.len()
            )));
        }
        if !case.text.is_char_boundary(label.start) || !case.text.is_char_boundary(label.end) {
            return Err(Error::Parse(format!(
                "gold case {}: label {}..{} not on char boundaries",
                case.document_id, label.start, label.end
            )));
        }
        if &case.text[label.start..label.end] != label.text.as_str() {
            return Err(Error::Parse(format!(
                "gold case {}: label {}..{} does not match the document text",
                case.document_id, label.start, label.end
            )));
        }
        if let Some(prev) = i.checked_sub(1).map(|j| sorted[j]) {
            if label.start < prev.end {
                return Err(Error::Parse(format!(
                    "gold case {}: labels {}..{} and {}..{} overlap",
                    case.document_id, prev.start, prev.end, label.start, label.end
                )));
            }
        }
    }
    Ok(())
}

/// Score the detector stack against gold cases.
pub async fn evaluate(
    detectors: &DetectorSet,
    config: &DetectionConfig,
    cases: &[GoldCase],
) -> Result<EvalReport> {
    let mut per_type: BTreeMap<PhiType, TypeMetrics> = BTreeMap::new();
    let mut scores = Vec::with_capacity(cases.len());

    for case in cases {
        validate_case(case)?;

        let candidates = detectors.detect_all(&case.text).await;
        let resolved = resolve(candidates, config);
        let spans = resolved.spans();

        let mut case_metrics = TypeMetrics::default();
        let mut gold_matched = vec![false; case.phi_spans.len()];
        for span in spans {
            let best = case
                .phi_spans
                .iter()
                .enumerate()
                .filter(|(i, label)| !gold_matched[*i] && label.phi_type == span.phi_type)
                .map(|(i, label)| (i, iou((span.start, span.end), (label.start, label.end))))
                .filter(|(_, score)| *score >= IOU_THRESHOLD)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let entry = per_type.entry(span.phi_type).or_default();
            match best {
                Some((i, _)) => {
                    gold_matched[i] = true;
                    entry.true_positives += 1;
                    case_metrics.true_positives += 1;
                }
                None => {
                    entry.false_positives += 1;
                    case_metrics.false_positives += 1;
                }
            }
        }
        for (i, label) in case.phi_spans.iter().enumerate() {
            if !gold_matched[i] {
                per_type.entry(label.phi_type).or_default().false_negatives += 1;
                case_metrics.false_negatives += 1;
            }
        }

        scores.push(CaseScore {
            document_id: case.document_id.clone(),
            gold: case.phi_spans.len(),
            predicted: spans.len(),
            metrics: case_metrics,
        });
    }

    let mut overall = TypeMetrics::default();
    for m in per_type.values() {
        overall.true_positives += m.true_positives;
        overall.false_positives += m.false_positives;
        overall.false_negatives += m.false_negatives;
    }

    Ok(EvalReport {
        cases: scores,
        per_type,
        overall,
    })
}

fn iou(a: (usize, usize), b: (usize, usize)) -> f64 {
    let inter_start = a.0.max(b.0);
    let inter_end = a.1.min(b.1);
    if inter_start >= inter_end {
        return 0.0;
    }
    let inter = (inter_end - inter_start) as f64;
    let union = (a.1 - a.0) as f64 + (b.1 - b.0) as f64 - inter;
    inter / union
}
