//! Compliance rule matching
//!
//! Evaluates a catalog of disclosure rules against redacted document text
//! and retrieved policy chunks. Matching runs strictly outside the trust
//! boundary: it only ever sees placeholder-bearing text, and findings
//! carry rule catalog phrases, never document content.

use crate::compliance::store::PolicyChunk;
use crate::pipeline::state::DocumentType;
use serde::{Deserialize, Serialize};

/// Outcome of one rule evaluation, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Pass,
    NeedsReview,
    Fail,
}

impl ComplianceStatus {
    pub fn severity(&self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::NeedsReview => 1,
            Self::Fail => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::NeedsReview => "needs_review",
            Self::Fail => "fail",
        }
    }
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a rule inspects the redacted text.
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Document must contain at least one of these phrases
    RequiredDisclosure { any_of: Vec<String> },
    /// Document must contain none of these phrases
    ProhibitedContent { any_of: Vec<String> },
    /// Presence of a trigger phrase sends the document to human review
    ManualReview { trigger_any: Vec<String> },
}

/// One entry in the compliance catalog.
#[derive(Debug, Clone)]
pub struct ComplianceRule {
    pub id: String,
    pub description: String,
    /// Empty applies to every document type
    pub document_types: Vec<DocumentType>,
    /// None applies in every jurisdiction
    pub jurisdiction: Option<String>,
    /// Terms that retrieved policy chunks must mention to count as
    /// supporting evidence. Empty means the check is self-contained.
    pub evidence_terms: Vec<String>,
    pub kind: RuleKind,
}

/// Result of evaluating one rule against one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub description: String,
    pub status: ComplianceStatus,
    pub rationale: String,
    /// Ids of policy chunks supporting the evaluation
    pub evidence: Vec<String>,
    pub confidence: f64,
}

/// Rule catalog evaluator.
pub struct ComplianceMatcher {
    rules: Vec<ComplianceRule>,
}

impl ComplianceMatcher {
    pub fn new() -> Self {
        Self {
            rules: default_catalog(),
        }
    }

    pub fn from_rules(rules: Vec<ComplianceRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ComplianceRule] {
        &self.rules
    }

    /// Evaluate every applicable rule.
    ///
    /// A passing check whose rule demands evidence, with none retrieved,
    /// downgrades to `NeedsReview`. A failing check never softens for
    /// lack of evidence.
    pub fn match_document(
        &self,
        text: &str,
        document_type: DocumentType,
        jurisdiction: Option<&str>,
        chunks: &[PolicyChunk],
    ) -> Vec<Finding> {
        let lower = text.to_lowercase();
        let mut findings: Vec<Finding> = self
            .rules
            .iter()
            .filter(|r| applies_to_type(r, document_type))
            .filter(|r| applies_to_jurisdiction(r, jurisdiction))
            .map(|rule| evaluate(rule, &lower, chunks))
            .collect();
        findings.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        findings
    }
}

impl Default for ComplianceMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn applies_to_type(rule: &ComplianceRule, doc_type: DocumentType) -> bool {
    rule.document_types.is_empty() || rule.document_types.contains(&doc_type)
}

fn applies_to_jurisdiction(rule: &ComplianceRule, jurisdiction: Option<&str>) -> bool {
    match (&rule.jurisdiction, jurisdiction) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(rule_j), Some(query_j)) => rule_j.eq_ignore_ascii_case(query_j),
    }
}

fn evaluate(rule: &ComplianceRule, lower_text: &str, chunks: &[PolicyChunk]) -> Finding {
    let evidence = supporting_chunks(rule, chunks);

    let (status, rationale, confidence) = match &rule.kind {
        RuleKind::RequiredDisclosure { any_of } => match find_phrase(lower_text, any_of) {
            Some(phrase) => (
                ComplianceStatus::Pass,
                format!("required language present: \"{}\"", phrase),
                0.9,
            ),
            None => (
                ComplianceStatus::Fail,
                "none of the required phrases found".to_string(),
                0.9,
            ),
        },
        RuleKind::ProhibitedContent { any_of } => match find_phrase(lower_text, any_of) {
            Some(phrase) => (
                ComplianceStatus::Fail,
                format!("prohibited language present: \"{}\"", phrase),
                0.9,
            ),
            None => (
                ComplianceStatus::Pass,
                "no prohibited language found".to_string(),
                0.9,
            ),
        },
        RuleKind::ManualReview { trigger_any } => match find_phrase(lower_text, trigger_any) {
            Some(phrase) => (
                ComplianceStatus::NeedsReview,
                format!("trigger phrase present: \"{}\"", phrase),
                0.5,
            ),
            None => (
                ComplianceStatus::Pass,
                "no trigger phrases present".to_string(),
                0.8,
            ),
        },
    };

    let needs_evidence = !rule.evidence_terms.is_empty();
    let (status, rationale, confidence) =
        if needs_evidence && evidence.is_empty() && status == ComplianceStatus::Pass {
            (
                ComplianceStatus::NeedsReview,
                format!("{}; no supporting policy text retrieved", rationale),
                0.6,
            )
        } else {
            (status, rationale, confidence)
        };

    Finding {
        rule_id: rule.id.clone(),
        description: rule.description.clone(),
        status,
        rationale,
        evidence,
        confidence,
    }
}

fn find_phrase<'a>(lower_text: &str, phrases: &'a [String]) -> Option<&'a str> {
    phrases
        .iter()
        .find(|p| lower_text.contains(p.to_lowercase().as_str()))
        .map(|p| p.as_str())
}

fn supporting_chunks(rule: &ComplianceRule, chunks: &[PolicyChunk]) -> Vec<String> {
    if rule.evidence_terms.is_empty() {
        return Vec::new();
    }
    chunks
        .iter()
        .filter(|c| {
            let haystack = format!("{} {}", c.title, c.text).to_lowercase();
            rule.evidence_terms
                .iter()
                .any(|t| haystack.contains(t.to_lowercase().as_str()))
        })
        .map(|c| c.id.clone())
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Built-in rule catalog.
pub fn default_catalog() -> Vec<ComplianceRule> {
    vec![
        ComplianceRule {
            id: "authorization-language".to_string(),
            description: "Consent forms must carry authorization language".to_string(),
            document_types: vec![DocumentType::ConsentForm],
            jurisdiction: None,
            evidence_terms: strings(&["authorization", "consent"]),
            kind: RuleKind::RequiredDisclosure {
                any_of: strings(&["authorization", "consent", "permission to disclose"]),
            },
        },
        ComplianceRule {
            id: "discharge-followup".to_string(),
            description: "Discharge summaries must include follow-up instructions".to_string(),
            document_types: vec![DocumentType::DischargeSummary],
            jurisdiction: None,
            evidence_terms: strings(&["discharge"]),
            kind: RuleKind::RequiredDisclosure {
                any_of: strings(&["follow-up", "follow up", "return precautions"]),
            },
        },
        ComplianceRule {
            id: "lab-reference-range".to_string(),
            description: "Lab reports must reference ranges or CLIA context".to_string(),
            document_types: vec![DocumentType::LabReport],
            jurisdiction: None,
            evidence_terms: strings(&["laboratory"]),
            kind: RuleKind::RequiredDisclosure {
                any_of: strings(&["clia", "reference range", "reference interval"]),
            },
        },
        ComplianceRule {
            id: "marketing-disclosure".to_string(),
            description: "Clinical documents must not authorize marketing use".to_string(),
            document_types: Vec::new(),
            jurisdiction: None,
            evidence_terms: Vec::new(),
            kind: RuleKind::ProhibitedContent {
                any_of: strings(&[
                    "marketing purposes",
                    "promotional use",
                    "sale of information",
                ]),
            },
        },
        ComplianceRule {
            id: "psychotherapy-notes".to_string(),
            description: "Psychotherapy notes require separate handling".to_string(),
            document_types: Vec::new(),
            jurisdiction: None,
            evidence_terms: Vec::new(),
            kind: RuleKind::ProhibitedContent {
                any_of: strings(&["psychotherapy note"]),
            },
        },
        ComplianceRule {
            id: "substance-use-confidentiality".to_string(),
            description: "Substance use records carry extra confidentiality duties".to_string(),
            document_types: Vec::new(),
            jurisdiction: None,
            evidence_terms: Vec::new(),
            kind: RuleKind::ManualReview {
                trigger_any: strings(&[
                    "substance use disorder",
                    "alcohol use disorder",
                    "opioid treatment",
                ]),
            },
        },
        ComplianceRule {
            id: "full-record-release".to_string(),
            description: "Whole-record releases need scope review".to_string(),
            document_types: Vec::new(),
            jurisdiction: None,
            evidence_terms: Vec::new(),
            kind: RuleKind::ManualReview {
                trigger_any: strings(&[
                    "entire medical record",
                    "complete medical record",
                    "full chart",
                ]),
            },
        },
        ComplianceRule {
            id: "ca-minor-consent".to_string(),
            description: "California minor consent disclosures need review".to_string(),
            document_types: vec![DocumentType::ConsentForm],
            jurisdiction: Some("CA".to_string()),
            evidence_terms: Vec::new(),
            kind: RuleKind::ManualReview {
                trigger_any: strings(&["minor", "guardian"]),
            },
        },
    ]
}
