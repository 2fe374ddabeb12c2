//! Finding verification
//!
//! Second-pass check over matcher findings. The verifier may only hold a
//! finding where it is or push it toward review/failure, never soften
//! it; an upgrade here would let a doubtful pass reach routing with more
//! authority than the matcher gave it.

use crate::compliance::matcher::{ComplianceStatus, Finding};
use crate::error::{Error, Result};
use crate::phi::ValidationResult;
use regex::Regex;

const CONFIDENCE_FLOOR: f64 = 0.6;
const DENSITY_LIMIT: f64 = 0.5;

pub struct Verifier {
    placeholder: Regex,
}

impl Verifier {
    pub fn new() -> Result<Self> {
        // Matches the closed placeholder vocabulary
        let placeholder = Regex::new(r"\[[A-Z][A-Z0-9_]*\]")
            .map_err(|e| Error::Internal(format!("placeholder pattern: {}", e)))?;
        Ok(Self { placeholder })
    }

    /// Cross-check findings against the leakage gate result and the
    /// redacted text.
    pub fn verify(
        &self,
        findings: Vec<Finding>,
        validation: &ValidationResult,
        redacted_text: &str,
    ) -> Vec<Finding> {
        let density = self.placeholder_density(redacted_text);

        findings
            .into_iter()
            .map(|mut finding| {
                if !validation.passed {
                    finding.status = ComplianceStatus::Fail;
                    finding
                        .rationale
                        .push_str("; verifier: leakage gate did not pass");
                    return finding;
                }
                if finding.status == ComplianceStatus::Pass
                    && finding.confidence < CONFIDENCE_FLOOR
                {
                    finding.status = ComplianceStatus::NeedsReview;
                    finding
                        .rationale
                        .push_str("; verifier: confidence below floor");
                    return finding;
                }
                if finding.status == ComplianceStatus::Pass && density > DENSITY_LIMIT {
                    finding.status = ComplianceStatus::NeedsReview;
                    finding
                        .rationale
                        .push_str("; verifier: document heavily redacted, textual checks unreliable");
                }
                finding
            })
            .collect()
    }

    /// Fraction of the text occupied by placeholders.
    fn placeholder_density(&self, text: &str) -> f64 {
        if text.is_empty() {
            return 0.0;
        }
        let placeholder_len: usize = self
            .placeholder
            .find_iter(text)
            .map(|m| m.as_str().len())
            .sum();
        placeholder_len as f64 / text.len() as f64
    }
}
