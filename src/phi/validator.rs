//! Leakage validator
//!
//! The trust boundary between redaction and everything downstream. The
//! gate re-runs the full detector stack over the redacted text; any
//! residual candidate fails it. There is no partial pass and no automatic
//! re-redaction, and a failure reports residual categories only, never
//! values.

use crate::phi::detector::DetectorSet;
use crate::phi::redactor::RedactedDocument;
use crate::phi::span::PhiType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of the leakage gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    /// Deduplicated categories still detectable after redaction
    pub residual_types: Vec<PhiType>,
    /// Raw residual candidate count
    pub residual_count: usize,
}

/// Re-detection gate over redacted output.
pub struct LeakageValidator {
    detectors: Arc<DetectorSet>,
}

impl LeakageValidator {
    pub fn new(detectors: Arc<DetectorSet>) -> Self {
        Self { detectors }
    }

    pub async fn validate(&self, document: &RedactedDocument) -> ValidationResult {
        let residual = self.detectors.detect_all(&document.text).await;

        let mut residual_types: Vec<PhiType> = residual.iter().map(|s| s.phi_type).collect();
        residual_types.sort();
        residual_types.dedup();

        ValidationResult {
            passed: residual.is_empty(),
            residual_count: residual.len(),
            residual_types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectionConfig, RedactionConfig};
    use crate::phi::patterns::NoPopulationData;
    use crate::phi::redactor::{redact, RedactionLedger};
    use crate::phi::resolver::resolve;

    fn detectors() -> Arc<DetectorSet> {
        Arc::new(DetectorSet::new(&DetectionConfig::default(), Arc::new(NoPopulationData)).unwrap())
    }

    fn doc(text: &str) -> RedactedDocument {
        RedactedDocument {
            id: "doc-t".to_string(),
            text: text.to_string(),
            ledger: RedactionLedger::default(),
        }
    }

    #[tokio::test]
    async fn test_every_placeholder_passes_the_full_stack() {
        let validator = LeakageValidator::new(detectors());
        for phi_type in PhiType::ALL {
            let text = format!("Recorded as {} in the chart.", phi_type.placeholder());
            let result = validator.validate(&doc(&text)).await;
            assert!(
                result.passed,
                "placeholder {} retriggered detection: {:?}",
                phi_type.placeholder(),
                result.residual_types
            );
        }

        // And all of them at once
        let all: Vec<&str> = PhiType::ALL.iter().map(|t| t.placeholder()).collect();
        let result = validator.validate(&doc(&all.join(" "))).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_clean_redaction_passes_gate() {
        let set = detectors();
        let text = "Patient: John Smith, DOB: 01/15/1985, Phone: (555) 123-4567";
        let candidates = set.detect_all(text).await;
        let resolved = resolve(candidates, &DetectionConfig::default());
        let (redacted, _) = redact("doc-a", text, &resolved, &RedactionConfig::default());

        assert_eq!(
            redacted.text,
            "Patient: [PATIENT_NAME], DOB: [DATE_OF_BIRTH], Phone: [PHONE]"
        );
        assert_eq!(redacted.ledger.total_redactions, 3);
        assert_eq!(redacted.ledger.counts[&PhiType::Name], 1);
        assert_eq!(redacted.ledger.counts[&PhiType::Date], 1);
        assert_eq!(redacted.ledger.counts[&PhiType::Phone], 1);

        let result = LeakageValidator::new(set).validate(&redacted).await;
        assert!(result.passed);
        assert!(result.residual_types.is_empty());
    }

    #[tokio::test]
    async fn test_residual_email_fails_gate() {
        let validator = LeakageValidator::new(detectors());
        let result = validator
            .validate(&doc("Summary: [PATIENT_NAME] seen. Contact jdoe@example.org."))
            .await;
        assert!(!result.passed);
        assert_eq!(result.residual_types, vec![PhiType::Email]);
        assert!(result.residual_count >= 1);
    }

    #[tokio::test]
    async fn test_residual_types_deduplicated_and_sorted() {
        let validator = LeakageValidator::new(detectors());
        let result = validator
            .validate(&doc(
                "SSN 123-45-6789, backup a@b.org, alternate c@d.org on record",
            ))
            .await;
        assert!(!result.passed);
        assert_eq!(result.residual_types, vec![PhiType::Ssn, PhiType::Email]);
        assert_eq!(result.residual_count, 3);
    }

    #[tokio::test]
    async fn test_result_serialization_carries_no_values() {
        let validator = LeakageValidator::new(detectors());
        let result = validator.validate(&doc("Contact jdoe@example.org")).await;
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("jdoe"));
        assert!(json.contains("email"));
    }
}
