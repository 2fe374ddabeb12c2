//! Redactor
//!
//! Splices the canonical placeholder over every resolved span, walking
//! offsets in reverse so earlier positions stay valid while the text
//! shrinks and grows. The ledger records counts per category and the
//! contextual justifications; it never records original values. Callers
//! must drop the original text as soon as this returns.

use crate::config::RedactionConfig;
use crate::phi::span::{PhiType, ResolvedSpanSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// What was removed, by category. Safe to persist and to log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionLedger {
    /// Replacement count per PHI category
    pub counts: BTreeMap<PhiType, u64>,
    /// Total replacements made
    pub total_redactions: u64,
    /// PHI-free justification notes carried over from detection
    pub notes: Vec<String>,
}

impl RedactionLedger {
    /// One-line rendering for CLI output and audit fields.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(t, n)| format!("{}={}", t, n))
            .collect();
        format!("{} (total {})", parts.join(" "), self.total_redactions)
    }
}

/// A document after placeholder substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedDocument {
    pub id: String,
    pub text: String,
    pub ledger: RedactionLedger,
}

/// One reversible replacement, emitted only in reversible mode and handed
/// straight to the external mapping store. Offsets index the original
/// text. `Debug` masks the original value so the mapping cannot leak
/// through logging.
#[derive(Clone, Serialize, Deserialize)]
pub struct PlaceholderMapping {
    pub placeholder_id: Uuid,
    pub phi_type: PhiType,
    pub start: usize,
    pub end: usize,
    pub original: String,
}

impl std::fmt::Debug for PlaceholderMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaceholderMapping")
            .field("placeholder_id", &self.placeholder_id)
            .field("phi_type", &self.phi_type)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("original", &"<redacted>")
            .finish()
    }
}

/// Replace every resolved span with its category placeholder.
pub fn redact(
    id: &str,
    text: &str,
    resolved: &ResolvedSpanSet,
    config: &RedactionConfig,
) -> (RedactedDocument, Vec<PlaceholderMapping>) {
    let spans = resolved.spans();

    let mut counts: BTreeMap<PhiType, u64> = BTreeMap::new();
    let mut notes = Vec::new();
    let mut mappings = Vec::new();

    for span in spans {
        *counts.entry(span.phi_type).or_insert(0) += 1;
        if let Some(note) = &span.note {
            notes.push(format!("{}: {}", span.phi_type, note));
        }
        if config.reversible {
            mappings.push(PlaceholderMapping {
                placeholder_id: Uuid::new_v4(),
                phi_type: span.phi_type,
                start: span.start,
                end: span.end,
                original: text[span.start..span.end].to_string(),
            });
        }
    }

    let mut redacted = text.to_string();
    for span in spans.iter().rev() {
        redacted.replace_range(span.start..span.end, span.phi_type.placeholder());
    }

    let document = RedactedDocument {
        id: id.to_string(),
        text: redacted,
        ledger: RedactionLedger {
            counts,
            total_redactions: spans.len() as u64,
            notes,
        },
    };

    (document, mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phi::span::{DetectorFamily, PhiSpan};

    fn span(text: &str, needle: &str, phi_type: PhiType) -> PhiSpan {
        let start = text.find(needle).unwrap();
        PhiSpan::new(
            start,
            start + needle.len(),
            phi_type,
            "test",
            DetectorFamily::Pattern,
            1.0,
        )
    }

    #[test]
    fn test_typed_placeholder_substitution() {
        let text = "Patient: John Smith, DOB: 01/15/1985, Phone: (555) 123-4567";
        let resolved = ResolvedSpanSet::from_sorted(vec![
            span(text, "John Smith", PhiType::Name),
            span(text, "01/15/1985", PhiType::Date),
            span(text, "(555) 123-4567", PhiType::Phone),
        ]);
        let (doc, mappings) = redact("doc-1", text, &resolved, &RedactionConfig::default());

        assert_eq!(
            doc.text,
            "Patient: [PATIENT_NAME], DOB: [DATE_OF_BIRTH], Phone: [PHONE]"
        );
        assert_eq!(doc.ledger.counts[&PhiType::Name], 1);
        assert_eq!(doc.ledger.counts[&PhiType::Date], 1);
        assert_eq!(doc.ledger.counts[&PhiType::Phone], 1);
        assert_eq!(doc.ledger.total_redactions, 3);
        assert!(mappings.is_empty());
    }

    #[test]
    fn test_counts_accumulate_per_type() {
        let text = "Call 555-123-4567 or 555-765-4321";
        let resolved = ResolvedSpanSet::from_sorted(vec![
            span(text, "555-123-4567", PhiType::Phone),
            span(text, "555-765-4321", PhiType::Phone),
        ]);
        let (doc, _) = redact("doc-2", text, &resolved, &RedactionConfig::default());
        assert_eq!(doc.ledger.counts[&PhiType::Phone], 2);
        assert_eq!(doc.ledger.total_redactions, 2);
        assert_eq!(doc.text, "Call [PHONE] or [PHONE]");
    }

    #[test]
    fn test_reversible_mode_emits_mappings() {
        let text = "MRN: 12345678";
        let resolved = ResolvedSpanSet::from_sorted(vec![span(text, "12345678", PhiType::Mrn)]);
        let config = RedactionConfig { reversible: true };
        let (doc, mappings) = redact("doc-3", text, &resolved, &config);

        assert_eq!(doc.text, "MRN: [MRN]");
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].original, "12345678");
        assert_eq!(mappings[0].start, 5);
        assert_eq!(mappings[0].end, 13);
        assert_eq!(mappings[0].phi_type, PhiType::Mrn);
    }

    #[test]
    fn test_mapping_debug_masks_original() {
        let mapping = PlaceholderMapping {
            placeholder_id: Uuid::new_v4(),
            phi_type: PhiType::Ssn,
            start: 0,
            end: 11,
            original: "123-45-6789".to_string(),
        };
        let debug = format!("{:?}", mapping);
        assert!(!debug.contains("123-45-6789"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_multibyte_text_before_span() {
        let text = "Señora García admitted, MRN: 98765432";
        let resolved = ResolvedSpanSet::from_sorted(vec![span(text, "98765432", PhiType::Mrn)]);
        let (doc, _) = redact("doc-4", text, &resolved, &RedactionConfig::default());
        assert_eq!(doc.text, "Señora García admitted, MRN: [MRN]");
    }

    #[test]
    fn test_notes_carried_into_ledger() {
        let text = "ZIP 02139 on file";
        let start = text.find("02139").unwrap();
        let resolved = ResolvedSpanSet::from_sorted(vec![PhiSpan::new(
            start,
            start + 5,
            PhiType::ZipCode,
            "zip",
            DetectorFamily::Pattern,
            0.9,
        )
        .with_note("zip prefix retained, population above threshold")]);
        let (doc, _) = redact("doc-5", text, &resolved, &RedactionConfig::default());
        assert_eq!(doc.ledger.notes.len(), 1);
        assert!(doc.ledger.notes[0].starts_with("zip_code:"));
    }

    #[test]
    fn test_empty_set_leaves_text_unchanged() {
        let (doc, mappings) = redact(
            "doc-6",
            "no identifiers",
            &ResolvedSpanSet::default(),
            &RedactionConfig::default(),
        );
        assert_eq!(doc.text, "no identifiers");
        assert_eq!(doc.ledger.total_redactions, 0);
        assert!(mappings.is_empty());
    }
}
