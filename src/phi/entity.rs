//! Entity detector family
//!
//! Context-window tagging for the identifier categories that have no
//! fixed shape: person names, organizations, geographic units. Triggers
//! (honorifics, record labels, role words, prepositions) anchor a run of
//! capitalized tokens; confidence combines trigger strength with token
//! shape. States themselves are not identifiers, so bare state names are
//! filtered out of geographic candidates.

use crate::error::{Error, Result};
use crate::phi::detector::Detector;
use crate::phi::span::{DetectorFamily, PhiSpan, PhiType};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;

const STATE_ABBRS: &str = "AL|AK|AZ|AR|CA|CO|CT|DE|FL|GA|HI|ID|IL|IN|IA|KS|KY|LA|ME|MD|MA|MI|MN|MS|MO|MT|NE|NV|NH|NJ|NM|NY|NC|ND|OH|OK|OR|PA|RI|SC|SD|TN|TX|UT|VT|VA|WA|WV|WI|WY|DC";

const STATE_NAMES: &[&str] = &[
    "Alabama",
    "Alaska",
    "Arizona",
    "Arkansas",
    "California",
    "Colorado",
    "Connecticut",
    "Delaware",
    "Florida",
    "Georgia",
    "Hawaii",
    "Idaho",
    "Illinois",
    "Indiana",
    "Iowa",
    "Kansas",
    "Kentucky",
    "Louisiana",
    "Maine",
    "Maryland",
    "Massachusetts",
    "Michigan",
    "Minnesota",
    "Mississippi",
    "Missouri",
    "Montana",
    "Nebraska",
    "Nevada",
    "New Hampshire",
    "New Jersey",
    "New Mexico",
    "New York",
    "North Carolina",
    "North Dakota",
    "Ohio",
    "Oklahoma",
    "Oregon",
    "Pennsylvania",
    "Rhode Island",
    "South Carolina",
    "South Dakota",
    "Tennessee",
    "Texas",
    "Utah",
    "Vermont",
    "Virginia",
    "Washington",
    "West Virginia",
    "Wisconsin",
    "Wyoming",
];

const CALENDAR_WORDS: &[&str] = &[
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const GIVEN_NAMES: &[&str] = &[
    "james", "john", "robert", "michael", "william", "david", "richard", "joseph", "thomas",
    "charles", "christopher", "daniel", "matthew", "anthony", "donald", "mark", "paul", "steven",
    "andrew", "kenneth", "george", "edward", "brian", "kevin", "ronald", "mary", "patricia",
    "jennifer", "linda", "elizabeth", "barbara", "susan", "jessica", "sarah", "karen", "nancy",
    "lisa", "margaret", "betty", "sandra", "ashley", "dorothy", "kimberly", "emily", "donna",
    "michelle", "carol", "amanda", "maria", "helen",
];

const ORG_STOPWORDS: &[&str] = &["the", "a", "an", "our", "this", "at", "in", "to"];

struct EntityRule {
    name: &'static str,
    phi_type: PhiType,
    confidence: f64,
    pattern: Regex,
}

/// Trigger-anchored tagger for names, organizations and places.
pub struct EntityDetector {
    rules: Vec<EntityRule>,
    pair_pattern: Regex,
    given_names: HashSet<&'static str>,
    state_names: HashSet<&'static str>,
    calendar_words: HashSet<&'static str>,
}

impl EntityDetector {
    pub fn new() -> Result<Self> {
        // A capitalized token, unicode-aware so accented names resolve
        let token = r"\p{Lu}[\p{L}'’\-]+";

        let specs: Vec<(&'static str, PhiType, f64, String)> = vec![
            (
                "honorific_name",
                PhiType::Name,
                0.95,
                format!(
                    r"\b(?:Dr|Mr|Mrs|Ms|Prof)\.?\s+((?:{t})(?:\s+(?:{t}|\p{{Lu}}\.)){{0,2}})",
                    t = token
                ),
            ),
            (
                "labeled_name",
                PhiType::Name,
                0.92,
                format!(
                    r"(?i:\b(?:patient\s+name|patient|name|guarantor|subscriber|insured|next\s+of\s+kin|emergency\s+contact)\s*:)\s*((?:{t})(?:\s+(?:{t}|\p{{Lu}}\.)){{0,3}})",
                    t = token
                ),
            ),
            (
                "role_adjacent_name",
                PhiType::Name,
                0.85,
                format!(
                    r"(?i:\b(?:physician|attending|surgeon|nurse|provider|referred\s+by|seen\s+by)\s*:?\s+)(?:Dr\.?\s+)?((?:{t})(?:\s+(?:{t}|\p{{Lu}}\.)){{0,2}})",
                    t = token
                ),
            ),
            (
                "organization",
                PhiType::Organization,
                0.85,
                format!(
                    r"\b((?:{t}\s+){{1,4}}(?:Hospital|Clinic|Medical\s+Center|Health(?:care)?(?:\s+System)?|Laborator(?:y|ies)|Pharmacy|University|Institute|Foundation|Associates|Group|Practice))\b",
                    t = token
                ),
            ),
            (
                "street_address",
                PhiType::GeographicUnit,
                0.95,
                format!(
                    r"\b(\d{{1,5}}\s+(?:{t}\s+){{1,3}}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Drive|Lane|Ln|Court|Ct|Place|Pl|Way)\.?)\b",
                    t = token
                ),
            ),
            (
                "city_state",
                PhiType::GeographicUnit,
                0.92,
                format!(
                    r"\b((?:{t})(?:\s+{t}){{0,2}}),\s+(?:{s})\b",
                    t = token,
                    s = STATE_ABBRS
                ),
            ),
            (
                "preposition_place",
                PhiType::GeographicUnit,
                0.62,
                format!(
                    r"\b(?:in|at|from|near)\s+((?:{t})(?:\s+{t}){{0,2}})\b",
                    t = token
                ),
            ),
        ];

        let rules = specs
            .into_iter()
            .map(|(name, phi_type, confidence, pattern)| {
                let pattern = Regex::new(&pattern).map_err(|e| {
                    Error::Internal(format!("invalid entity pattern '{}': {}", name, e))
                })?;
                Ok(EntityRule {
                    name,
                    phi_type,
                    confidence,
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let pair_pattern = Regex::new(r"\b(\p{Lu}\p{Ll}+)\s+\p{Lu}[\p{L}'’\-]+\b")
            .map_err(|e| Error::Internal(format!("invalid entity pattern 'pair': {}", e)))?;

        Ok(Self {
            rules,
            pair_pattern,
            given_names: GIVEN_NAMES.iter().copied().collect(),
            state_names: STATE_NAMES.iter().copied().collect(),
            calendar_words: CALENDAR_WORDS.iter().copied().collect(),
        })
    }

    fn scan(&self, text: &str) -> Vec<PhiSpan> {
        let mut spans = Vec::new();

        for rule in &self.rules {
            for caps in rule.pattern.captures_iter(text) {
                let m = match caps.get(1) {
                    Some(m) => m,
                    None => continue,
                };
                let captured = m.as_str();

                if rule.phi_type == PhiType::GeographicUnit && self.is_excluded_place(captured) {
                    continue;
                }

                let (start, trimmed) = match rule.phi_type {
                    PhiType::Organization => strip_leading_stopwords(m.start(), captured),
                    _ => (m.start(), captured),
                };
                if trimmed.is_empty() {
                    continue;
                }

                spans.push(PhiSpan::new(
                    start,
                    start + trimmed.len(),
                    rule.phi_type,
                    rule.name,
                    DetectorFamily::Entity,
                    shape_adjusted(rule.confidence, trimmed),
                ));
            }
        }

        // Untriggered capitalized pairs whose first token is a common
        // given name ("John Smith presented with ...")
        for caps in self.pair_pattern.captures_iter(text) {
            let first = match caps.get(1) {
                Some(f) => f,
                None => continue,
            };
            if !self
                .given_names
                .contains(first.as_str().to_lowercase().as_str())
            {
                continue;
            }
            let whole = match caps.get(0) {
                Some(w) => w,
                None => continue,
            };
            spans.push(PhiSpan::new(
                whole.start(),
                whole.end(),
                PhiType::Name,
                "given_name_pair",
                DetectorFamily::Entity,
                shape_adjusted(0.75, whole.as_str()),
            ));
        }

        spans
    }

    /// States and calendar words are not geographic identifiers.
    fn is_excluded_place(&self, captured: &str) -> bool {
        self.state_names.contains(captured) || self.calendar_words.contains(captured)
    }
}

/// Small bonus for multi-token runs; single tokens are weaker evidence.
fn shape_adjusted(base: f64, captured: &str) -> f64 {
    if captured.contains(' ') {
        (base + 0.03).min(0.98)
    } else {
        base
    }
}

fn strip_leading_stopwords(start: usize, captured: &str) -> (usize, &str) {
    let mut offset = 0;
    let mut rest = captured;
    loop {
        let word_end = rest.find(' ').unwrap_or(rest.len());
        let word = &rest[..word_end];
        if word_end < rest.len() && ORG_STOPWORDS.contains(&word.to_lowercase().as_str()) {
            offset += word_end + 1;
            rest = &rest[word_end + 1..];
        } else {
            break;
        }
    }
    (start + offset, rest)
}

#[async_trait]
impl Detector for EntityDetector {
    async fn detect(&self, text: &str) -> Vec<PhiSpan> {
        self.scan(text)
    }

    fn name(&self) -> &str {
        "entity"
    }

    fn family(&self) -> DetectorFamily {
        DetectorFamily::Entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> EntityDetector {
        EntityDetector::new().unwrap()
    }

    fn find<'a>(spans: &'a [PhiSpan], t: PhiType, text: &str, expect: &str) -> &'a PhiSpan {
        spans
            .iter()
            .find(|s| s.phi_type == t && &text[s.start..s.end] == expect)
            .unwrap_or_else(|| panic!("no {:?} span over {:?} in {:?}", t, expect, spans))
    }

    #[tokio::test]
    async fn test_labeled_patient_name() {
        let d = detector();
        let text = "Patient: John Smith, DOB: 01/15/1985";
        let spans = d.detect(text).await;
        let name = find(&spans, PhiType::Name, text, "John Smith");
        assert!(name.confidence >= 0.9);
    }

    #[tokio::test]
    async fn test_honorific_name_excludes_title() {
        let d = detector();
        let text = "Evaluated by Dr. García on arrival";
        let spans = d.detect(text).await;
        find(&spans, PhiType::Name, text, "García");
    }

    #[tokio::test]
    async fn test_role_adjacent_name() {
        let d = detector();
        let text = "Attending: Sarah Chen";
        let spans = d.detect(text).await;
        find(&spans, PhiType::Name, text, "Sarah Chen");
    }

    #[tokio::test]
    async fn test_untriggered_given_name_pair() {
        let d = detector();
        let text = "John Smith presented with chest pain";
        let spans = d.detect(text).await;
        let name = find(&spans, PhiType::Name, text, "John Smith");
        assert!(name.confidence < 0.9);
    }

    #[tokio::test]
    async fn test_organization_with_suffix() {
        let d = detector();
        let text = "Transferred from Mount Auburn Hospital overnight";
        let spans = d.detect(text).await;
        find(&spans, PhiType::Organization, text, "Mount Auburn Hospital");
    }

    #[tokio::test]
    async fn test_city_state_flags_city_only() {
        let d = detector();
        let text = "Resides in Cambridge, MA 02139";
        let spans = d.detect(text).await;
        find(&spans, PhiType::GeographicUnit, text, "Cambridge");
    }

    #[tokio::test]
    async fn test_bare_state_not_flagged() {
        let d = detector();
        let spans = d.detect("Relocated to a facility in Massachusetts").await;
        assert!(
            !spans.iter().any(|s| s.phi_type == PhiType::GeographicUnit),
            "state names are not geographic identifiers: {:?}",
            spans
        );
    }

    #[tokio::test]
    async fn test_street_address() {
        let d = detector();
        let text = "Discharged home to 123 Main Street yesterday";
        let spans = d.detect(text).await;
        find(&spans, PhiType::GeographicUnit, text, "123 Main Street");
    }

    #[tokio::test]
    async fn test_month_after_preposition_not_geographic() {
        let d = detector();
        let spans = d.detect("Symptoms began in March and persisted").await;
        assert!(!spans.iter().any(|s| s.phi_type == PhiType::GeographicUnit));
    }

    #[tokio::test]
    async fn test_plain_text_clean() {
        let d = detector();
        let spans = d
            .detect("no acute distress, lungs clear to auscultation")
            .await;
        assert!(spans.is_empty());
    }
}
