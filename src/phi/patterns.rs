//! Pattern detector family
//!
//! Compiled-regex rules for the structured identifier categories. Every
//! regex compiles once in the constructor; detection is a `find_iter`
//! sweep per rule. Label-gated rules (MRN, fax, account and friends)
//! capture just the identifier so the surrounding label survives
//! redaction.
//!
//! Two rules need more than a regex and get dedicated scans: free-text
//! ages (numeric comparison against the configured threshold) and ZIP
//! codes (population exemption through the injected lookup).

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::phi::detector::Detector;
use crate::phi::span::{DetectorFamily, PhiSpan, PhiType};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

/// Population data source for the ZIP prefix exemption.
///
/// Reports the population of a three-digit ZIP prefix area, or `None`
/// when the source has no data for it. No data means no exemption: the
/// full code is redacted.
pub trait PopulationLookup: Send + Sync {
    fn population(&self, zip_prefix: &str) -> Option<u64>;
}

/// Always-empty population source. Forces full ZIP redaction.
pub struct NoPopulationData;

impl PopulationLookup for NoPopulationData {
    fn population(&self, _zip_prefix: &str) -> Option<u64> {
        None
    }
}

const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

struct PatternRule {
    name: &'static str,
    phi_type: PhiType,
    /// Built-in precision estimate; ambiguous shapes carry a penalty
    confidence: f64,
    /// Report the first capture group instead of the whole match
    capture: bool,
    pattern: Regex,
}

/// Regex detector for structured identifiers.
pub struct PatternDetector {
    rules: Vec<PatternRule>,
    age_pattern: Regex,
    age_threshold: u32,
    zip_pattern: Regex,
    zip_population_threshold: u64,
    population: Arc<dyn PopulationLookup>,
}

impl PatternDetector {
    pub fn new(config: &DetectionConfig, population: Arc<dyn PopulationLookup>) -> Result<Self> {
        let specs: Vec<(&'static str, PhiType, f64, bool, String)> = vec![
            (
                "ssn",
                PhiType::Ssn,
                1.0,
                false,
                r"\b\d{3}-\d{2}-\d{4}\b".to_string(),
            ),
            (
                "email",
                PhiType::Email,
                1.0,
                false,
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b".to_string(),
            ),
            // Fax before phone: on the same number the fax label wins the tie
            (
                "fax",
                PhiType::Fax,
                1.0,
                true,
                r"(?i)\bfax\s*(?:number|no\.?|#)?\s*[:.]?\s*(\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4})\b"
                    .to_string(),
            ),
            (
                "phone",
                PhiType::Phone,
                1.0,
                false,
                r"(?:\(\d{3}\)\s*|\b\d{3}[\s.-])\d{3}[\s.-]\d{4}\b".to_string(),
            ),
            (
                "url",
                PhiType::Url,
                0.98,
                false,
                r#"\bhttps?://[^\s<>"']+|\bwww\.[^\s<>"']+"#.to_string(),
            ),
            (
                "ip_address",
                PhiType::IpAddress,
                0.95,
                false,
                r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b"
                    .to_string(),
            ),
            (
                "date_numeric",
                PhiType::Date,
                0.95,
                false,
                r"\b(?:\d{1,2}/\d{1,2}/\d{4}|\d{4}-\d{2}-\d{2})\b".to_string(),
            ),
            (
                "date_written",
                PhiType::Date,
                0.95,
                false,
                format!(
                    r"(?i)\b(?:{m})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}\b|\b\d{{1,2}}\s+(?:{m})\.?,?\s+\d{{4}}\b|\b(?:{m})\.?,?\s+\d{{4}}\b",
                    m = MONTHS
                ),
            ),
            (
                "mrn",
                PhiType::Mrn,
                1.0,
                true,
                r"(?i)\b(?:mrn|medical\s+record(?:\s+(?:number|no\.?|#))?)\s*[#:]?\s*(\d{6,10})\b"
                    .to_string(),
            ),
            (
                "health_plan_id",
                PhiType::HealthPlanId,
                0.98,
                true,
                r"(?i)\b(?:health\s+plan|beneficiary|member|policy)\s*(?:id|number|no\.?|#)\s*[:.]?\s*([A-Za-z]{0,3}-?\d[A-Za-z0-9-]{4,12})\b"
                    .to_string(),
            ),
            (
                "account_number",
                PhiType::AccountNumber,
                0.98,
                true,
                r"(?i)\b(?:account|acct)\s*(?:number|no\.?|#)?\s*[:.]?\s*(\d{6,14})\b".to_string(),
            ),
            (
                "license_number",
                PhiType::LicenseNumber,
                0.95,
                true,
                r"(?i)\b(?:(?:license|certificate|dea)\s+(?:number|no\.?)\s*[#:]?|(?:license|certificate|dea)\s*[#:])\s*([A-Za-z]{0,3}-?\d[A-Za-z0-9-]{3,12})\b"
                    .to_string(),
            ),
            // Plate before VIN so the labeled form wins on ties
            (
                "vehicle_plate",
                PhiType::VehicleId,
                0.95,
                true,
                r"(?i)\b(?:license\s+plate|plate)\s*(?:number|no\.?|#)?\s*[:.]?\s*([A-Za-z]{0,3}-?\d[A-Za-z0-9-]{1,7})\b"
                    .to_string(),
            ),
            (
                "vehicle_vin",
                PhiType::VehicleId,
                0.90,
                false,
                r"\b[A-HJ-NPR-Z0-9]{17}\b".to_string(),
            ),
            (
                "device_serial",
                PhiType::DeviceId,
                0.95,
                true,
                r"(?i)\b(?:serial|device|implant|model)\s*(?:id|number|no\.?|#)\s*[:.]?\s*([A-Za-z0-9][A-Za-z0-9-]{3,19})\b"
                    .to_string(),
            ),
            (
                "biometric_ref",
                PhiType::BiometricId,
                0.95,
                true,
                r"(?i)\b(?:fingerprint|voiceprint|retinal?|iris|biometric)\s*(?:id|code|scan|template|ref(?:erence)?)\s*[:.]?\s*([A-Za-z0-9][A-Za-z0-9-]{3,23})\b"
                    .to_string(),
            ),
            (
                "unique_id",
                PhiType::UniqueId,
                0.95,
                true,
                r"(?i)\b(?:patient|subject|study|case|specimen|accession)\s*(?:id|number|no\.?|#)\s*[:.]?\s*([A-Za-z]{0,4}-?\d[A-Za-z0-9-]{2,14})\b"
                    .to_string(),
            ),
        ];

        let rules = specs
            .into_iter()
            .map(|(name, phi_type, confidence, capture, pattern)| {
                let pattern = Regex::new(&pattern).map_err(|e| {
                    Error::Internal(format!("invalid builtin pattern '{}': {}", name, e))
                })?;
                Ok(PatternRule {
                    name,
                    phi_type,
                    confidence,
                    capture,
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let age_pattern = Regex::new(
            r"(?i)\b(?:aged?\s*:?\s*(\d{1,3})\b|(\d{1,3})[\s-]*(?:years?[\s-]*old|years?\s+of\s+age|y/?o\b))",
        )
        .map_err(|e| Error::Internal(format!("invalid builtin pattern 'age': {}", e)))?;

        let zip_pattern = Regex::new(r"\b\d{5}(?:-\d{4})?\b")
            .map_err(|e| Error::Internal(format!("invalid builtin pattern 'zip': {}", e)))?;

        Ok(Self {
            rules,
            age_pattern,
            age_threshold: config.age_threshold,
            zip_pattern,
            zip_population_threshold: config.zip_population_threshold,
            population,
        })
    }

    fn scan(&self, text: &str) -> Vec<PhiSpan> {
        let mut spans = Vec::new();

        for rule in &self.rules {
            if rule.capture {
                for caps in rule.pattern.captures_iter(text) {
                    let m = (1..caps.len())
                        .find_map(|i| caps.get(i))
                        .or_else(|| caps.get(0));
                    if let Some(m) = m {
                        spans.push(PhiSpan::new(
                            m.start(),
                            m.end(),
                            rule.phi_type,
                            rule.name,
                            DetectorFamily::Pattern,
                            rule.confidence,
                        ));
                    }
                }
            } else {
                for m in rule.pattern.find_iter(text) {
                    spans.push(PhiSpan::new(
                        m.start(),
                        m.end(),
                        rule.phi_type,
                        rule.name,
                        DetectorFamily::Pattern,
                        rule.confidence,
                    ));
                }
            }
        }

        self.scan_ages(text, &mut spans);
        self.scan_zips(text, &mut spans);
        spans
    }

    /// Free-text ages. Only ages strictly over the threshold are
    /// identifiers; everything else passes through untouched.
    fn scan_ages(&self, text: &str, spans: &mut Vec<PhiSpan>) {
        for caps in self.age_pattern.captures_iter(text) {
            let digits = match (1..caps.len()).find_map(|i| caps.get(i)) {
                Some(d) => d,
                None => continue,
            };
            let age: u32 = match digits.as_str().parse() {
                Ok(a) => a,
                Err(_) => continue,
            };
            if age > self.age_threshold {
                if let Some(whole) = caps.get(0) {
                    spans.push(PhiSpan::new(
                        whole.start(),
                        whole.end(),
                        PhiType::AgeOver89,
                        "age",
                        DetectorFamily::Pattern,
                        1.0,
                    ));
                }
            }
        }
    }

    /// ZIP codes. The first three digits survive only when the lookup
    /// reports the prefix area population above the threshold; otherwise
    /// (including the no-data case) the whole code is redacted.
    fn scan_zips(&self, text: &str, spans: &mut Vec<PhiSpan>) {
        for m in self.zip_pattern.find_iter(text) {
            let prefix = &text[m.start()..m.start() + 3];
            let keep_prefix = self
                .population
                .population(prefix)
                .map_or(false, |p| p > self.zip_population_threshold);

            let mut span = if keep_prefix {
                PhiSpan::new(
                    m.start() + 3,
                    m.end(),
                    PhiType::ZipCode,
                    "zip",
                    DetectorFamily::Pattern,
                    0.90, // bare five-digit runs are shape-ambiguous
                )
            } else {
                PhiSpan::new(
                    m.start(),
                    m.end(),
                    PhiType::ZipCode,
                    "zip",
                    DetectorFamily::Pattern,
                    0.90,
                )
            };
            if keep_prefix {
                span = span.with_note("zip prefix retained, population above threshold");
            }
            spans.push(span);
        }
    }
}

#[async_trait]
impl Detector for PatternDetector {
    async fn detect(&self, text: &str) -> Vec<PhiSpan> {
        self.scan(text)
    }

    fn name(&self) -> &str {
        "pattern"
    }

    fn family(&self) -> DetectorFamily {
        DetectorFamily::Pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> PatternDetector {
        PatternDetector::new(&DetectionConfig::default(), Arc::new(NoPopulationData)).unwrap()
    }

    fn types_of(spans: &[PhiSpan]) -> Vec<PhiType> {
        spans.iter().map(|s| s.phi_type).collect()
    }

    #[tokio::test]
    async fn test_phone_formats() {
        let d = detector();
        for text in [
            "Call (555) 123-4567 today",
            "Call 555-123-4567 today",
            "Call 555.123.4567 today",
        ] {
            let spans = d.detect(text).await;
            assert!(
                types_of(&spans).contains(&PhiType::Phone),
                "missed phone in: {}",
                text
            );
        }
    }

    #[tokio::test]
    async fn test_ssn_and_email() {
        let d = detector();
        let spans = d
            .detect("SSN 123-45-6789, reach me at jdoe@example.org")
            .await;
        assert!(types_of(&spans).contains(&PhiType::Ssn));
        assert!(types_of(&spans).contains(&PhiType::Email));
    }

    #[tokio::test]
    async fn test_mrn_captures_digits_only() {
        let d = detector();
        let text = "MRN: 12345678 on file";
        let spans = d.detect(text).await;
        let mrn = spans.iter().find(|s| s.phi_type == PhiType::Mrn).unwrap();
        assert_eq!(&text[mrn.start..mrn.end], "12345678");
    }

    #[tokio::test]
    async fn test_fax_label_captures_number() {
        let d = detector();
        let text = "Fax: (555) 111-2222";
        let spans = d.detect(text).await;
        let fax = spans.iter().find(|s| s.phi_type == PhiType::Fax).unwrap();
        assert_eq!(&text[fax.start..fax.end], "(555) 111-2222");
    }

    #[tokio::test]
    async fn test_date_formats() {
        let d = detector();
        for text in [
            "DOB: 01/15/1985",
            "Admitted 1985-01-15",
            "Seen on March 5, 1985",
            "Seen on 5 March 1985",
        ] {
            let spans = d.detect(text).await;
            assert!(
                types_of(&spans).contains(&PhiType::Date),
                "missed date in: {}",
                text
            );
        }
    }

    #[tokio::test]
    async fn test_year_only_is_not_a_date() {
        let d = detector();
        let spans = d.detect("Diagnosed in 1995 and stable since").await;
        assert!(!types_of(&spans).contains(&PhiType::Date));
    }

    #[tokio::test]
    async fn test_age_over_threshold_redacted() {
        let d = detector();
        for text in [
            "Patient is 94 years old",
            "a 92-year-old man",
            "aged 95",
            "Patient is 90 years old",
        ] {
            let spans = d.detect(text).await;
            assert!(
                types_of(&spans).contains(&PhiType::AgeOver89),
                "missed age in: {}",
                text
            );
        }
    }

    #[tokio::test]
    async fn test_age_at_or_under_threshold_kept() {
        let d = detector();
        for text in ["Patient is 89 years old", "a 45-year-old woman", "aged 12"] {
            let spans = d.detect(text).await;
            assert!(
                !types_of(&spans).contains(&PhiType::AgeOver89),
                "should not flag: {}",
                text
            );
        }
    }

    #[tokio::test]
    async fn test_zip_full_redaction_without_population_data() {
        let d = detector();
        let text = "Cambridge, MA 02139";
        let spans = d.detect(text).await;
        let zip = spans
            .iter()
            .find(|s| s.phi_type == PhiType::ZipCode)
            .unwrap();
        assert_eq!(&text[zip.start..zip.end], "02139");
        assert!(zip.note.is_none());
    }

    #[tokio::test]
    async fn test_zip_prefix_retained_with_population_data() {
        struct BigCity;
        impl PopulationLookup for BigCity {
            fn population(&self, _zip_prefix: &str) -> Option<u64> {
                Some(100_000)
            }
        }
        let d = PatternDetector::new(&DetectionConfig::default(), Arc::new(BigCity)).unwrap();
        let text = "Cambridge, MA 02139";
        let spans = d.detect(text).await;
        let zip = spans
            .iter()
            .find(|s| s.phi_type == PhiType::ZipCode)
            .unwrap();
        assert_eq!(&text[zip.start..zip.end], "39");
        assert!(zip.note.is_some());
    }

    #[tokio::test]
    async fn test_zip_small_population_fully_redacted() {
        struct SmallTown;
        impl PopulationLookup for SmallTown {
            fn population(&self, _zip_prefix: &str) -> Option<u64> {
                Some(500)
            }
        }
        let d = PatternDetector::new(&DetectionConfig::default(), Arc::new(SmallTown)).unwrap();
        let text = "somewhere 83001";
        let spans = d.detect(text).await;
        let zip = spans
            .iter()
            .find(|s| s.phi_type == PhiType::ZipCode)
            .unwrap();
        assert_eq!(&text[zip.start..zip.end], "83001");
    }

    #[tokio::test]
    async fn test_ip_and_url() {
        let d = detector();
        let spans = d
            .detect("Logged from 192.168.1.100, see https://portal.example.org/visit")
            .await;
        assert!(types_of(&spans).contains(&PhiType::IpAddress));
        assert!(types_of(&spans).contains(&PhiType::Url));
    }

    #[tokio::test]
    async fn test_vin_and_plate() {
        let d = detector();
        let spans = d.detect("Vehicle VIN 1HGBH41JXMN109186").await;
        assert!(types_of(&spans).contains(&PhiType::VehicleId));

        let text = "license plate: ABC-1234";
        let spans = d.detect(text).await;
        let plate = spans
            .iter()
            .find(|s| s.phi_type == PhiType::VehicleId)
            .unwrap();
        assert_eq!(&text[plate.start..plate.end], "ABC-1234");
    }

    #[tokio::test]
    async fn test_health_plan_and_account() {
        let d = detector();
        let spans = d
            .detect("Member ID: XQ-7781234, account number 000123456")
            .await;
        assert!(types_of(&spans).contains(&PhiType::HealthPlanId));
        assert!(types_of(&spans).contains(&PhiType::AccountNumber));
    }

    #[tokio::test]
    async fn test_license_plate_not_confused_with_license_number() {
        let d = detector();
        let spans = d.detect("license plate: ABC-1234").await;
        assert!(!types_of(&spans).contains(&PhiType::LicenseNumber));
    }

    #[tokio::test]
    async fn test_plain_clinical_text_clean() {
        let d = detector();
        let spans = d
            .detect("Patient reports intermittent chest pain, resolved with rest.")
            .await;
        assert!(spans.is_empty());
    }
}
