//! PHI span model
//!
//! Detectors report half-open `[start, end)` byte offsets into the exact
//! text snapshot they were handed. Offsets always land on `char`
//! boundaries. Every PHI category maps to one canonical placeholder token;
//! the vocabulary is closed so downstream consumers can rely on it.

use serde::{Deserialize, Serialize};

/// PHI category under the Safe Harbor identifier list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiType {
    /// Person name (patients, relatives, clinicians)
    Name,
    /// Calendar date tied to an individual
    Date,
    /// Free-text age over the configured threshold
    #[serde(rename = "age_over_89")]
    AgeOver89,
    /// Medical record number
    Mrn,
    /// Social Security number
    Ssn,
    /// Telephone number
    Phone,
    /// Fax number
    Fax,
    /// Email address
    Email,
    /// Web URL
    Url,
    /// IP address
    IpAddress,
    /// Postal ZIP code
    ZipCode,
    /// Health plan beneficiary number
    HealthPlanId,
    /// Account number
    AccountNumber,
    /// Certificate or license number
    LicenseNumber,
    /// Device identifier or serial number
    DeviceId,
    /// Vehicle identifier (VIN, plate)
    VehicleId,
    /// Biometric identifier reference
    BiometricId,
    /// Employer or facility name
    Organization,
    /// Geographic subdivision smaller than a state
    GeographicUnit,
    /// Any other unique identifying number or code
    UniqueId,
}

impl PhiType {
    /// Every PHI category, in placeholder-vocabulary order.
    pub const ALL: [PhiType; 20] = [
        PhiType::Name,
        PhiType::Date,
        PhiType::AgeOver89,
        PhiType::Mrn,
        PhiType::Ssn,
        PhiType::Phone,
        PhiType::Fax,
        PhiType::Email,
        PhiType::Url,
        PhiType::IpAddress,
        PhiType::ZipCode,
        PhiType::HealthPlanId,
        PhiType::AccountNumber,
        PhiType::LicenseNumber,
        PhiType::DeviceId,
        PhiType::VehicleId,
        PhiType::BiometricId,
        PhiType::Organization,
        PhiType::GeographicUnit,
        PhiType::UniqueId,
    ];

    /// Canonical placeholder token substituted for this category.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Name => "[PATIENT_NAME]",
            Self::Date => "[DATE_OF_BIRTH]",
            Self::AgeOver89 => "[AGE_89_PLUS]",
            Self::Mrn => "[MRN]",
            Self::Ssn => "[SSN]",
            Self::Phone => "[PHONE]",
            Self::Fax => "[FAX]",
            Self::Email => "[EMAIL]",
            Self::Url => "[URL]",
            Self::IpAddress => "[IP_ADDRESS]",
            Self::ZipCode => "[ZIP_CODE]",
            Self::HealthPlanId => "[HEALTH_PLAN_ID]",
            Self::AccountNumber => "[ACCOUNT_NUMBER]",
            Self::LicenseNumber => "[LICENSE_NUMBER]",
            Self::DeviceId => "[DEVICE_ID]",
            Self::VehicleId => "[VEHICLE_ID]",
            Self::BiometricId => "[BIOMETRIC_ID]",
            Self::Organization => "[ORGANIZATION]",
            Self::GeographicUnit => "[GEOGRAPHIC_UNIT]",
            Self::UniqueId => "[UNIQUE_ID]",
        }
    }

    /// Stable snake_case name (audit events, CLI output, gold labels).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Date => "date",
            Self::AgeOver89 => "age_over_89",
            Self::Mrn => "mrn",
            Self::Ssn => "ssn",
            Self::Phone => "phone",
            Self::Fax => "fax",
            Self::Email => "email",
            Self::Url => "url",
            Self::IpAddress => "ip_address",
            Self::ZipCode => "zip_code",
            Self::HealthPlanId => "health_plan_id",
            Self::AccountNumber => "account_number",
            Self::LicenseNumber => "license_number",
            Self::DeviceId => "device_id",
            Self::VehicleId => "vehicle_id",
            Self::BiometricId => "biometric_id",
            Self::Organization => "organization",
            Self::GeographicUnit => "geographic_unit",
            Self::UniqueId => "unique_id",
        }
    }
}

impl std::fmt::Display for PhiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PhiType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown phi type: {}", s))
    }
}

/// Detector family that produced a span.
///
/// Families carry a fixed precedence used as the final overlap tie-break:
/// Pattern > Entity > Contextual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorFamily {
    /// Compiled-regex detectors
    Pattern,
    /// Context-window entity tagger
    Entity,
    /// Escalation detector for contested segments
    Contextual,
}

impl DetectorFamily {
    /// Tie-break rank; higher wins.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Pattern => 3,
            Self::Entity => 2,
            Self::Contextual => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Entity => "entity",
            Self::Contextual => "contextual",
        }
    }
}

impl std::fmt::Display for DetectorFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single PHI candidate reported by a detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhiSpan {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
    /// PHI category
    pub phi_type: PhiType,
    /// Detector that produced the span (audit attribution)
    pub detector: String,
    /// Detector family
    pub family: DetectorFamily,
    /// Confidence score in [0, 1]
    pub confidence: f64,
    /// PHI-free justification, set by the contextual detector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PhiSpan {
    pub fn new(
        start: usize,
        end: usize,
        phi_type: PhiType,
        detector: impl Into<String>,
        family: DetectorFamily,
        confidence: f64,
    ) -> Self {
        Self {
            start,
            end,
            phi_type,
            detector: detector.into(),
            family,
            confidence,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Span width in bytes.
    pub fn width(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Half-open intersection test: touching spans do not overlap.
    pub fn overlaps(&self, other: &PhiSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Ordered, non-overlapping spans ready for redaction.
///
/// Only the resolver constructs these; the invariant
/// `spans[i].end <= spans[i+1].start` holds for every adjacent pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedSpanSet {
    spans: Vec<PhiSpan>,
}

impl ResolvedSpanSet {
    /// Wrap spans already sorted by start and free of overlaps.
    pub(crate) fn from_sorted(spans: Vec<PhiSpan>) -> Self {
        debug_assert!(
            spans.windows(2).all(|w| w[0].end <= w[1].start),
            "resolved spans must be ordered and non-overlapping"
        );
        Self { spans }
    }

    pub fn spans(&self) -> &[PhiSpan] {
        &self.spans
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PhiSpan> {
        self.spans.iter()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn into_inner(self) -> Vec<PhiSpan> {
        self.spans
    }
}
