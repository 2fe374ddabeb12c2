//! SafeHarbor configuration management
//!
//! Configuration is an explicit immutable value threaded through the
//! pipeline stages. Nothing here is read from ambient globals after startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main SafeHarbor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafeHarborConfig {
    /// De-identification method
    #[serde(default)]
    pub method: DeidentificationMethod,

    /// Detection configuration
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Redaction configuration
    #[serde(default)]
    pub redaction: RedactionConfig,

    /// Budgets for calls that leave the process
    #[serde(default)]
    pub external: ExternalCallConfig,

    /// Policy retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Routing configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Audit configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

/// De-identification method
///
/// Safe Harbor is the only implemented method; the enum is the extension
/// slot for Expert Determination without changing the pipeline surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeidentificationMethod {
    /// HIPAA Safe Harbor: remove all eighteen identifier categories
    #[default]
    SafeHarbor,
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Enable the pattern (regex) detector family
    pub enable_pattern: bool,

    /// Enable the entity (context-window) detector family
    pub enable_entity: bool,

    /// Enable the contextual escalation detector family
    pub enable_contextual: bool,

    /// Minimum confidence floor for pattern spans
    pub pattern_floor: f64,

    /// Minimum confidence floor for entity spans
    pub entity_floor: f64,

    /// Minimum confidence floor for contextual spans
    pub contextual_floor: f64,

    /// Entity confidence below this marks the segment contested and
    /// escalates it to the contextual detector
    pub contextual_review_threshold: f64,

    /// Free-text ages strictly greater than this are redacted as a
    /// date-class identifier
    pub age_threshold: u32,

    /// ZIP prefixes with population at or below this are fully redacted
    pub zip_population_threshold: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enable_pattern: true,
            enable_entity: true,
            enable_contextual: true,
            pattern_floor: 0.85,
            entity_floor: 0.60,
            contextual_floor: 0.50,
            contextual_review_threshold: 0.75,
            age_threshold: 89,
            zip_population_threshold: 20_000,
        }
    }
}

/// Redaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Emit placeholder mappings for external encrypted storage.
    /// When false, redaction is irreversible and no mapping leaves redact().
    pub reversible: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self { reversible: false }
    }
}

/// Budgets for external collaborator calls (parse, classify, retrieve)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCallConfig {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,

    /// Maximum attempts per call (first try included)
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds
    pub retry_base_delay_ms: u64,

    /// Backoff delay ceiling in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for ExternalCallConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
        }
    }
}

/// Policy retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Directory of policy JSON files (None = empty policy set)
    pub policy_dir: Option<PathBuf>,

    /// Deployment jurisdiction, e.g. a state code. None keeps
    /// jurisdiction-specific policies and rules out of scope.
    pub jurisdiction: Option<String>,

    /// Maximum policy chunks returned per query
    pub max_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            policy_dir: None,
            jurisdiction: None,
            max_chunks: 8,
        }
    }
}

/// Routing configuration
///
/// Weights feed the composite risk score. Only monotonicity and the [0,1]
/// bound are contractual; the coefficients are tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Weight of the failed-findings share
    pub fail_weight: f64,

    /// Weight of the needs-review share
    pub review_weight: f64,

    /// Weight of mean finding uncertainty (1 - confidence)
    pub uncertainty_weight: f64,

    /// Risk at or above this rejects the document
    pub reject_threshold: f64,

    /// Risk at or above this requires human review
    pub review_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fail_weight: 0.45,
            review_weight: 0.15,
            uncertainty_weight: 0.40,
            reject_threshold: 0.7,
            review_threshold: 0.3,
        }
    }
}

/// Audit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Attach a SHA-256 digest of the redacted text to post-redaction
    /// audit events. Off by default; digests are one-way but still
    /// fingerprint the document.
    pub digest_redacted: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            digest_redacted: false,
        }
    }
}
