//! PHI detection, resolution, redaction and leakage validation
//!
//! The de-identification core. Includes:
//! - Pattern detectors for structured identifiers (regex rules)
//! - Entity detection for names, organizations and places
//! - Contextual escalation over contested segments
//! - Overlap resolution into a non-overlapping span set
//! - Placeholder redaction with an audit ledger
//! - The fail-closed leakage gate over redacted output

pub mod contextual;
pub mod detector;
pub mod entity;
pub mod patterns;
pub mod redactor;
pub mod resolver;
pub mod span;
pub mod validator;

pub use contextual::{ContestReason, ContestedSegment, ContextualDetector, HeuristicContextual};
pub use detector::{Detector, DetectorSet};
pub use entity::EntityDetector;
pub use patterns::{NoPopulationData, PatternDetector, PopulationLookup};
pub use redactor::{redact, PlaceholderMapping, RedactedDocument, RedactionLedger};
pub use resolver::resolve;
pub use span::{DetectorFamily, PhiSpan, PhiType, ResolvedSpanSet};
pub use validator::{LeakageValidator, ValidationResult};
