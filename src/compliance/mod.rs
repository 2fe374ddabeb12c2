//! Compliance matching, verification and routing
//!
//! Everything in this module runs outside the trust boundary and only
//! ever sees redacted text:
//! - `store`: policy chunk index with date and scope filtering
//! - `matcher`: rule catalog evaluation producing findings
//! - `verifier`: downgrade-only cross-check of findings
//! - `router`: final disposition with weighted risk scoring

pub mod matcher;
pub mod router;
pub mod store;
pub mod verifier;

pub use matcher::{
    default_catalog, ComplianceMatcher, ComplianceRule, ComplianceStatus, Finding, RuleKind,
};
pub use router::{RouteAction, RouteDecision, Router};
pub use store::{PolicyChunk, PolicyQuery, PolicyStore};
pub use verifier::Verifier;
