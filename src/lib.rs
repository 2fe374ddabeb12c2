//! SafeHarbor - Clinical document de-identification and compliance pipeline
//!
//! SafeHarbor removes HIPAA Safe Harbor identifiers from clinical text,
//! proves to itself that the removal held, and only then lets the
//! document cross into compliance matching and routing.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                      Trusted side (raw PHI)                        │
//! │                                                                    │
//! │  INGESTED ──► PARSED ──► CLASSIFIED ──► REDACTED                   │
//! │                                            │                       │
//! │   ┌───────────────┐  ┌───────────────┐     │                       │
//! │   │ Pattern (3)   │  │ Entity (2)    │     │  raw text dropped     │
//! │   │ SSN/MRN/dates │  │ names/places  │     │  and zeroized here    │
//! │   └──────┬────────┘  └──────┬────────┘     │                       │
//! │          └───────┬──────────┘              │                       │
//! │        ┌─────────▼──────────┐              │                       │
//! │        │ Contextual (1)     │              │                       │
//! │        │ contested segments │              │                       │
//! │        └─────────┬──────────┘              │                       │
//! │        resolver ─► redactor ─► ledger      │                       │
//! └────────────────────────────────────────────┼───────────────────────┘
//!                 leakage gate (re-detection)  │  fail ──► BLOCKED
//! ┌────────────────────────────────────────────▼───────────────────────┐
//! │                  Untrusted side (placeholders only)                │
//! │                                                                    │
//! │  VALIDATED ──► RETRIEVED ──► MATCHED ──► VERIFIED ──► ROUTED       │
//! │                policy chunks   findings    downgrade    approve /  │
//! │                                            only         review /   │
//! │                                                         reject     │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! ### Fail-closed leakage gate
//! - Redacted text is re-scanned with the same detector stack
//! - Any residual detection terminates the run at `Blocked`
//! - Gate results are never retried and never softened
//!
//! ### Raw-PHI hygiene
//! - Raw text lives in a zeroizing buffer and dies at redaction
//! - Errors, logs and audit events carry type names and counts only
//! - Placeholder mappings mask their original value in debug output
//!
//! ### Deterministic span resolution
//! - Half-open byte spans, resolved by confidence, width, then family
//! - Per-family confidence floors with idempotent re-redaction
//!
//! ## Modules
//!
//! - [`phi`]: detectors, span resolution, redaction, leakage validation
//! - [`pipeline`]: run state machine, collaborators, orchestration
//! - [`compliance`]: policy store, rule matching, verification, routing
//! - [`audit`]: content-free audit trail
//! - [`eval`]: detection quality scoring against gold labels
//! - [`config`]: configuration management
//! - [`error`]: crate-wide error type

pub mod audit;
pub mod compliance;
pub mod config;
pub mod error;
pub mod eval;
pub mod phi;
pub mod pipeline;

pub use config::SafeHarborConfig;
pub use error::{Error, Result};
