//! SafeHarbor error types
//!
//! Error display strings carry identifiers, stage names, PHI type names and
//! counts only, never document content.

use crate::phi::PhiType;
use thiserror::Error;

/// SafeHarbor error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document parse failure
    #[error("Parse error: {0}")]
    Parse(String),

    /// Leakage detected after redaction; carries residual types only
    #[error("Validation blocked: residual PHI detected ({})", format_types(.residual_types))]
    ValidationBlocked {
        /// PHI types still detectable in the redacted text
        residual_types: Vec<PhiType>,
    },

    /// Policy retrieval unavailable after retries
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// External call exceeded its timeout budget
    #[error("Upstream timeout: {operation} failed after {attempts} attempt(s)")]
    UpstreamTimeout {
        /// Which external operation timed out
        operation: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Policy store error
    #[error("Policy error: {0}")]
    Policy(String),

    /// Illegal state transition or broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a retry could plausibly succeed. Validation, policy and
    /// parse failures are deterministic and never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RetrievalUnavailable(_) | Self::UpstreamTimeout { .. } | Self::Io(_)
        )
    }
}

/// Result type alias for SafeHarbor operations
pub type Result<T> = std::result::Result<T, Error>;

fn format_types(types: &[PhiType]) -> String {
    let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
    names.join(", ")
}
