//! Pipeline run state machine
//!
//! A run moves forward through a fixed stage chain and never revisits a
//! stage; a retry is a new run. Two side terminals exist: `Blocked` when
//! the leakage gate fails, `Errored` for infrastructure failures. Raw
//! document text lives inside a zeroizing buffer and may not survive past
//! redaction; `advance` refuses any later stage while raw text is still
//! attached.

use crate::compliance::matcher::Finding;
use crate::compliance::router::RouteDecision;
use crate::error::{Error, Result};
use crate::phi::{RedactedDocument, ValidationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Ingested,
    Parsed,
    Classified,
    Redacted,
    Validated,
    Retrieved,
    Matched,
    Verified,
    Routed,
    Blocked,
    Errored,
}

impl RunStage {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(&self, to: RunStage) -> bool {
        use RunStage::*;
        match (self, to) {
            (Ingested, Parsed)
            | (Parsed, Classified)
            | (Classified, Redacted)
            | (Redacted, Validated)
            | (Redacted, Blocked)
            | (Validated, Retrieved)
            | (Retrieved, Matched)
            | (Matched, Verified)
            | (Verified, Routed) => true,
            (from, Errored) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Routed | Self::Blocked | Self::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::Parsed => "parsed",
            Self::Classified => "classified",
            Self::Redacted => "redacted",
            Self::Validated => "validated",
            Self::Retrieved => "retrieved",
            Self::Matched => "matched",
            Self::Verified => "verified",
            Self::Routed => "routed",
            Self::Blocked => "blocked",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ingested" => Ok(Self::Ingested),
            "parsed" => Ok(Self::Parsed),
            "classified" => Ok(Self::Classified),
            "redacted" => Ok(Self::Redacted),
            "validated" => Ok(Self::Validated),
            "retrieved" => Ok(Self::Retrieved),
            "matched" => Ok(Self::Matched),
            "verified" => Ok(Self::Verified),
            "routed" => Ok(Self::Routed),
            "blocked" => Ok(Self::Blocked),
            "errored" => Ok(Self::Errored),
            other => Err(format!("unknown run stage: {}", other)),
        }
    }
}

/// Clinical document category used to narrow compliance rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    DischargeSummary,
    ProgressNote,
    LabReport,
    ConsentForm,
    Referral,
    /// Classification found no signal; generic rules apply
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DischargeSummary => "discharge_summary",
            Self::ProgressNote => "progress_note",
            Self::LabReport => "lab_report",
            Self::ConsentForm => "consent_form",
            Self::Referral => "referral",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "discharge_summary" => Ok(Self::DischargeSummary),
            "progress_note" => Ok(Self::ProgressNote),
            "lab_report" => Ok(Self::LabReport),
            "consent_form" => Ok(Self::ConsentForm),
            "referral" => Ok(Self::Referral),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown document type: {}", other)),
        }
    }
}

/// Immutable input document. Exists only between ingestion and
/// redaction; the text buffer zeroizes on drop so a cancelled run leaves
/// no resident PHI. Deliberately neither `Clone` nor serializable.
pub struct RawDocument {
    pub id: String,
    pub text: Zeroizing<String>,
    pub declared_type: Option<DocumentType>,
}

impl RawDocument {
    pub fn new(id: impl Into<String>, text: String, declared_type: Option<DocumentType>) -> Self {
        Self {
            id: id.into(),
            text: Zeroizing::new(text),
            declared_type,
        }
    }
}

impl std::fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDocument")
            .field("id", &self.id)
            .field("text", &"<masked>")
            .field("declared_type", &self.declared_type)
            .finish()
    }
}

/// One document's trip through the pipeline.
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub document_id: String,
    pub stage: RunStage,
    pub document_type: DocumentType,
    pub raw: Option<RawDocument>,
    pub redacted: Option<RedactedDocument>,
    pub validation: Option<ValidationResult>,
    pub findings: Vec<Finding>,
    pub route: Option<RouteDecision>,
    /// Display string of the terminal error, when the run did not route.
    /// Carries stage and type names only, never document content.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(document: RawDocument) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            document_id: document.id.clone(),
            stage: RunStage::Ingested,
            document_type: document.declared_type.unwrap_or(DocumentType::Unknown),
            raw: Some(document),
            redacted: None,
            validation: None,
            findings: Vec::new(),
            route: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to the next stage, enforcing the transition table and the
    /// raw/redacted exclusivity invariant.
    pub fn advance(&mut self, to: RunStage) -> Result<()> {
        if !self.stage.can_transition(to) {
            return Err(Error::Internal(format!(
                "illegal transition {} -> {} for run {}",
                self.stage, to, self.run_id
            )));
        }
        if past_redaction(to) && self.raw.is_some() {
            return Err(Error::Internal(format!(
                "raw document held past redaction at {} for run {}",
                to, self.run_id
            )));
        }
        self.stage = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

fn past_redaction(stage: RunStage) -> bool {
    use RunStage::*;
    matches!(
        stage,
        Validated | Retrieved | Matched | Verified | Routed | Blocked
    )
}
