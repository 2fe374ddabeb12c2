//! Audit trail
//!
//! One event per stage transition, carrying identifiers, stage names and
//! counts. Document text never enters an audit event; the only
//! text-derived field is an optional SHA-256 digest of the redacted
//! output, for deployments that need tamper evidence.

use crate::error::Result;
use crate::phi::RedactionLedger;
use crate::pipeline::state::RunStage;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub run_id: Uuid,
    pub document_id: String,
    pub stage: RunStage,
    pub timestamp: DateTime<Utc>,
    /// Content-free summary, e.g. residual type names or a route action
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
    /// Redaction counts by PHI type name
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub counts: BTreeMap<String, u64>,
    /// SHA-256 of the redacted text, when digests are enabled
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub digest: Option<String>,
}

impl AuditEvent {
    pub fn new(run_id: Uuid, document_id: impl Into<String>, stage: RunStage) -> Self {
        Self {
            run_id,
            document_id: document_id.into(),
            stage,
            timestamp: Utc::now(),
            detail: None,
            counts: BTreeMap::new(),
            digest: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_counts(mut self, counts: BTreeMap<String, u64>) -> Self {
        self.counts = counts;
        self
    }

    pub fn with_digest(mut self, digest: String) -> Self {
        self.digest = Some(digest);
        self
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Emits audit events as structured log lines.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            run_id = %event.run_id,
            document_id = %event.document_id,
            stage = %event.stage,
            detail = event.detail.as_deref().unwrap_or(""),
            counts = ?event.counts,
            "audit"
        );
        Ok(())
    }
}

/// Collects audit events in memory, for tests and introspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

/// Base64-encoded SHA-256 of redacted text.
pub fn redacted_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Ledger counts keyed by PHI type name, with a `total` entry.
pub fn ledger_counts(ledger: &RedactionLedger) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = ledger
        .counts
        .iter()
        .map(|(phi_type, n)| (phi_type.as_str().to_string(), *n))
        .collect();
    counts.insert("total".to_string(), ledger.total_redactions);
    counts
}
