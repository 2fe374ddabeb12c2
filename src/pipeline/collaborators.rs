//! External collaborator traits
//!
//! Everything the pipeline calls out to is behind one of these traits so
//! deployments can swap implementations without touching the runner. The
//! bundled local implementations live in [`crate::pipeline::local`].
//!
//! External calls go through [`call_with_retry`], which enforces the
//! per-call timeout and retries transient failures with exponential
//! backoff. The leakage gate is not an external call and is never retried.

use crate::audit::AuditSink;
use crate::compliance::store::{PolicyChunk, PolicyQuery};
use crate::config::ExternalCallConfig;
use crate::error::{Error, Result};
use crate::phi::PlaceholderMapping;
use crate::pipeline::state::DocumentType;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Normalizes an ingested document into plain text.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Returns normalized text, or `Error::Parse` when the document is
    /// unusable. The caller treats a parse failure as fatal for the run.
    async fn parse(&self, document_id: &str, text: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Assigns a clinical document category.
#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    /// Infallible by contract: implementations return
    /// [`DocumentType::Unknown`] when no signal is found rather than
    /// failing the run.
    async fn classify(&self, text: &str) -> DocumentType;

    fn name(&self) -> &str;
}

/// Fetches compliance policy chunks relevant to a redacted document.
///
/// Runs only after the leakage gate has passed, so implementations may
/// call remote services; the query and document text they see are
/// placeholder-bearing, never raw.
#[async_trait]
pub trait PolicyRetriever: Send + Sync {
    async fn retrieve(&self, query: &PolicyQuery) -> Result<Vec<PolicyChunk>>;

    fn name(&self) -> &str;
}

/// Persists placeholder mappings for reversible redaction.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn store(
        &self,
        run_id: Uuid,
        document_id: &str,
        mappings: &[PlaceholderMapping],
    ) -> Result<()>;

    fn name(&self) -> &str;
}

/// The full set of collaborators a runner needs.
#[derive(Clone)]
pub struct Collaborators {
    pub parser: Arc<dyn DocumentParser>,
    pub classifier: Arc<dyn DocumentClassifier>,
    pub retriever: Arc<dyn PolicyRetriever>,
    pub mappings: Arc<dyn MappingStore>,
    pub audit: Arc<dyn AuditSink>,
}

/// Run an external call with a timeout and bounded retries.
///
/// Transient failures and timeouts are retried with exponential backoff
/// and jitter; permanent errors return immediately. When every attempt
/// times out the caller gets `Error::UpstreamTimeout` naming the
/// operation and the attempt count.
pub async fn call_with_retry<T, F, Fut>(
    operation: &str,
    config: &ExternalCallConfig,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let timeout = Duration::from_millis(config.timeout_ms);
    let max_attempts = config.max_attempts.max(1);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if err.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) if attempt < max_attempts => {
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "call timed out, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(_elapsed) => {
                return Err(Error::UpstreamTimeout {
                    operation: operation.to_string(),
                    attempts: attempt,
                })
            }
        }
    }
}

fn backoff_delay(config: &ExternalCallConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = config.retry_base_delay_ms.saturating_mul(1u64 << exp);
    let capped = base.min(config.retry_max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}
