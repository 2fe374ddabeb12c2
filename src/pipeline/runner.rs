//! Pipeline orchestration
//!
//! Drives a document through the full stage chain. The trust boundary
//! sits between `Redacted` and `Validated`: raw text is dropped the
//! moment redaction returns, and everything after the leakage gate
//! (retrieval, matching, verification, routing) sees placeholder-bearing
//! text only. A gate failure terminates the run at `Blocked`; it is
//! never retried, because re-running deterministic detectors on the same
//! text cannot change the answer.

use crate::audit::{ledger_counts, redacted_digest, AuditEvent};
use crate::compliance::matcher::ComplianceMatcher;
use crate::compliance::router::Router;
use crate::compliance::store::PolicyQuery;
use crate::compliance::verifier::Verifier;
use crate::config::SafeHarborConfig;
use crate::error::{Error, Result};
use crate::phi::{redact, resolve, DetectorSet, LeakageValidator, NoPopulationData};
use crate::pipeline::collaborators::{call_with_retry, Collaborators};
use crate::pipeline::state::{DocumentType, PipelineRun, RawDocument, RunStage};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

pub struct PipelineRunner {
    config: SafeHarborConfig,
    detectors: Arc<DetectorSet>,
    validator: LeakageValidator,
    matcher: ComplianceMatcher,
    verifier: Verifier,
    router: Router,
    collaborators: Collaborators,
}

impl PipelineRunner {
    /// Build a runner with the default detector stack.
    pub fn new(config: SafeHarborConfig, collaborators: Collaborators) -> Result<Self> {
        let detectors = DetectorSet::new(&config.detection, Arc::new(NoPopulationData))?;
        Self::with_detectors(config, collaborators, detectors)
    }

    /// Build a runner around a custom detector stack. The leakage gate
    /// shares the same stack, so detection and validation stay
    /// consistent.
    pub fn with_detectors(
        config: SafeHarborConfig,
        collaborators: Collaborators,
        detectors: DetectorSet,
    ) -> Result<Self> {
        let detectors = Arc::new(detectors);
        Ok(Self {
            validator: LeakageValidator::new(Arc::clone(&detectors)),
            matcher: ComplianceMatcher::new(),
            verifier: Verifier::new()?,
            router: Router::new(&config.router),
            detectors,
            config,
            collaborators,
        })
    }

    /// Run one document to a terminal stage.
    ///
    /// Never returns an error: gate failures end at `Blocked`,
    /// infrastructure failures at `Errored`, with the display string of
    /// the cause recorded on the run.
    pub async fn run(&self, document: RawDocument) -> PipelineRun {
        let mut run = PipelineRun::new(document);
        tracing::info!(
            run_id = %run.run_id,
            document_id = %run.document_id,
            "pipeline run started"
        );
        self.audit(AuditEvent::new(run.run_id, &run.document_id, RunStage::Ingested))
            .await;

        if let Err(err) = self.drive(&mut run).await {
            run.error = Some(err.to_string());
            if !run.stage.is_terminal() {
                let from = run.stage;
                if run.advance(RunStage::Errored).is_ok() {
                    tracing::error!(
                        run_id = %run.run_id,
                        stage = %from,
                        error = %err,
                        "pipeline run errored"
                    );
                    self.audit(
                        AuditEvent::new(run.run_id, &run.document_id, RunStage::Errored)
                            .with_detail(format!("failed at {}: {}", from, err)),
                    )
                    .await;
                }
            }
        }
        run
    }

    async fn drive(&self, run: &mut PipelineRun) -> Result<()> {
        // Parse: normalize inside the zeroizing buffer. The parser is an
        // external collaborator; transient failures retry, a rejected
        // document does not.
        {
            let raw = run
                .raw
                .as_mut()
                .ok_or_else(|| Error::Internal("raw document missing at parse".to_string()))?;
            let parser = Arc::clone(&self.collaborators.parser);
            let normalized = {
                let document_id = &raw.id;
                let text: &str = raw.text.as_str();
                call_with_retry("parse_document", &self.config.external, || {
                    let parser = Arc::clone(&parser);
                    async move { parser.parse(document_id, text).await }
                })
                .await?
            };
            raw.text = Zeroizing::new(normalized);
        }
        run.advance(RunStage::Parsed)?;
        self.audit(AuditEvent::new(run.run_id, &run.document_id, RunStage::Parsed))
            .await;

        // Classify: declared type wins, otherwise ask the classifier.
        // The classifier cannot fail, so the only guard it needs is a
        // timeout, and expiry degrades to Unknown.
        let document_type = {
            let raw = run
                .raw
                .as_ref()
                .ok_or_else(|| Error::Internal("raw document missing at classify".to_string()))?;
            match raw.declared_type {
                Some(declared) => declared,
                None => {
                    let budget = Duration::from_millis(self.config.external.timeout_ms);
                    let call = self.collaborators.classifier.classify(raw.text.as_str());
                    match tokio::time::timeout(budget, call).await {
                        Ok(document_type) => document_type,
                        Err(_elapsed) => {
                            tracing::warn!(
                                run_id = %run.run_id,
                                "classifier timed out, treating document type as unknown"
                            );
                            DocumentType::Unknown
                        }
                    }
                }
            }
        };
        run.document_type = document_type;
        run.advance(RunStage::Classified)?;
        self.audit(
            AuditEvent::new(run.run_id, &run.document_id, RunStage::Classified)
                .with_detail(document_type.to_string()),
        )
        .await;

        // Redact: detect, resolve, replace. Raw text is dropped (and
        // zeroized) before anything else happens.
        let mappings = {
            let raw = run
                .raw
                .as_ref()
                .ok_or_else(|| Error::Internal("raw document missing at redact".to_string()))?;
            let candidates = self.detectors.detect_all(raw.text.as_str()).await;
            let resolved = resolve(candidates, &self.config.detection);
            let (redacted, mappings) = redact(
                &run.document_id,
                raw.text.as_str(),
                &resolved,
                &self.config.redaction,
            );
            run.redacted = Some(redacted);
            mappings
        };
        run.raw = None;

        if self.config.redaction.reversible && !mappings.is_empty() {
            let store = Arc::clone(&self.collaborators.mappings);
            let run_id = run.run_id;
            let document_id = run.document_id.clone();
            call_with_retry("store_mappings", &self.config.external, || {
                let store = Arc::clone(&store);
                let document_id = &document_id;
                let mappings = &mappings;
                async move { store.store(run_id, document_id, mappings).await }
            })
            .await?;
        }

        let ledger_summary = run
            .redacted
            .as_ref()
            .map(|r| (ledger_counts(&r.ledger), r.ledger.total_redactions, r.text.clone()))
            .ok_or_else(|| Error::Internal("redacted document missing".to_string()))?;
        let (counts, total, redacted_text) = ledger_summary;

        run.advance(RunStage::Redacted)?;
        let mut event = AuditEvent::new(run.run_id, &run.document_id, RunStage::Redacted)
            .with_detail(format!("{} span(s) redacted", total))
            .with_counts(counts);
        if self.config.audit.digest_redacted {
            event = event.with_digest(redacted_digest(&redacted_text));
        }
        self.audit(event).await;

        // Leakage gate: the trust boundary. Fail closed, no retry.
        let validation = {
            let redacted = run
                .redacted
                .as_ref()
                .ok_or_else(|| Error::Internal("redacted document missing at gate".to_string()))?;
            self.validator.validate(redacted).await
        };
        run.validation = Some(validation.clone());
        if !validation.passed {
            run.advance(RunStage::Blocked)?;
            tracing::warn!(
                run_id = %run.run_id,
                residual = ?validation.residual_types,
                "leakage gate blocked run"
            );
            self.audit(
                AuditEvent::new(run.run_id, &run.document_id, RunStage::Blocked).with_detail(
                    format!(
                        "residual types: {}",
                        validation
                            .residual_types
                            .iter()
                            .map(|t| t.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ),
            )
            .await;
            return Err(Error::ValidationBlocked {
                residual_types: validation.residual_types,
            });
        }
        run.advance(RunStage::Validated)?;
        self.audit(AuditEvent::new(run.run_id, &run.document_id, RunStage::Validated))
            .await;

        // Retrieve policy context for the redacted text
        let query = PolicyQuery {
            document_type: run.document_type,
            jurisdiction: self.config.retrieval.jurisdiction.clone(),
            terms: query_terms(&redacted_text),
            as_of: Utc::now().date_naive(),
            max_chunks: self.config.retrieval.max_chunks,
        };
        let chunks = {
            let retriever = Arc::clone(&self.collaborators.retriever);
            call_with_retry("retrieve_policies", &self.config.external, || {
                let retriever = Arc::clone(&retriever);
                let query = &query;
                async move { retriever.retrieve(query).await }
            })
            .await?
        };
        run.advance(RunStage::Retrieved)?;
        self.audit(
            AuditEvent::new(run.run_id, &run.document_id, RunStage::Retrieved)
                .with_detail(format!("{} chunk(s)", chunks.len())),
        )
        .await;

        // Match compliance rules
        run.findings = self.matcher.match_document(
            &redacted_text,
            run.document_type,
            self.config.retrieval.jurisdiction.as_deref(),
            &chunks,
        );
        run.advance(RunStage::Matched)?;
        self.audit(
            AuditEvent::new(run.run_id, &run.document_id, RunStage::Matched)
                .with_detail(finding_summary(&run.findings)),
        )
        .await;

        // Verify: downgrade-only pass over the findings
        run.findings = self
            .verifier
            .verify(std::mem::take(&mut run.findings), &validation, &redacted_text);
        run.advance(RunStage::Verified)?;
        self.audit(
            AuditEvent::new(run.run_id, &run.document_id, RunStage::Verified)
                .with_detail(finding_summary(&run.findings)),
        )
        .await;

        // Route
        let decision = self.router.route(&run.findings, &validation);
        tracing::info!(
            run_id = %run.run_id,
            action = %decision.action,
            risk = decision.risk_score,
            "routing decision"
        );
        run.route = Some(decision.clone());
        run.advance(RunStage::Routed)?;
        self.audit(
            AuditEvent::new(run.run_id, &run.document_id, RunStage::Routed)
                .with_detail(format!("{} (risk {:.2})", decision.action, decision.risk_score)),
        )
        .await;

        Ok(())
    }

    /// Audit failures are logged but do not fail the run.
    async fn audit(&self, event: AuditEvent) {
        if let Err(err) = self.collaborators.audit.record(event).await {
            tracing::warn!(error = %err, "audit sink failure");
        }
    }
}

/// Ranking terms for policy retrieval: the most frequent words of
/// meaningful length. All-uppercase words are excluded, which drops
/// placeholder fragments along with header shouting.
fn query_terms(redacted_text: &str) -> Vec<String> {
    const STOPWORDS: [&str; 12] = [
        "patient", "with", "was", "were", "this", "that", "have", "been", "from", "will",
        "summary", "note",
    ];
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in redacted_text.split(|c: char| !c.is_alphabetic()) {
        if word.len() < 4 {
            continue;
        }
        if word.chars().all(|c| c.is_uppercase()) {
            continue;
        }
        let lower = word.to_lowercase();
        if STOPWORDS.contains(&lower.as_str()) {
            continue;
        }
        *counts.entry(lower).or_insert(0) += 1;
    }
    let mut terms: Vec<(String, usize)> = counts.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    terms.into_iter().take(8).map(|(word, _)| word).collect()
}

fn finding_summary(findings: &[crate::compliance::matcher::Finding]) -> String {
    use crate::compliance::matcher::ComplianceStatus;
    let fails = findings
        .iter()
        .filter(|f| f.status == ComplianceStatus::Fail)
        .count();
    let reviews = findings
        .iter()
        .filter(|f| f.status == ComplianceStatus::NeedsReview)
        .count();
    format!(
        "{} finding(s): {} fail, {} needs_review",
        findings.len(),
        fails,
        reviews
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::compliance::store::{PolicyChunk, PolicyStore};
    use crate::compliance::RouteAction;
    use crate::config::ExternalCallConfig;
    use crate::phi::{Detector, DetectorFamily, PhiSpan, PhiType};
    use crate::pipeline::local::{
        DiscardMappingStore, InMemoryMappingStore, KeywordClassifier, LocalPolicyRetriever,
        PlainTextParser,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn discharge_chunk() -> PolicyChunk {
        PolicyChunk {
            id: "policy-discharge-1".to_string(),
            policy_id: "policy-discharge".to_string(),
            title: "Discharge documentation".to_string(),
            text: "Discharge planning standards require follow-up instructions.".to_string(),
            jurisdiction: None,
            document_types: Vec::new(),
            effective_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            deprecated: false,
        }
    }

    fn fast_external() -> ExternalCallConfig {
        ExternalCallConfig {
            timeout_ms: 200,
            max_attempts: 2,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
        }
    }

    fn test_collaborators(
        store: PolicyStore,
        audit: Arc<MemoryAuditSink>,
    ) -> Collaborators {
        Collaborators {
            parser: Arc::new(PlainTextParser),
            classifier: Arc::new(KeywordClassifier::new()),
            retriever: Arc::new(LocalPolicyRetriever::new(store)),
            mappings: Arc::new(DiscardMappingStore),
            audit,
        }
    }

    const DISCHARGE_DOC: &str = "Discharge Summary\n\
        Patient: John Smith, MRN: 12345678. Seen on 03/15/2024.\n\
        Discharged in stable condition. Follow-up with cardiology in two weeks.\n\
        Contact: (617) 555-0123.";

    #[tokio::test]
    async fn test_clean_document_routes_to_approve() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        let runner = PipelineRunner::new(
            config,
            test_collaborators(
                PolicyStore::from_chunks(vec![discharge_chunk()]),
                Arc::clone(&audit),
            ),
        )
        .unwrap();

        let run = runner
            .run(RawDocument::new("doc-1", DISCHARGE_DOC.to_string(), None))
            .await;

        assert_eq!(run.stage, RunStage::Routed);
        assert!(run.error.is_none());
        assert!(run.raw.is_none());

        let redacted = run.redacted.as_ref().unwrap();
        assert!(!redacted.text.contains("John Smith"));
        assert!(!redacted.text.contains("12345678"));
        assert!(!redacted.text.contains("03/15/2024"));
        assert!(!redacted.text.contains("555-0123"));
        assert!(redacted.text.contains("[PATIENT_NAME]"));
        assert!(redacted.text.contains("[MRN]"));
        assert!(redacted.text.contains("[PHONE]"));

        assert!(run.validation.as_ref().unwrap().passed);
        assert_eq!(
            run.document_type,
            crate::pipeline::state::DocumentType::DischargeSummary
        );

        let route = run.route.as_ref().unwrap();
        assert_eq!(route.action, RouteAction::AutoApprove);

        let stages: Vec<RunStage> = audit.recorded().await.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                RunStage::Ingested,
                RunStage::Parsed,
                RunStage::Classified,
                RunStage::Redacted,
                RunStage::Validated,
                RunStage::Retrieved,
                RunStage::Matched,
                RunStage::Verified,
                RunStage::Routed,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_disclosure_routes_away_from_approve() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        let runner = PipelineRunner::new(
            config,
            test_collaborators(
                PolicyStore::from_chunks(vec![discharge_chunk()]),
                audit,
            ),
        )
        .unwrap();

        let text = "Discharge Summary\nPatient: John Smith discharged today.";
        let run = runner
            .run(RawDocument::new("doc-2", text.to_string(), None))
            .await;

        assert_eq!(run.stage, RunStage::Routed);
        let route = run.route.as_ref().unwrap();
        assert_ne!(route.action, RouteAction::AutoApprove);
        assert!(run
            .findings
            .iter()
            .any(|f| f.rule_id == "discharge-followup"
                && f.status == crate::compliance::ComplianceStatus::Fail));
    }

    /// Finds the literal word NAME anywhere, including inside
    /// placeholders. Redacting its matches manufactures residue, which
    /// is exactly what the gate must catch.
    struct CollidingDetector;

    #[async_trait]
    impl Detector for CollidingDetector {
        async fn detect(&self, text: &str) -> Vec<PhiSpan> {
            text.match_indices("NAME")
                .map(|(start, matched)| {
                    PhiSpan::new(
                        start,
                        start + matched.len(),
                        PhiType::Name,
                        "colliding",
                        DetectorFamily::Pattern,
                        1.0,
                    )
                })
                .collect()
        }

        fn name(&self) -> &str {
            "colliding"
        }

        fn family(&self) -> DetectorFamily {
            DetectorFamily::Pattern
        }
    }

    #[tokio::test]
    async fn test_residual_phi_blocks_the_run() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        let detectors = DetectorSet::new(&config.detection, Arc::new(NoPopulationData))
            .unwrap()
            .with_detector(Box::new(CollidingDetector));
        let runner = PipelineRunner::with_detectors(
            config,
            test_collaborators(PolicyStore::empty(), Arc::clone(&audit)),
            detectors,
        )
        .unwrap();

        let run = runner
            .run(RawDocument::new(
                "doc-3",
                "Patient NAME on file.".to_string(),
                None,
            ))
            .await;

        assert_eq!(run.stage, RunStage::Blocked);
        let validation = run.validation.as_ref().unwrap();
        assert!(!validation.passed);
        assert!(validation.residual_types.contains(&PhiType::Name));
        assert!(run.error.as_ref().unwrap().contains("Validation blocked"));
        assert!(run.route.is_none());
        assert!(run.findings.is_empty());
        assert!(run.raw.is_none());

        let events = audit.recorded().await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, RunStage::Blocked);
        assert!(last.detail.as_ref().unwrap().contains("name"));
    }

    struct UnavailableRetriever;

    #[async_trait]
    impl crate::pipeline::collaborators::PolicyRetriever for UnavailableRetriever {
        async fn retrieve(&self, _query: &PolicyQuery) -> Result<Vec<PolicyChunk>> {
            Err(Error::RetrievalUnavailable("index offline".to_string()))
        }

        fn name(&self) -> &str {
            "unavailable"
        }
    }

    #[tokio::test]
    async fn test_retrieval_outage_errors_the_run() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        let mut collaborators =
            test_collaborators(PolicyStore::empty(), Arc::clone(&audit));
        collaborators.retriever = Arc::new(UnavailableRetriever);
        let runner = PipelineRunner::new(config, collaborators).unwrap();

        let run = runner
            .run(RawDocument::new("doc-4", DISCHARGE_DOC.to_string(), None))
            .await;

        assert_eq!(run.stage, RunStage::Errored);
        assert!(run.error.as_ref().unwrap().contains("Retrieval unavailable"));
        // The gate had already passed; the failure is after the boundary
        assert!(run.validation.as_ref().unwrap().passed);

        let events = audit.recorded().await;
        assert_eq!(events.last().unwrap().stage, RunStage::Errored);
    }

    #[tokio::test]
    async fn test_empty_document_errors_at_parse() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        let runner = PipelineRunner::new(
            config,
            test_collaborators(PolicyStore::empty(), Arc::clone(&audit)),
        )
        .unwrap();

        let run = runner
            .run(RawDocument::new("doc-5", "  \r\n ".to_string(), None))
            .await;

        assert_eq!(run.stage, RunStage::Errored);
        assert!(run.error.as_ref().unwrap().contains("Parse error"));

        let stages: Vec<RunStage> = audit.recorded().await.iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![RunStage::Ingested, RunStage::Errored]);
    }

    struct FlakyParser {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl crate::pipeline::collaborators::DocumentParser for FlakyParser {
        async fn parse(&self, _document_id: &str, text: &str) -> Result<String> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "parser connection reset",
                )));
            }
            Ok(text.to_string())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_transient_parse_failure_is_retried() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        let mut collaborators =
            test_collaborators(PolicyStore::empty(), Arc::clone(&audit));
        collaborators.parser = Arc::new(FlakyParser {
            failures_left: AtomicU32::new(1),
        });
        let runner = PipelineRunner::new(config, collaborators).unwrap();

        let run = runner
            .run(RawDocument::new("doc-7", DISCHARGE_DOC.to_string(), None))
            .await;

        assert_eq!(run.stage, RunStage::Routed);
        assert!(run.error.is_none());
    }

    struct SlowClassifier;

    #[async_trait]
    impl crate::pipeline::collaborators::DocumentClassifier for SlowClassifier {
        async fn classify(&self, _text: &str) -> DocumentType {
            tokio::time::sleep(Duration::from_secs(30)).await;
            DocumentType::ProgressNote
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_classifier_timeout_degrades_to_unknown() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        let mut collaborators =
            test_collaborators(PolicyStore::empty(), Arc::clone(&audit));
        collaborators.classifier = Arc::new(SlowClassifier);
        let runner = PipelineRunner::new(config, collaborators).unwrap();

        let run = runner
            .run(RawDocument::new("doc-8", DISCHARGE_DOC.to_string(), None))
            .await;

        assert_eq!(run.stage, RunStage::Routed);
        assert_eq!(run.document_type, DocumentType::Unknown);
    }

    #[tokio::test]
    async fn test_reversible_mode_stores_mappings() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mapping_store = Arc::new(InMemoryMappingStore::new());
        let mut config = SafeHarborConfig::default();
        config.external = fast_external();
        config.redaction.reversible = true;
        let mut collaborators =
            test_collaborators(PolicyStore::from_chunks(vec![discharge_chunk()]), audit);
        collaborators.mappings = Arc::clone(&mapping_store) as Arc<dyn crate::pipeline::collaborators::MappingStore>;
        let runner = PipelineRunner::new(config, collaborators).unwrap();

        let run = runner
            .run(RawDocument::new("doc-6", DISCHARGE_DOC.to_string(), None))
            .await;

        assert_eq!(run.stage, RunStage::Routed);
        let stored = mapping_store.get(run.run_id).await.unwrap();
        assert!(!stored.is_empty());
        assert!(stored.iter().any(|m| m.original == "12345678"));
    }

    #[test]
    fn test_query_terms_skip_placeholders_and_stopwords() {
        let terms = query_terms(
            "[PATIENT_NAME] discharged with cardiology follow instructions; cardiology consult done. Patient stable.",
        );
        assert!(terms.contains(&"cardiology".to_string()));
        // Placeholder fragments are all-uppercase and stay out
        assert!(!terms.contains(&"name".to_string()));
        assert!(!terms.contains(&"patient".to_string()));
        assert_eq!(terms[0], "cardiology");
    }
}
