//! Local collaborator implementations
//!
//! Process-local implementations of the collaborator traits, suitable for
//! single-node deployments and tests. Nothing here performs network IO.

use crate::audit::TracingAuditSink;
use crate::compliance::store::{PolicyChunk, PolicyQuery, PolicyStore};
use crate::config::SafeHarborConfig;
use crate::error::{Error, Result};
use crate::phi::{PlaceholderMapping, PopulationLookup};
use crate::pipeline::collaborators::{
    Collaborators, DocumentClassifier, DocumentParser, MappingStore, PolicyRetriever,
};
use crate::pipeline::state::DocumentType;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Build the default local collaborator set from configuration.
pub fn local_collaborators(config: &SafeHarborConfig) -> Result<Collaborators> {
    let store = match &config.retrieval.policy_dir {
        Some(dir) => PolicyStore::load_dir(dir)?,
        None => PolicyStore::empty(),
    };
    let mappings: Arc<dyn MappingStore> = if config.redaction.reversible {
        Arc::new(InMemoryMappingStore::new())
    } else {
        Arc::new(DiscardMappingStore)
    };
    Ok(Collaborators {
        parser: Arc::new(PlainTextParser),
        classifier: Arc::new(KeywordClassifier::new()),
        retriever: Arc::new(LocalPolicyRetriever::new(store)),
        mappings,
        audit: Arc::new(TracingAuditSink),
    })
}

/// Plain text normalizer.
///
/// Folds CRLF and bare CR line endings to LF and strips control
/// characters other than newline and tab. Rejects documents that are
/// empty after normalization.
pub struct PlainTextParser;

#[async_trait]
impl DocumentParser for PlainTextParser {
    async fn parse(&self, document_id: &str, text: &str) -> Result<String> {
        let normalized: String = text
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();
        if normalized.trim().is_empty() {
            return Err(Error::Parse(format!(
                "document {} is empty after normalization",
                document_id
            )));
        }
        Ok(normalized)
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}

/// Keyword-driven document classifier.
///
/// First matching keyword wins; the list is ordered so more specific
/// phrases are checked before generic ones. No match yields `Unknown`.
pub struct KeywordClassifier {
    keywords: Vec<(&'static str, DocumentType)>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            keywords: vec![
                ("discharge summary", DocumentType::DischargeSummary),
                ("discharge instructions", DocumentType::DischargeSummary),
                ("discharged", DocumentType::DischargeSummary),
                ("progress note", DocumentType::ProgressNote),
                ("consent form", DocumentType::ConsentForm),
                ("informed consent", DocumentType::ConsentForm),
                ("consent", DocumentType::ConsentForm),
                ("lab report", DocumentType::LabReport),
                ("laboratory", DocumentType::LabReport),
                ("lab results", DocumentType::LabReport),
                ("specimen", DocumentType::LabReport),
                ("referral", DocumentType::Referral),
                ("referred to", DocumentType::Referral),
            ],
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> DocumentType {
        let lower = text.to_lowercase();
        for (keyword, doc_type) in &self.keywords {
            if lower.contains(keyword) {
                return *doc_type;
            }
        }
        DocumentType::Unknown
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Retriever backed by an in-process [`PolicyStore`].
pub struct LocalPolicyRetriever {
    store: PolicyStore,
}

impl LocalPolicyRetriever {
    pub fn new(store: PolicyStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PolicyRetriever for LocalPolicyRetriever {
    async fn retrieve(&self, query: &PolicyQuery) -> Result<Vec<PolicyChunk>> {
        Ok(self.store.search(query))
    }

    fn name(&self) -> &str {
        "local_store"
    }
}

/// Default mapping store: drops mappings immediately.
///
/// Used when redaction is irreversible, which is the default. Accepting
/// and discarding keeps the runner identical across both modes.
pub struct DiscardMappingStore;

#[async_trait]
impl MappingStore for DiscardMappingStore {
    async fn store(
        &self,
        _run_id: Uuid,
        _document_id: &str,
        _mappings: &[PlaceholderMapping],
    ) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "discard"
    }
}

/// Keeps mappings in memory, keyed by run id. For reversible-mode
/// deployments that re-identify within the same process, and for tests.
pub struct InMemoryMappingStore {
    entries: RwLock<HashMap<Uuid, Vec<PlaceholderMapping>>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, run_id: Uuid) -> Option<Vec<PlaceholderMapping>> {
        self.entries.read().await.get(&run_id).cloned()
    }
}

impl Default for InMemoryMappingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn store(
        &self,
        run_id: Uuid,
        _document_id: &str,
        mappings: &[PlaceholderMapping],
    ) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(run_id, mappings.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

/// Population lookup backed by a static prefix table.
pub struct StaticPopulationTable {
    populations: HashMap<String, u64>,
}

impl StaticPopulationTable {
    pub fn from_pairs(pairs: &[(&str, u64)]) -> Self {
        Self {
            populations: pairs
                .iter()
                .map(|(prefix, pop)| (prefix.to_string(), *pop))
                .collect(),
        }
    }
}

impl PopulationLookup for StaticPopulationTable {
    fn population(&self, zip_prefix: &str) -> Option<u64> {
        self.populations.get(zip_prefix).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parser_normalizes_line_endings_and_controls() {
        let parser = PlainTextParser;
        let text = "line one\r\nline two\rline three\u{0000}\ttabbed";
        let parsed = parser.parse("doc-1", text).await.unwrap();
        assert_eq!(parsed, "line one\nline two\nline three\ttabbed");
    }

    #[tokio::test]
    async fn test_parser_rejects_empty_document() {
        let parser = PlainTextParser;
        let result = parser.parse("doc-2", "\r\n  \u{0007} \n").await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_classifier_recognizes_categories() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier
                .classify("DISCHARGE SUMMARY\nPatient was discharged in stable condition.")
                .await,
            DocumentType::DischargeSummary
        );
        assert_eq!(
            classifier.classify("Progress note for today's visit").await,
            DocumentType::ProgressNote
        );
        assert_eq!(
            classifier
                .classify("Laboratory findings: specimen collected")
                .await,
            DocumentType::LabReport
        );
        assert_eq!(
            classifier.classify("Signed informed consent on file").await,
            DocumentType::ConsentForm
        );
        assert_eq!(
            classifier
                .classify("Patient referred to cardiology for evaluation")
                .await,
            DocumentType::Referral
        );
    }

    #[tokio::test]
    async fn test_classifier_defaults_to_unknown() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.classify("Vitals stable this morning.").await,
            DocumentType::Unknown
        );
    }

    #[tokio::test]
    async fn test_in_memory_mapping_store_round_trip() {
        let store = InMemoryMappingStore::new();
        let run_id = Uuid::new_v4();
        let mapping = PlaceholderMapping {
            placeholder_id: Uuid::new_v4(),
            phi_type: crate::phi::PhiType::Mrn,
            start: 5,
            end: 13,
            original: "12345678".to_string(),
        };
        store
            .store(run_id, "doc-3", std::slice::from_ref(&mapping))
            .await
            .unwrap();
        let stored = store.get(run_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].original, "12345678");
        assert!(store.get(Uuid::new_v4()).await.is_none());
    }

    #[test]
    fn test_static_population_table() {
        let table = StaticPopulationTable::from_pairs(&[("021", 650_000), ("036", 12_000)]);
        assert_eq!(table.population("021"), Some(650_000));
        assert_eq!(table.population("036"), Some(12_000));
        assert_eq!(table.population("990"), None);
    }
}
