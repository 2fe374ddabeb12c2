//! Policy chunk store with file-based JSON loading
//!
//! Directory layout:
//! ```text
//! policies/
//! ├── hipaa-privacy.json      (one chunk, or an array of chunks)
//! ├── state-disclosure.json
//! └── ...
//! ```
//!
//! Chunks load once at startup; the store is immutable afterwards.

use crate::error::{Error, Result};
use crate::pipeline::state::DocumentType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One retrievable unit of policy text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChunk {
    pub id: String,
    /// Parent policy document this chunk was excerpted from
    pub policy_id: String,
    pub title: String,
    pub text: String,
    /// None means the chunk applies in every jurisdiction
    #[serde(default)]
    pub jurisdiction: Option<String>,
    /// Empty means the chunk applies to every document type
    #[serde(default)]
    pub document_types: Vec<DocumentType>,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub deprecated: bool,
}

/// Retrieval request assembled by the pipeline after the leakage gate.
#[derive(Debug, Clone)]
pub struct PolicyQuery {
    pub document_type: DocumentType,
    pub jurisdiction: Option<String>,
    /// Ranking terms drawn from the redacted document
    pub terms: Vec<String>,
    /// Chunks must be effective on or before this date
    pub as_of: NaiveDate,
    pub max_chunks: usize,
}

/// In-memory policy index.
pub struct PolicyStore {
    chunks: Vec<PolicyChunk>,
}

impl PolicyStore {
    pub fn empty() -> Self {
        Self { chunks: Vec::new() }
    }

    pub fn from_chunks(chunks: Vec<PolicyChunk>) -> Self {
        Self { chunks }
    }

    /// Load every `.json` file in a directory. A file may hold a single
    /// chunk or an array. Unreadable files are skipped with a warning;
    /// an unreadable directory is a configuration error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Policy(format!("cannot read policy dir {}: {}", dir.display(), e))
        })?;

        let mut chunks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match std::fs::read_to_string(&path) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<Vec<PolicyChunk>>(&data) {
                Ok(list) => chunks.extend(list),
                Err(_) => match serde_json::from_str::<PolicyChunk>(&data) {
                    Ok(chunk) => chunks.push(chunk),
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    }
                },
            }
        }

        tracing::info!(count = chunks.len(), "loaded policy chunks");
        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Applicable chunks ranked by term overlap.
    ///
    /// Filters out deprecated and not-yet-effective chunks, then chunks
    /// whose document type or jurisdiction does not cover the query.
    /// When ranking terms are present, chunks matching none are dropped.
    /// Ties break on newer effective date, then id.
    pub fn search(&self, query: &PolicyQuery) -> Vec<PolicyChunk> {
        let mut scored: Vec<(usize, &PolicyChunk)> = self
            .chunks
            .iter()
            .filter(|c| !c.deprecated && c.effective_date <= query.as_of)
            .filter(|c| applies_to_type(c, query.document_type))
            .filter(|c| applies_to_jurisdiction(c, query.jurisdiction.as_deref()))
            .map(|c| (term_overlap(c, &query.terms), c))
            .filter(|(score, _)| query.terms.is_empty() || *score > 0)
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.effective_date.cmp(&a.1.effective_date))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        scored
            .into_iter()
            .take(query.max_chunks)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

fn applies_to_type(chunk: &PolicyChunk, doc_type: DocumentType) -> bool {
    chunk.document_types.is_empty() || chunk.document_types.contains(&doc_type)
}

fn applies_to_jurisdiction(chunk: &PolicyChunk, jurisdiction: Option<&str>) -> bool {
    match (&chunk.jurisdiction, jurisdiction) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(chunk_j), Some(query_j)) => chunk_j.eq_ignore_ascii_case(query_j),
    }
}

fn term_overlap(chunk: &PolicyChunk, terms: &[String]) -> usize {
    if terms.is_empty() {
        return 0;
    }
    let haystack = format!("{} {}", chunk.title, chunk.text).to_lowercase();
    terms
        .iter()
        .filter(|t| haystack.contains(t.to_lowercase().as_str()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(id: &str, text: &str) -> PolicyChunk {
        PolicyChunk {
            id: id.to_string(),
            policy_id: "test-policy".to_string(),
            title: format!("Title {}", id),
            text: text.to_string(),
            jurisdiction: None,
            document_types: Vec::new(),
            effective_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            deprecated: false,
        }
    }

    fn query() -> PolicyQuery {
        PolicyQuery {
            document_type: DocumentType::DischargeSummary,
            jurisdiction: None,
            terms: Vec::new(),
            as_of: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            max_chunks: 8,
        }
    }

    #[test]
    fn test_search_filters_deprecated_and_future_chunks() {
        let mut deprecated = chunk("a", "disclosure rules");
        deprecated.deprecated = true;
        let mut future = chunk("b", "upcoming rules");
        future.effective_date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let live = chunk("c", "current rules");

        let store = PolicyStore::from_chunks(vec![deprecated, future, live]);
        let results = store.search(&query());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c");
    }

    #[test]
    fn test_search_respects_document_type() {
        let mut lab_only = chunk("lab", "specimen handling");
        lab_only.document_types = vec![DocumentType::LabReport];
        let generic = chunk("gen", "general privacy");

        let store = PolicyStore::from_chunks(vec![lab_only, generic]);

        let results = store.search(&query());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "gen");

        let mut lab_query = query();
        lab_query.document_type = DocumentType::LabReport;
        let results = store.search(&lab_query);
        assert_eq!(results.len(), 2);

        // Unknown documents only see generic chunks
        let mut unknown_query = query();
        unknown_query.document_type = DocumentType::Unknown;
        let results = store.search(&unknown_query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "gen");
    }

    #[test]
    fn test_search_respects_jurisdiction() {
        let mut state_rule = chunk("ca", "state disclosure limits");
        state_rule.jurisdiction = Some("CA".to_string());
        let federal = chunk("fed", "federal baseline");

        let store = PolicyStore::from_chunks(vec![state_rule, federal]);

        // No jurisdiction configured: state chunks stay out
        let results = store.search(&query());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "fed");

        let mut ca_query = query();
        ca_query.jurisdiction = Some("ca".to_string());
        let results = store.search(&ca_query);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_search_ranks_by_term_overlap() {
        let store = PolicyStore::from_chunks(vec![
            chunk("weak", "authorization required"),
            chunk("strong", "authorization and consent for disclosure"),
            chunk("none", "retention schedule"),
        ]);
        let mut q = query();
        q.terms = vec![
            "authorization".to_string(),
            "consent".to_string(),
            "disclosure".to_string(),
        ];
        let results = store.search(&q);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "strong");
        assert_eq!(results[1].id, "weak");
    }

    #[test]
    fn test_search_truncates_to_max_chunks() {
        let chunks: Vec<PolicyChunk> = (0..20)
            .map(|i| chunk(&format!("c{:02}", i), "privacy"))
            .collect();
        let store = PolicyStore::from_chunks(chunks);
        let mut q = query();
        q.max_chunks = 5;
        assert_eq!(store.search(&q).len(), 5);
    }

    #[test]
    fn test_load_dir_reads_single_and_array_files() {
        let dir = TempDir::new().unwrap();
        let single = serde_json::to_string_pretty(&chunk("one", "alpha")).unwrap();
        let array =
            serde_json::to_string_pretty(&vec![chunk("two", "beta"), chunk("three", "gamma")])
                .unwrap();
        std::fs::write(dir.path().join("single.json"), single).unwrap();
        std::fs::write(dir.path().join("array.json"), array).unwrap();
        std::fs::write(dir.path().join("corrupt.json"), "not valid json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = PolicyStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_load_dir_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let result = PolicyStore::load_dir(&missing);
        assert!(matches!(result, Err(Error::Policy(_))));
    }
}
