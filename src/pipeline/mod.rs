//! Document pipeline
//!
//! The stage machine, the external collaborator traits, their local
//! implementations, and the runner that drives a document from ingestion
//! to a terminal stage.

pub mod collaborators;
pub mod local;
pub mod runner;
pub mod state;

pub use collaborators::{
    call_with_retry, Collaborators, DocumentClassifier, DocumentParser, MappingStore,
    PolicyRetriever,
};
pub use local::{
    local_collaborators, DiscardMappingStore, InMemoryMappingStore, KeywordClassifier,
    LocalPolicyRetriever, PlainTextParser, StaticPopulationTable,
};
pub use runner::PipelineRunner;
pub use state::{DocumentType, PipelineRun, RawDocument, RunStage};
