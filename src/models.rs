//! Core data models used throughout Upgrade Scout.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and evidence pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Taxonomy of ingested material. Closed on purpose: every variant has an
/// exhaustive mapping to payload tags and retrieval behavior, so an unknown
/// source type is a deserialization error rather than a silent passthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// Framework release notes and changelogs.
    ReleaseNote,
    /// Dedicated migration / upgrading guides.
    MigrationGuide,
    /// Framework source code snippets.
    FrameworkSource,
    /// The analyzed project's own source code.
    ProjectSource,
    /// Structured inventories about the analyzed project (imports, deps).
    ProjectFact,
}

impl SourceType {
    /// Wire/payload tag for this source type.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::ReleaseNote => "RELEASE_NOTE",
            SourceType::MigrationGuide => "MIGRATION_GUIDE",
            SourceType::FrameworkSource => "FRAMEWORK_SOURCE",
            SourceType::ProjectSource => "PROJECT_SOURCE",
            SourceType::ProjectFact => "PROJECT_FACT",
        }
    }

    /// Default document kind recorded in the payload when the caller does
    /// not override it.
    pub fn doc_kind(&self) -> &'static str {
        match self {
            SourceType::ReleaseNote => "RELEASE_NOTES",
            SourceType::MigrationGuide => "MIGRATION_GUIDE",
            SourceType::FrameworkSource => "SOURCE",
            SourceType::ProjectSource => "SOURCE",
            SourceType::ProjectFact => "PROJECT_FACT",
        }
    }
}

/// A document handed to the ingestion coordinator.
///
/// Identity is `sourceType|library|version|normalize(content)`; documents are
/// never mutated after hashing.
#[derive(Debug, Clone)]
pub struct Document {
    pub source_type: SourceType,
    pub library: String,
    pub version: String,
    pub url: Option<String>,
    /// Stable external key (doc id or URL) carried into chunk payloads for
    /// later citation metadata. Falls back to `url` when absent.
    pub document_key: Option<String>,
    pub content: String,
}

/// A chunk of a document plus its content-derived hash.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub document_hash: String,
    pub index: usize,
    pub text: String,
    pub chunk_hash: String,
}

/// A point ready for upsert into the vector index: id, embedding, and the
/// full payload (document fields plus provenance).
#[derive(Debug, Clone, Serialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A single retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagHit {
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RagHit {
    /// String metadata field, if present and non-empty.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Outcome of a single-document ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_hash: String,
    pub ingested: bool,
    pub skipped: bool,
    pub chunks_created: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_round_trips_through_serde() {
        let json = serde_json::to_string(&SourceType::ReleaseNote).unwrap();
        assert_eq!(json, "\"RELEASE_NOTE\"");
        let back: SourceType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SourceType::ReleaseNote);
    }

    #[test]
    fn test_unknown_source_type_is_rejected() {
        let result = serde_json::from_str::<SourceType>("\"MYSTERY\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_meta_str_skips_empty_values() {
        let mut metadata = Map::new();
        metadata.insert("url".into(), Value::String(String::new()));
        metadata.insert("library".into(), Value::String("boot".into()));
        let hit = RagHit {
            text: "t".into(),
            score: 1.0,
            metadata,
        };
        assert_eq!(hit.meta_str("url"), None);
        assert_eq!(hit.meta_str("library"), Some("boot"));
    }
}
