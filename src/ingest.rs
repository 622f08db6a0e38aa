//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for a document: normalize → hash → dedup check →
//! chunk → embed → upsert → ledger record, all under a per-document lock so
//! two concurrent ingests of the same content cannot both pass the dedup
//! check. Also drives repo-tree sync: walk, filter through include/exclude
//! globs and size caps, and ingest each surviving file as a PROJECT_SOURCE
//! document.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{json, Map, Value};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, SyncConfig};
use crate::embedding::Embedder;
use crate::hashing::{chunk_hash, document_hash, normalize_text};
use crate::index::VectorIndex;
use crate::keyed_lock::KeyedLocks;
use crate::ledger::IngestionLedger;
use crate::models::{Chunk, Document, IngestOutcome, Point};

/// Extensions never worth embedding, checked before any file read.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "jar", "war", "class", "so", "dylib",
    "dll", "exe", "bin", "gz", "tar", "woff", "woff2", "ttf", "eot",
];

pub struct Ingestor {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    ledger: Arc<IngestionLedger>,
    locks: KeyedLocks,
    chunking: ChunkingConfig,
}

/// Aggregate result of one tree sync.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub files_seen: usize,
    pub files_ingested: usize,
    pub files_deduped: usize,
    pub chunks_created: usize,
    pub errors: usize,
    /// Histogram of skip reasons, e.g. `excluded-glob` or `too-large`.
    pub skipped: BTreeMap<String, usize>,
}

impl Ingestor {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        ledger: Arc<IngestionLedger>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            ledger,
            locks: KeyedLocks::new(),
            chunking,
        }
    }

    /// Ingest one document end to end.
    ///
    /// Idempotent: a document whose content hash is already in the ledger
    /// (or already present in the index) is skipped without re-embedding.
    /// Individual chunks already recorded are skipped too, so a partially
    /// ingested document resumes where it stopped.
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestOutcome> {
        if document.content.trim().is_empty() {
            bail!("document content is empty");
        }
        if document.library.trim().is_empty() || document.version.trim().is_empty() {
            bail!("document library and version are required");
        }

        let content = normalize_text(&document.content);
        let doc_hash = document_hash(
            document.source_type,
            &document.library,
            &document.version,
            &content,
        );

        let _guard = self.locks.acquire(&doc_hash).await;

        if self.ledger.contains(&doc_hash) {
            return Ok(IngestOutcome {
                document_hash: doc_hash,
                ingested: false,
                skipped: true,
                chunks_created: 0,
            });
        }
        // The ledger can lag the index (fresh ledger file against a
        // populated collection). Treat index presence as already-ingested.
        if self.index.exists_by_hash(&doc_hash).await? {
            self.ledger.record(&doc_hash)?;
            return Ok(IngestOutcome {
                document_hash: doc_hash,
                ingested: false,
                skipped: true,
                chunks_created: 0,
            });
        }

        let pieces = chunk_text(&content, self.chunking.size, self.chunking.overlap);
        let mut chunks: Vec<Chunk> = Vec::with_capacity(pieces.len());
        for (index, text) in pieces.into_iter().enumerate() {
            let hash = chunk_hash(&doc_hash, &text);
            if self.ledger.contains_chunk(&hash) {
                continue;
            }
            chunks.push(Chunk {
                document_hash: doc_hash.clone(),
                index,
                text,
                chunk_hash: hash,
            });
        }

        if chunks.is_empty() {
            self.ledger.record(&doc_hash)?;
            return Ok(IngestOutcome {
                document_hash: doc_hash,
                ingested: false,
                skipped: true,
                chunks_created: 0,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .context("failed to embed document chunks")?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let ingested_at = chrono::Utc::now().to_rfc3339();
        let points: Vec<Point> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Point {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: build_payload(document, chunk, &ingested_at),
            })
            .collect();

        let stats = self.index.upsert(points).await?;
        if stats.failed > 0 {
            bail!(
                "vector index rejected {} of {} chunks for document {}",
                stats.failed,
                chunks.len(),
                doc_hash
            );
        }

        for chunk in &chunks {
            self.ledger.record_chunk(&chunk.chunk_hash)?;
        }
        let chunks_created = chunks.len();
        self.ledger.record(&doc_hash)?;

        Ok(IngestOutcome {
            document_hash: doc_hash,
            ingested: true,
            skipped: false,
            chunks_created,
        })
    }

    /// Walk a repository tree and ingest each eligible file as a
    /// PROJECT_SOURCE document tagged with the repo URL, commit, and path.
    ///
    /// A single bad file (unreadable, non-UTF-8) is counted and skipped;
    /// only infrastructure failures abort the run.
    pub async fn ingest_tree(&self, spec: &TreeSpec<'_>, sync: &SyncConfig) -> Result<SyncOutcome> {
        let include = build_globset(&sync.include_globs).context("invalid include glob")?;
        let exclude = build_globset(&sync.exclude_globs).context("invalid exclude glob")?;
        let mut outcome = SyncOutcome::default();

        for entry in WalkDir::new(spec.root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => {
                    outcome.errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if outcome.files_seen >= sync.max_files {
                *outcome.skipped.entry("max-files".to_string()).or_default() += 1;
                continue;
            }
            outcome.files_seen += 1;

            let rel = match entry.path().strip_prefix(spec.root) {
                Ok(r) => r.to_path_buf(),
                Err(_) => entry.path().to_path_buf(),
            };

            if let Some(reason) = skip_reason(entry.path(), &rel, &include, &exclude, sync) {
                *outcome.skipped.entry(reason.to_string()).or_default() += 1;
                continue;
            }

            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(_) => {
                    *outcome.skipped.entry("unreadable".to_string()).or_default() += 1;
                    continue;
                }
            };
            if content.lines().count() > sync.max_lines_per_file {
                *outcome.skipped.entry("too-many-lines".to_string()).or_default() += 1;
                continue;
            }

            let rel_str = rel.to_string_lossy().replace('\\', "/");
            // The path header keeps the file's identity in its content hash
            // (two identical files at different paths are distinct documents)
            // and gives retrieval a provenance line inside every chunk.
            let document = Document {
                source_type: crate::models::SourceType::ProjectSource,
                library: spec.workspace_id.to_string(),
                version: spec.commit.to_string(),
                url: Some(spec.repo_url.to_string()),
                document_key: Some(format!("{}::{}", spec.workspace_id, rel_str)),
                content: format!("path: {}\n\n{}", rel_str, content),
            };

            match self.ingest_document(&document).await {
                Ok(result) if result.ingested => {
                    outcome.files_ingested += 1;
                    outcome.chunks_created += result.chunks_created;
                }
                Ok(_) => outcome.files_deduped += 1,
                Err(err) => {
                    outcome.errors += 1;
                    eprintln!("  error ingesting {}: {:#}", rel_str, err);
                }
            }
        }

        Ok(outcome)
    }
}

/// Identity of a tree being synced.
pub struct TreeSpec<'a> {
    pub root: &'a Path,
    pub repo_url: &'a str,
    pub commit: &'a str,
    pub workspace_id: &'a str,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn skip_reason(
    abs: &Path,
    rel: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    sync: &SyncConfig,
) -> Option<&'static str> {
    if exclude.is_match(rel) {
        return Some("excluded-glob");
    }
    if !include.is_match(rel) {
        return Some("not-included");
    }
    if let Some(ext) = abs.extension().and_then(|e| e.to_str()) {
        if BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return Some("binary-extension");
        }
    }
    match abs.metadata() {
        Ok(meta) if meta.len() > sync.max_file_bytes => Some("too-large"),
        Ok(_) => None,
        Err(_) => Some("unreadable"),
    }
}

/// Build the payload stored next to each chunk vector. Every retrieval
/// filter and the context renderer read from these keys.
fn build_payload(document: &Document, chunk: &Chunk, ingested_at: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("text".to_string(), json!(chunk.text));
    payload.insert("documentHash".to_string(), json!(chunk.document_hash));
    payload.insert("chunkIndex".to_string(), json!(chunk.index));
    payload.insert("chunkTextHash".to_string(), json!(chunk.chunk_hash));
    payload.insert(
        "sourceType".to_string(),
        json!(document.source_type.as_str()),
    );
    payload.insert("docKind".to_string(), json!(document.source_type.doc_kind()));
    payload.insert("library".to_string(), json!(document.library));
    payload.insert("version".to_string(), json!(document.version));
    payload.insert("ingestedAt".to_string(), json!(ingested_at));
    if let Some(url) = &document.url {
        payload.insert("url".to_string(), json!(url));
    }
    if let Some(key) = &document.document_key {
        payload.insert("documentKey".to_string(), json!(key));
    }
    // Project-scoped documents store the workspace id under its own key so
    // retrieval can filter on it directly. For these documents the library
    // field holds the workspace id.
    if matches!(
        document.source_type,
        crate::models::SourceType::ProjectSource | crate::models::SourceType::ProjectFact
    ) {
        payload.insert("workspaceId".to_string(), json!(document.library));
    }
    // Project sources carry explicit provenance keys so a hit can point at
    // the exact file and commit. For these documents library holds the
    // workspace id, version the commit, and the key suffix the path.
    if document.source_type == crate::models::SourceType::ProjectSource {
        if let Some(url) = &document.url {
            payload.insert("repoUrl".to_string(), json!(url));
        }
        payload.insert("commit".to_string(), json!(document.version));
        if let Some(path) = document
            .document_key
            .as_deref()
            .and_then(|k| k.split_once("::").map(|(_, p)| p))
        {
            payload.insert("filePath".to_string(), json!(path));
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{SearchFilter, UpsertStats, VectorIndex};
    use crate::models::{RagHit, SourceType};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeIndex {
        points: Mutex<Vec<Point>>,
    }

    impl FakeIndex {
        fn new() -> Self {
            Self {
                points: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn upsert(&self, points: Vec<Point>) -> Result<UpsertStats> {
            let stored = points.len();
            self.points.lock().unwrap().extend(points);
            Ok(UpsertStats {
                stored,
                failed: 0,
                batches: 1,
            })
        }
        async fn search(
            &self,
            _vector: Vec<f32>,
            _limit: usize,
            _filter: Option<SearchFilter>,
        ) -> Result<Vec<RagHit>> {
            Ok(Vec::new())
        }
        async fn lookup(&self, filter: SearchFilter, _limit: usize) -> Result<Vec<RagHit>> {
            let wanted = filter.must.iter().find_map(|c| match c {
                crate::index::Clause::Eq { key, value } if key == "documentHash" => {
                    value.as_str().map(|s| s.to_string())
                }
                _ => None,
            });
            let points = self.points.lock().unwrap();
            let hits = points
                .iter()
                .filter(|p| {
                    wanted.as_deref()
                        == p.payload.get("documentHash").and_then(|v| v.as_str())
                })
                .map(|p| RagHit {
                    text: String::new(),
                    score: 1.0,
                    metadata: p.payload.clone(),
                })
                .collect();
            Ok(hits)
        }
        async fn exists_by_hash(&self, document_hash: &str) -> Result<bool> {
            let filter = SearchFilter::new().eq("documentHash", document_hash);
            Ok(!self.lookup(filter, 1).await?.is_empty())
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    fn ingestor(dir: &tempfile::TempDir) -> (Ingestor, Arc<FakeIndex>) {
        let index = Arc::new(FakeIndex::new());
        let ledger =
            Arc::new(IngestionLedger::open(dir.path().join("ledger.json")).unwrap());
        let ingestor = Ingestor::new(
            index.clone(),
            Arc::new(FakeEmbedder),
            ledger,
            ChunkingConfig {
                size: 100,
                overlap: 10,
            },
        );
        (ingestor, index)
    }

    fn doc(content: &str) -> Document {
        Document {
            source_type: SourceType::MigrationGuide,
            library: "spring-boot".to_string(),
            version: "3.2.0".to_string(),
            url: Some("https://example.org/guide".to_string()),
            document_key: Some("guide-3.2".to_string()),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, index) = ingestor(&dir);

        let first = ingestor.ingest_document(&doc("Upgrade notes here.")).await.unwrap();
        assert!(first.ingested);
        assert!(first.chunks_created > 0);

        let second = ingestor.ingest_document(&doc("Upgrade notes here.")).await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.document_hash, first.document_hash);

        // No duplicate points were written.
        assert_eq!(index.points.lock().unwrap().len(), first.chunks_created);
    }

    #[tokio::test]
    async fn test_normalization_collapses_equivalent_documents() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(&dir);

        let a = ingestor.ingest_document(&doc("Upgrade   notes\r\nhere.")).await.unwrap();
        let b = ingestor.ingest_document(&doc("Upgrade notes\nhere.")).await.unwrap();
        assert_eq!(a.document_hash, b.document_hash);
        assert!(b.skipped);
    }

    #[tokio::test]
    async fn test_index_presence_backfills_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let (first, index) = ingestor(&dir);
        let outcome = first.ingest_document(&doc("content")).await.unwrap();
        assert!(outcome.ingested);

        // Fresh ledger, same index: dedup must come from the index check.
        let dir2 = tempfile::tempdir().unwrap();
        let ledger =
            Arc::new(IngestionLedger::open(dir2.path().join("ledger.json")).unwrap());
        let second = Ingestor::new(
            index,
            Arc::new(FakeEmbedder),
            ledger.clone(),
            ChunkingConfig {
                size: 100,
                overlap: 10,
            },
        );
        let repeat = second.ingest_document(&doc("content")).await.unwrap();
        assert!(repeat.skipped);
        assert!(ledger.contains(&repeat.document_hash));
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(&dir);
        assert!(ingestor.ingest_document(&doc("   \n ")).await.is_err());
    }

    #[tokio::test]
    async fn test_payload_carries_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, index) = ingestor(&dir);
        ingestor.ingest_document(&doc("some evidence text")).await.unwrap();

        let points = index.points.lock().unwrap();
        let payload = &points[0].payload;
        assert_eq!(payload["sourceType"], json!("MIGRATION_GUIDE"));
        assert_eq!(payload["library"], json!("spring-boot"));
        assert_eq!(payload["version"], json!("3.2.0"));
        assert_eq!(payload["documentKey"], json!("guide-3.2"));
        assert_eq!(payload["chunkIndex"], json!(0));
        assert!(payload.contains_key("documentHash"));
        assert!(payload.contains_key("ingestedAt"));
    }

    #[tokio::test]
    async fn test_tree_sync_respects_globs_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(&dir);

        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("src")).unwrap();
        std::fs::create_dir_all(repo.path().join("target")).unwrap();
        std::fs::write(repo.path().join("src/Main.java"), "class Main {}").unwrap();
        std::fs::write(repo.path().join("src/notes.txt"), "not included").unwrap();
        std::fs::write(repo.path().join("target/Gen.java"), "class Gen {}").unwrap();
        std::fs::write(repo.path().join("src/Big.java"), "x".repeat(2048)).unwrap();

        let sync = SyncConfig {
            include_globs: vec!["**/*.java".to_string()],
            exclude_globs: vec!["target/**".to_string()],
            max_file_bytes: 1024,
            max_lines_per_file: 100,
            max_files: 100,
        };
        let spec = TreeSpec {
            root: repo.path(),
            repo_url: "https://example.org/repo.git",
            commit: "abc123",
            workspace_id: "ws-1",
        };

        let outcome = ingestor.ingest_tree(&spec, &sync).await.unwrap();
        assert_eq!(outcome.files_ingested, 1);
        assert_eq!(outcome.skipped.get("excluded-glob"), Some(&1));
        assert_eq!(outcome.skipped.get("not-included"), Some(&1));
        assert_eq!(outcome.skipped.get("too-large"), Some(&1));
        assert_eq!(outcome.errors, 0);
    }
}
