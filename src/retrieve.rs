//! Evidence retrieval for upgrade analysis.
//!
//! Gathers the evidence bundle the analyzer cites from: one project-fact
//! record for the workspace, migration-guide chunks for the target version,
//! and deprecation/removal chunks with progressively relaxed fallbacks. The
//! merged hits get positional `[S1]..[Sn]` labels and are rendered into a
//! byte-budgeted context block.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::hashing::sha256_hex;
use crate::index::{SearchFilter, VectorIndex};
use crate::models::{RagHit, SourceType};

/// What the analyzer wants evidence about.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub library: String,
    pub from_version: String,
    pub to_version: String,
    pub workspace_id: String,
}

/// Labeled evidence plus the rendered context handed to the model. Label
/// `S<n>` refers to `hits[n-1]`.
#[derive(Debug)]
pub struct EvidenceBundle {
    pub hits: Vec<RagHit>,
    pub context: String,
}

impl EvidenceBundle {
    pub fn source_count(&self) -> usize {
        self.hits.len()
    }
}

pub struct EvidenceRetriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl EvidenceRetriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    /// Run the three passes and merge.
    ///
    /// Pass order matters: the project fact (if one exists) always takes the
    /// `[S1]` slot so the model reads the workspace inventory first, then
    /// migration guidance, then deprecation evidence. Passes run
    /// sequentially; an empty pass is not an error.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<EvidenceBundle> {
        if request.library.trim().is_empty() {
            bail!("retrieval request library is required");
        }
        if request.from_version.trim().is_empty() || request.to_version.trim().is_empty() {
            bail!("retrieval request versions are required");
        }

        let mut merged: Vec<RagHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(fact) = self.project_fact(&request.workspace_id).await? {
            push_unique(&mut merged, &mut seen, fact);
        }

        let migration = self.migration_hits(request).await?;
        for hit in migration {
            push_unique(&mut merged, &mut seen, hit);
        }

        let deprecation = self.deprecation_hits(request).await?;
        for hit in deprecation {
            push_unique(&mut merged, &mut seen, hit);
        }

        merged.truncate(self.config.max_hits);
        let context = render_context(&merged, &self.config);
        Ok(EvidenceBundle {
            hits: merged,
            context,
        })
    }

    /// Pass (a): the freshest project-fact record for this workspace, by
    /// exact lookup rather than similarity.
    async fn project_fact(&self, workspace_id: &str) -> Result<Option<RagHit>> {
        if workspace_id.trim().is_empty() {
            return Ok(None);
        }
        let filter = SearchFilter::new()
            .eq("sourceType", SourceType::ProjectFact.as_str())
            .eq("workspaceId", workspace_id);
        let hits = self.index.lookup(filter, 1).await?;
        Ok(hits.into_iter().next())
    }

    /// Pass (b): migration-guide chunks scoped to the library, preferring
    /// chunks tagged with either endpoint of the upgrade.
    async fn migration_hits(&self, request: &RetrievalRequest) -> Result<Vec<RagHit>> {
        let query = format!(
            "migrate {} from {} to {}: breaking changes, configuration changes, upgrade steps",
            request.library, request.from_version, request.to_version
        );
        let vector = embed_query(self.embedder.as_ref(), &query).await?;
        let filter = SearchFilter::new()
            .eq("sourceType", SourceType::MigrationGuide.as_str())
            .eq("library", request.library.as_str())
            .any_of(
                "version",
                vec![
                    json!(request.from_version),
                    json!(request.to_version),
                ],
            );
        self.index
            .search(vector, self.config.top_k, Some(filter))
            .await
    }

    /// Pass (c): deprecation/removal evidence from release notes and
    /// migration guides. Three attempts, each wider than the last:
    /// scoped scored search, unscoped-version scored search, then a plain
    /// lookup on the library so the analyzer at least sees what exists.
    async fn deprecation_hits(&self, request: &RetrievalRequest) -> Result<Vec<RagHit>> {
        let query = format!(
            "deprecated or removed APIs in {} {}: replacements and removal notices",
            request.library, request.to_version
        );
        let vector = embed_query(self.embedder.as_ref(), &query).await?;
        let doc_types = vec![
            json!(SourceType::ReleaseNote.as_str()),
            json!(SourceType::MigrationGuide.as_str()),
        ];

        let strict = SearchFilter::new()
            .any_of("sourceType", doc_types.clone())
            .eq("library", request.library.as_str())
            .any_of(
                "version",
                vec![json!(request.from_version), json!(request.to_version)],
            );
        let hits = self
            .index
            .search(vector.clone(), self.config.top_k, Some(strict))
            .await?;
        if !hits.is_empty() {
            return Ok(hits);
        }

        let relaxed = SearchFilter::new()
            .any_of("sourceType", doc_types.clone())
            .eq("library", request.library.as_str());
        let hits = self
            .index
            .search(vector, self.config.top_k, Some(relaxed))
            .await?;
        if !hits.is_empty() {
            return Ok(hits);
        }

        let lookup = SearchFilter::new()
            .any_of("sourceType", doc_types)
            .eq("library", request.library.as_str());
        let hits = self.index.lookup(lookup, self.config.top_k).await?;
        Ok(hits
            .into_iter()
            .filter(|h| deprecation_pattern().is_match(&h.text))
            .collect())
    }
}

fn deprecation_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN
        .get_or_init(|| regex::Regex::new(r"(?i)deprecat|removed|removal").expect("valid regex"))
}

/// Identity for merge dedup: `(documentKey, chunkIndex)` when both are
/// present, else a hash of the chunk text.
fn hit_identity(hit: &RagHit) -> String {
    match (hit.meta_str("documentKey"), hit.metadata.get("chunkIndex")) {
        (Some(key), Some(index)) => format!("{}::{}", key, index),
        _ => sha256_hex(&hit.text),
    }
}

fn push_unique(merged: &mut Vec<RagHit>, seen: &mut HashSet<String>, hit: RagHit) {
    if seen.insert(hit_identity(&hit)) {
        merged.push(hit);
    }
}

// ============ Context rendering ============

const RENDERED_META_KEYS: &[&str] = &[
    "sourceType",
    "library",
    "version",
    "documentKey",
    "url",
    "filePath",
];

/// Render merged hits as labeled evidence blocks under a byte budget.
///
/// Each block is `[S<n>] key=value …` followed by an indented quoted
/// snippet. When the budget runs out mid-block the block is truncated at a
/// char boundary instead of dropped, so the label numbering in the prompt
/// always matches the hit list.
pub fn render_context(hits: &[RagHit], config: &RetrievalConfig) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let is_fact = hit.meta_str("sourceType") == Some(SourceType::ProjectFact.as_str());
        let snippet_limit = if is_fact {
            config.project_fact_snippet_limit
        } else {
            config.snippet_limit
        };

        let snippet = if is_fact {
            summarize_project_fact(&hit.text).unwrap_or_else(|| hit.text.clone())
        } else {
            hit.text.clone()
        };
        let snippet = truncate_chars(&snippet, snippet_limit);

        let mut meta = String::new();
        for key in RENDERED_META_KEYS {
            if let Some(value) = hit.meta_str(key) {
                if !meta.is_empty() {
                    meta.push(' ');
                }
                meta.push_str(&format!("{}={}", key, value));
            }
        }

        let block = format!("[S{}] {}\n     snippet=\"{}\"\n", i + 1, meta, snippet);

        let remaining = config.context_budget_bytes.saturating_sub(out.len());
        if remaining == 0 {
            break;
        }
        if block.len() <= remaining {
            out.push_str(&block);
        } else {
            out.push_str(truncate_chars(&block, remaining).as_str());
            break;
        }
    }
    out
}

fn truncate_chars(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

// ============ Project fact summarization ============

/// Prefixes of import identifiers considered framework-relevant. Everything
/// else (JDK, project-internal packages) is noise for upgrade planning.
const FRAMEWORK_PREFIXES: &[&str] = &[
    "org.springframework",
    "org.hibernate",
    "jakarta.",
    "javax.",
    "io.micrometer",
    "org.apache.",
    "com.fasterxml.jackson",
];

/// Condense a project-fact JSON inventory into a ranked import summary.
///
/// The inventory is a JSON object with (at least) a `frameworkImports`
/// array of fully qualified identifiers. Identifiers are counted, filtered
/// to framework-relevant prefixes, and listed most-frequent first so the
/// heaviest dependencies surface inside the snippet budget. Returns `None`
/// when the text is not a recognizable inventory, in which case the raw
/// text is rendered instead.
pub fn summarize_project_fact(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let imports = value.get("frameworkImports")?.as_array()?;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for import in imports {
        if let Some(name) = import.as_str() {
            if FRAMEWORK_PREFIXES.iter().any(|p| name.starts_with(p)) {
                *counts.entry(name).or_default() += 1;
            }
        }
    }
    if counts.is_empty() {
        return None;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = String::from("framework imports by frequency: ");
    for (i, (name, count)) in ranked.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("{} ({})", name, count));
    }

    if let Some(build_tool) = value.get("buildTool").and_then(|v| v.as_str()) {
        out.push_str(&format!("; build tool: {}", build_tool));
    }
    if let Some(java) = value.get("javaVersion").and_then(|v| v.as_str()) {
        out.push_str(&format!("; java: {}", java));
    }

    Some(out)
}
