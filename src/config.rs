use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub citation: CitationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub url: String,
    pub collection: String,
    pub vector_size: usize,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_index_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_index_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_index_timeout_secs() -> u64 {
    30
}
fn default_index_batch_size() -> usize {
    64
}
fn default_index_max_retries() -> u32 {
    3
}
fn default_index_backoff_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            temperature: 0.1,
            max_retries: 5,
            timeout_secs: 120,
        }
    }
}

fn default_temperature() -> f64 {
    0.1
}
fn default_completion_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1600
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
    #[serde(default = "default_context_budget_bytes")]
    pub context_budget_bytes: usize,
    #[serde(default = "default_snippet_limit")]
    pub snippet_limit: usize,
    #[serde(default = "default_project_fact_snippet_limit")]
    pub project_fact_snippet_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_hits: default_max_hits(),
            context_budget_bytes: default_context_budget_bytes(),
            snippet_limit: default_snippet_limit(),
            project_fact_snippet_limit: default_project_fact_snippet_limit(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_hits() -> usize {
    12
}
fn default_context_budget_bytes() -> usize {
    6000
}
fn default_snippet_limit() -> usize {
    600
}
fn default_project_fact_snippet_limit() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct CitationConfig {
    #[serde(default = "default_min_sources_for_coverage")]
    pub min_sources_for_coverage: usize,
    #[serde(default = "default_min_coverage_ratio")]
    pub min_coverage_ratio: f64,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            min_sources_for_coverage: default_min_sources_for_coverage(),
            min_coverage_ratio: default_min_coverage_ratio(),
        }
    }
}

fn default_min_sources_for_coverage() -> usize {
    4
}
fn default_min_coverage_ratio() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_lines_per_file")]
    pub max_lines_per_file: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: default_exclude_globs(),
            max_file_bytes: default_max_file_bytes(),
            max_lines_per_file: default_max_lines_per_file(),
            max_files: default_max_files(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.java".to_string(),
        "**/*.kt".to_string(),
        "**/*.xml".to_string(),
        "**/*.gradle".to_string(),
        "**/*.properties".to_string(),
        "**/*.yml".to_string(),
        "**/*.yaml".to_string(),
    ]
}
fn default_exclude_globs() -> Vec<String> {
    vec![
        "**/target/**".to_string(),
        "**/build/**".to_string(),
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ]
}
fn default_max_file_bytes() -> u64 {
    512 * 1024
}
fn default_max_lines_per_file() -> usize {
    4000
}
fn default_max_files() -> usize {
    5000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate index
    if config.index.url.trim().is_empty() {
        anyhow::bail!("index.url must not be empty");
    }
    if config.index.collection.trim().is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }
    if config.index.vector_size == 0 {
        anyhow::bail!("index.vector_size must be > 0");
    }
    if config.index.batch_size == 0 {
        anyhow::bail!("index.batch_size must be > 0");
    }

    // Validate chunking
    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        anyhow::bail!("chunking.overlap must be < chunking.size");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_hits == 0 {
        anyhow::bail!("retrieval.max_hits must be >= 1");
    }

    // Validate citation thresholds
    if !(0.0..=1.0).contains(&config.citation.min_coverage_ratio) {
        anyhow::bail!("citation.min_coverage_ratio must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if let Some(dims) = config.embedding.dims {
            if dims != config.index.vector_size {
                anyhow::bail!(
                    "embedding.dims ({}) must match index.vector_size ({})",
                    dims,
                    config.index.vector_size
                );
            }
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.completion.is_enabled() && config.completion.model.is_none() {
        anyhow::bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[index]
url = "http://localhost:6333"
collection = "upgrade_evidence"
vector_size = 1536

[ledger]
path = "./data/ledger.json"
"#;

    #[test]
    fn test_minimal_config_loads_with_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.max_hits, 12);
        assert_eq!(config.citation.min_sources_for_coverage, 4);
        assert_eq!(config.chunking.size, 1600);
        assert_eq!(config.embedding.provider, "disabled");
    }

    #[test]
    fn test_overlap_must_be_less_than_size() {
        let file = write_config(&format!(
            "{MINIMAL}\n[chunking]\nsize = 100\noverlap = 100\n"
        ));
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_embedding_dims_must_match_vector_size() {
        let file = write_config(&format!(
            "{MINIMAL}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 768\n"
        ));
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("vector_size"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let file = write_config(&format!(
            "{MINIMAL}\n[embedding]\nprovider = \"cohere\"\nmodel = \"m\"\ndims = 1536\n"
        ));
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_coverage_ratio_bounds() {
        let file = write_config(&format!(
            "{MINIMAL}\n[citation]\nmin_coverage_ratio = 1.5\n"
        ));
        assert!(load_config(file.path()).is_err());
    }
}
