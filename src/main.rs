//! # Upgrade Scout CLI (`uscout`)
//!
//! The `uscout` binary drives the upgrade-analysis pipeline: collection
//! bootstrap, document and repo-tree ingestion, evidence retrieval, and the
//! full cited-and-gated analysis run.
//!
//! ## Usage
//!
//! ```bash
//! uscout --config ./config/uscout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `uscout init` | Create the vector collection if it does not exist |
//! | `uscout ingest <file>` | Ingest a single document (release note, guide, fact) |
//! | `uscout sync <root>` | Ingest a project source tree |
//! | `uscout retrieve` | Print the evidence bundle for an upgrade path |
//! | `uscout analyze` | Run the full analysis and print the gated report |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use upgrade_scout::analyze::{AnalyzeRequest, Analyzer};
use upgrade_scout::completion::create_completion;
use upgrade_scout::config::{self, Config};
use upgrade_scout::embedding::create_embedder;
use upgrade_scout::index::{QdrantIndex, VectorIndex};
use upgrade_scout::ingest::{Ingestor, TreeSpec};
use upgrade_scout::ledger::IngestionLedger;
use upgrade_scout::models::{Document, SourceType};
use upgrade_scout::retrieve::{EvidenceRetriever, RetrievalRequest};

/// Upgrade Scout — evidence-gated upgrade analysis for framework migrations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/uscout.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "uscout",
    about = "Upgrade Scout — evidence-gated retrieval and analysis for framework upgrades",
    version,
    long_about = "Upgrade Scout ingests release notes, migration guides, and project source \
    trees into a vector index, retrieves the evidence relevant to an upgrade path, and produces \
    an upgrade report in which every surviving claim cites retrieved evidence."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/uscout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the vector collection if missing.
    ///
    /// Idempotent — running it against an existing collection is safe.
    Init,

    /// Ingest a single document from a file.
    ///
    /// The document is normalized, content-addressed, chunked, embedded,
    /// and upserted. Re-ingesting identical content is a no-op.
    Ingest {
        /// Path to the document text.
        file: PathBuf,

        /// Document category.
        #[arg(long, value_enum)]
        source_type: SourceType,

        /// Library or workspace the document describes (e.g. `spring-boot`).
        #[arg(long)]
        library: String,

        /// Version the document describes (e.g. `3.2.0`).
        #[arg(long)]
        doc_version: String,

        /// Source URL, kept as provenance in each chunk payload.
        #[arg(long)]
        url: Option<String>,

        /// Stable document key used for retrieval dedup.
        #[arg(long)]
        document_key: Option<String>,
    },

    /// Ingest a project source tree.
    ///
    /// Walks the tree, filters through the configured include/exclude globs
    /// and size caps, and ingests each surviving file as a PROJECT_SOURCE
    /// document tagged with the repo URL, commit, and path.
    Sync {
        /// Root of the checked-out repository.
        root: PathBuf,

        /// Workspace identifier shared with project-fact documents.
        #[arg(long)]
        workspace_id: String,

        /// Repository URL recorded as provenance.
        #[arg(long)]
        repo_url: String,

        /// Commit the tree was checked out at.
        #[arg(long)]
        commit: String,
    },

    /// Print the evidence bundle for an upgrade path.
    Retrieve {
        /// Library being upgraded.
        #[arg(long)]
        library: String,

        /// Current version.
        #[arg(long)]
        from: String,

        /// Target version.
        #[arg(long)]
        to: String,

        /// Workspace whose project facts should lead the bundle.
        #[arg(long, default_value = "")]
        workspace_id: String,
    },

    /// Run the full analysis and print the gated report as JSON.
    Analyze {
        /// Library being upgraded.
        #[arg(long)]
        library: String,

        /// Current version.
        #[arg(long)]
        from: String,

        /// Target version.
        #[arg(long)]
        to: String,

        /// Workspace identifier.
        #[arg(long)]
        workspace_id: String,

        /// Repository URL stamped into the report header.
        #[arg(long)]
        repo_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            build_index(&cfg).await?;
            println!("collection '{}' ready", cfg.index.collection);
        }
        Commands::Ingest {
            file,
            source_type,
            library,
            doc_version,
            url,
            document_key,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let ingestor = build_ingestor(&cfg).await?;
            let document = Document {
                source_type,
                library,
                version: doc_version,
                url,
                document_key,
                content,
            };
            let outcome = ingestor.ingest_document(&document).await?;
            println!("ingest {}", file.display());
            println!("  document hash: {}", outcome.document_hash);
            if outcome.skipped {
                println!("  skipped: already ingested");
            } else {
                println!("  chunks created: {}", outcome.chunks_created);
            }
            println!("ok");
        }
        Commands::Sync {
            root,
            workspace_id,
            repo_url,
            commit,
        } => {
            let ingestor = build_ingestor(&cfg).await?;
            let spec = TreeSpec {
                root: &root,
                repo_url: &repo_url,
                commit: &commit,
                workspace_id: &workspace_id,
            };
            let outcome = ingestor.ingest_tree(&spec, &cfg.sync).await?;
            println!("sync {}", root.display());
            println!("  files seen: {}", outcome.files_seen);
            println!("  files ingested: {}", outcome.files_ingested);
            println!("  files deduped: {}", outcome.files_deduped);
            println!("  chunks created: {}", outcome.chunks_created);
            for (reason, count) in &outcome.skipped {
                println!("  skipped ({}): {}", reason, count);
            }
            if outcome.errors > 0 {
                println!("  errors: {}", outcome.errors);
            }
            println!("ok");
        }
        Commands::Retrieve {
            library,
            from,
            to,
            workspace_id,
        } => {
            let retriever = build_retriever(&cfg).await?;
            let bundle = retriever
                .retrieve(&RetrievalRequest {
                    library,
                    from_version: from,
                    to_version: to,
                    workspace_id,
                })
                .await?;
            println!("evidence bundle ({} sources)", bundle.source_count());
            println!("{}", bundle.context);
        }
        Commands::Analyze {
            library,
            from,
            to,
            workspace_id,
            repo_url,
        } => {
            let retriever = build_retriever(&cfg).await?;
            let completion = Arc::from(create_completion(&cfg.completion)?);
            let analyzer = Analyzer::new(retriever, completion, cfg.citation.clone());
            let result = analyzer
                .run(&AnalyzeRequest {
                    repo_url,
                    workspace_id,
                    library,
                    from_version: from,
                    to_version: to,
                })
                .await?;

            println!("analysis complete");
            println!("  sources provided: {}", result.source_count);
            println!(
                "  citations found: {:?} (coverage {:.2})",
                result.citations.found_sources, result.citations.coverage_ratio
            );
            if result.retried {
                println!("  retried once for citation quality");
            }
            println!(
                "  gate: {} of {} impacts removed, {} of {} workpoints removed",
                result.gating.impacts_removed,
                result.gating.impacts_before,
                result.gating.workpoints_removed,
                result.gating.workpoints_before,
            );
            if result.gating.not_found_substituted {
                println!("  gate: no impacts survived; canonical not-found report");
            }
            println!("{}", serde_json::to_string_pretty(&result.report)?);
        }
    }

    Ok(())
}

/// Connect to the vector index, creating the collection if it is absent.
/// `ensure_collection` is idempotent, so every command can bootstrap.
async fn build_index(cfg: &Config) -> Result<Arc<dyn VectorIndex>> {
    let index = QdrantIndex::new(&cfg.index)?;
    index.ensure_collection().await?;
    Ok(Arc::new(index))
}

async fn build_ingestor(cfg: &Config) -> Result<Ingestor> {
    let index = build_index(cfg).await?;
    let embedder = Arc::from(create_embedder(&cfg.embedding)?);
    let ledger = Arc::new(IngestionLedger::open(&cfg.ledger.path)?);
    Ok(Ingestor::new(index, embedder, ledger, cfg.chunking.clone()))
}

async fn build_retriever(cfg: &Config) -> Result<EvidenceRetriever> {
    let index = build_index(cfg).await?;
    let embedder = Arc::from(create_embedder(&cfg.embedding)?);
    Ok(EvidenceRetriever::new(index, embedder, cfg.retrieval.clone()))
}
