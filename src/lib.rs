//! # Upgrade Scout
//!
//! An evidence-gated retrieval pipeline for framework-upgrade planning.
//!
//! Upgrade Scout ingests release notes, migration guides, and project source
//! trees into a vector index, retrieves the evidence relevant to a specific
//! upgrade path, and has a model draft an upgrade report whose every claim
//! must cite the retrieved evidence. Claims that cite nothing, or cite
//! evidence that was never provided, are stripped by a deterministic gate
//! before the report reaches anyone.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Documents  │──▶│  Pipeline    │──▶│  Qdrant   │
//! │ notes/tree │   │ Chunk+Embed │   │ (vectors) │
//! └────────────┘   └─────────────┘   └────┬─────┘
//!                                         │
//!                  ┌──────────────────────┤
//!                  ▼                      ▼
//!             ┌──────────┐         ┌────────────┐
//!             │ Retrieve │────────▶│  Analyze    │
//!             │ [S1..Sn] │         │ cite + gate │
//!             └──────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! uscout init                         # create the vector collection
//! uscout ingest notes.md --source-type RELEASE_NOTE \
//!     --library spring-boot --doc-version 3.2.0
//! uscout sync ./my-app --workspace-id ws-1 \
//!     --repo-url https://example.org/my-app.git --commit abc123
//! uscout retrieve --library spring-boot --from 2.7 --to 3.2 \
//!     --workspace-id ws-1
//! uscout analyze --library spring-boot --from 2.7 --to 3.2 \
//!     --workspace-id ws-1 --repo-url https://example.org/my-app.git
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`hashing`] | Text normalization and content addressing |
//! | [`chunk`] | Text chunking |
//! | [`ledger`] | Durable ingestion dedup record |
//! | [`index`] | Vector index gateway (Qdrant) |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Chat completion provider abstraction |
//! | [`ingest`] | Document and repo-tree ingestion |
//! | [`retrieve`] | Evidence retrieval and context rendering |
//! | [`citation`] | Citation extraction and coverage checks |
//! | [`report`] | Report model, sanitizer, and evidence gate |
//! | [`analyze`] | End-to-end analysis pipeline |

pub mod analyze;
pub mod chunk;
pub mod citation;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod hashing;
pub mod index;
pub mod ingest;
pub mod keyed_lock;
pub mod ledger;
pub mod models;
pub mod report;
pub mod retrieve;
