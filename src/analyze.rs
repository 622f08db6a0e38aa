//! End-to-end upgrade analysis.
//!
//! Wires the pipeline together: retrieve evidence, prompt the model, check
//! citations (retrying once with a stricter instruction if the answer
//! ignores the evidence), parse the report JSON, sanitize it, and gate it
//! against the evidence that was actually provided.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::citation::{self, CitationValidation, RetryReason};
use crate::completion::Completion;
use crate::config::CitationConfig;
use crate::report::{self, GatingStats, ProjectRef, UpgradeReport};
use crate::retrieve::{EvidenceBundle, EvidenceRetriever, RetrievalRequest};

#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub repo_url: String,
    pub workspace_id: String,
    pub library: String,
    pub from_version: String,
    pub to_version: String,
}

pub struct AnalysisResult {
    pub report: UpgradeReport,
    pub gating: GatingStats,
    pub citations: CitationValidation,
    pub source_count: usize,
    pub retried: bool,
}

pub struct Analyzer {
    retriever: EvidenceRetriever,
    completion: Arc<dyn Completion>,
    citation: CitationConfig,
}

impl Analyzer {
    pub fn new(
        retriever: EvidenceRetriever,
        completion: Arc<dyn Completion>,
        citation: CitationConfig,
    ) -> Self {
        Self {
            retriever,
            completion,
            citation,
        }
    }

    pub async fn run(&self, request: &AnalyzeRequest) -> Result<AnalysisResult> {
        if request.workspace_id.trim().is_empty() {
            bail!("workspace id is required");
        }
        if request.library.trim().is_empty() {
            bail!("library is required");
        }
        if request.from_version.trim().is_empty() || request.to_version.trim().is_empty() {
            bail!("from and to versions are required");
        }

        let bundle = self
            .retriever
            .retrieve(&RetrievalRequest {
                library: request.library.clone(),
                from_version: request.from_version.clone(),
                to_version: request.to_version.clone(),
                workspace_id: request.workspace_id.clone(),
            })
            .await
            .context("evidence retrieval failed")?;

        let system = system_prompt();
        let user = user_prompt(request, &bundle);

        let mut answer = self.completion.complete(&system, &user).await?;
        let mut citations = citation::validate(&answer, bundle.source_count());
        let mut retried = false;

        // One stricter retry at most. A second bad answer is handed to the
        // gate as-is; the gate is the hard floor, not the prompt.
        if let Some(reason) = citation::evaluate_retry(&citations, &self.citation) {
            let stricter = format!("{}\n\n{}", user, retry_instruction(reason));
            answer = self.completion.complete(&system, &stricter).await?;
            citations = citation::validate(&answer, bundle.source_count());
            retried = true;
        }

        let raw = extract_json_object(&answer)
            .context("model answer did not contain a JSON report")?;
        let mut parsed: UpgradeReport =
            serde_json::from_str(&raw).context("failed to parse upgrade report JSON")?;
        parsed.project = ProjectRef {
            repo_url: request.repo_url.clone(),
            workspace_id: request.workspace_id.clone(),
            from: request.from_version.clone(),
            to: request.to_version.clone(),
        };

        let sanitized = report::sanitize(parsed);
        let source_count = bundle.source_count();
        let (gated, gating) = report::apply_gate(sanitized, source_count);

        Ok(AnalysisResult {
            report: gated,
            gating,
            citations,
            source_count,
            retried,
        })
    }
}

fn system_prompt() -> String {
    "You are an upgrade-impact analyst. You receive labeled evidence blocks \
     ([S1], [S2], ...) about a framework upgrade and a project inventory. \
     Report only impacts supported by the evidence, citing the label of \
     every supporting block. Reply with a single JSON object with keys \
     \"impacts\", \"workpoints\", and \"unknowns\"."
        .to_string()
}

fn user_prompt(request: &AnalyzeRequest, bundle: &EvidenceBundle) -> String {
    format!(
        "Project: {repo} (workspace {ws})\nUpgrade: {lib} {from} -> {to}\n\n\
         Evidence:\n{context}\n\
         Produce the upgrade report JSON. Every impact, workpoint, and \
         unknown must list the [S#] labels it relies on in its \"evidence\" \
         array.",
        repo = request.repo_url,
        ws = request.workspace_id,
        lib = request.library,
        from = request.from_version,
        to = request.to_version,
        context = bundle.context,
    )
}

fn retry_instruction(reason: RetryReason) -> &'static str {
    match reason {
        RetryReason::NoCitations => {
            "Your previous answer cited no evidence labels. Every claim MUST \
             cite at least one [S#] label from the evidence above. Answer \
             again."
        }
        RetryReason::LowCoverage => {
            "Your previous answer ignored most of the provided evidence. \
             Consider every [S#] block above and cite each one you rely on. \
             Answer again."
        }
    }
}

/// Pull the outermost JSON object out of a model answer that may wrap it in
/// prose or a code fence.
fn extract_json_object(answer: &str) -> Option<String> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end < start {
        return None;
    }
    Some(answer[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::Embedder;
    use crate::index::{SearchFilter, UpsertStats, VectorIndex};
    use crate::models::{Point, RagHit};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubIndex;

    #[async_trait]
    impl VectorIndex for StubIndex {
        async fn upsert(&self, _points: Vec<Point>) -> Result<UpsertStats> {
            Ok(UpsertStats::default())
        }
        async fn search(
            &self,
            _vector: Vec<f32>,
            _limit: usize,
            _filter: Option<SearchFilter>,
        ) -> Result<Vec<RagHit>> {
            let mut metadata = serde_json::Map::new();
            metadata.insert("sourceType".to_string(), json!("MIGRATION_GUIDE"));
            metadata.insert("documentKey".to_string(), json!("guide"));
            metadata.insert("chunkIndex".to_string(), json!(0));
            Ok(vec![RagHit {
                text: "WebSecurityConfigurerAdapter was removed.".to_string(),
                score: 0.9,
                metadata,
            }])
        }
        async fn lookup(&self, _filter: SearchFilter, _limit: usize) -> Result<Vec<RagHit>> {
            Ok(Vec::new())
        }
        async fn exists_by_hash(&self, _document_hash: &str) -> Result<bool> {
            Ok(false)
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0, 0.0, 1.0]).collect())
        }
    }

    /// Returns each scripted answer in turn and counts calls.
    struct ScriptedCompletion {
        answers: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Completion for ScriptedCompletion {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers[n.min(self.answers.len() - 1)].clone())
        }
    }

    fn analyzer(answers: Vec<String>) -> (Analyzer, Arc<ScriptedCompletion>) {
        let completion = Arc::new(ScriptedCompletion {
            answers,
            calls: AtomicUsize::new(0),
        });
        let retriever = EvidenceRetriever::new(
            Arc::new(StubIndex),
            Arc::new(StubEmbedder),
            RetrievalConfig::default(),
        );
        (
            Analyzer::new(retriever, completion.clone(), CitationConfig::default()),
            completion,
        )
    }

    fn request() -> AnalyzeRequest {
        AnalyzeRequest {
            repo_url: "https://example.org/app.git".to_string(),
            workspace_id: "ws-1".to_string(),
            library: "spring-boot".to_string(),
            from_version: "2.7".to_string(),
            to_version: "3.2".to_string(),
        }
    }

    fn good_answer() -> String {
        json!({
            "impacts": [{
                "id": "i1",
                "title": "Security adapter removed",
                "kind": "removal",
                "affectedAreas": ["security"],
                "evidence": ["S1"],
                "recommendation": "Move to component-based security config."
            }],
            "workpoints": [{"impactId": "i1", "points": 3, "rationale": "config rewrite [S1]", "evidence": ["S1"]}],
            "unknowns": []
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_clean_answer_runs_once() {
        let (analyzer, completion) = analyzer(vec![good_answer()]);
        let result = analyzer.run(&request()).await.unwrap();
        assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
        assert!(!result.retried);
        assert_eq!(result.report.impacts.len(), 1);
        assert_eq!(result.report.project.workspace_id, "ws-1");
    }

    #[tokio::test]
    async fn test_uncited_answer_retries_exactly_once() {
        let uncited = json!({
            "impacts": [{"id": "i1", "title": "t", "kind": "removal", "affectedAreas": [], "evidence": [], "recommendation": "r"}],
            "workpoints": [],
            "unknowns": []
        })
        .to_string();
        let (analyzer, completion) = analyzer(vec![uncited, good_answer()]);
        let result = analyzer.run(&request()).await.unwrap();
        assert_eq!(completion.calls.load(Ordering::SeqCst), 2);
        assert!(result.retried);
        assert_eq!(result.report.impacts.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_evidence_is_gated_to_not_found() {
        let invented = json!({
            "impacts": [{"id": "i1", "title": "t", "kind": "removal", "affectedAreas": [], "evidence": ["S9"], "recommendation": "r [S9]"}],
            "workpoints": [],
            "unknowns": []
        })
        .to_string();
        // Citations exist but point outside the provided set: no retry,
        // the gate is the floor.
        let (analyzer, _) = analyzer(vec![invented]);
        let result = analyzer.run(&request()).await.unwrap();
        assert!(result.report.impacts.is_empty());
        assert!(result.gating.not_found_substituted);
        assert_eq!(result.gating.reason, report::GATE_REASON);
    }

    #[tokio::test]
    async fn test_fenced_json_is_accepted() {
        let fenced = format!("Here is the report:\n```json\n{}\n```\n", good_answer());
        let (analyzer, _) = analyzer(vec![fenced]);
        let result = analyzer.run(&request()).await.unwrap();
        assert_eq!(result.report.impacts.len(), 1);
    }

    #[tokio::test]
    async fn test_request_validation_fails_fast() {
        let (analyzer, completion) = analyzer(vec![good_answer()]);
        let mut bad = request();
        bad.workspace_id = " ".to_string();
        assert!(analyzer.run(&bad).await.is_err());
        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("noise {\"a\": 1} trailing"),
            Some("{\"a\": 1}".to_string())
        );
        assert_eq!(extract_json_object("no braces here"), None);
    }
}
