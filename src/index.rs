//! Vector index gateway.
//!
//! Defines the [`VectorIndex`] trait the rest of the pipeline talks through,
//! plus the Qdrant-backed implementation:
//! - collection bootstrap (create-if-missing with cosine distance)
//! - batched upserts with bisection retry on timeouts
//! - similarity search and exact-payload lookup (scroll)
//! - a filter model that renders `match.any` and falls back to a `should`
//!   clause of single-value matches when the server rejects it
//!
//! The upsert retry path is split behind the [`PointSink`] seam so the
//! bisection logic is testable without a running server.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::IndexConfig;
use crate::models::{Point, RagHit};

/// Abstract vector store the ingestion and retrieval layers depend on.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite points by id.
    async fn upsert(&self, points: Vec<Point>) -> Result<UpsertStats>;
    /// Similarity search with an optional payload filter.
    async fn search(&self, vector: Vec<f32>, limit: usize, filter: Option<SearchFilter>)
        -> Result<Vec<RagHit>>;
    /// Exact payload lookup (no vector), newest-first is not guaranteed.
    async fn lookup(&self, filter: SearchFilter, limit: usize) -> Result<Vec<RagHit>>;
    /// True if any point carries this document hash in its payload.
    async fn exists_by_hash(&self, document_hash: &str) -> Result<bool>;
}

/// Summary of one upsert run through the bisection loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    pub stored: usize,
    pub failed: usize,
    pub batches: usize,
}

// ============ Filters ============

/// A conjunction of payload conditions.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub must: Vec<Clause>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    /// Payload key equals a single value.
    Eq { key: String, value: Value },
    /// Payload key matches any of the listed values.
    AnyOf { key: String, values: Vec<Value> },
    /// Payload key falls inside a numeric range; either bound may be open.
    Range {
        key: String,
        gte: Option<f64>,
        lte: Option<f64>,
    },
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.must.push(Clause::Eq {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn any_of(mut self, key: &str, values: Vec<Value>) -> Self {
        self.must.push(Clause::AnyOf {
            key: key.to_string(),
            values,
        });
        self
    }

    pub fn range(mut self, key: &str, gte: Option<f64>, lte: Option<f64>) -> Self {
        self.must.push(Clause::Range {
            key: key.to_string(),
            gte,
            lte,
        });
        self
    }

    /// Render the filter using `match.any` for multi-value clauses.
    pub fn to_json(&self) -> Value {
        let must: Vec<Value> = self.must.iter().map(render_clause_match_any).collect();
        json!({ "must": must })
    }

    /// Render the filter with each `AnyOf` rewritten as a `should` block of
    /// single-value equality matches. Some server versions reject
    /// `match.any`; this form is accepted everywhere.
    pub fn to_json_should_fallback(&self) -> Value {
        let must: Vec<Value> = self
            .must
            .iter()
            .map(|clause| match clause {
                Clause::Eq { key, value } => {
                    json!({ "key": key, "match": { "value": value } })
                }
                Clause::AnyOf { key, values } => {
                    let should: Vec<Value> = values
                        .iter()
                        .map(|v| json!({ "key": key, "match": { "value": v } }))
                        .collect();
                    json!({ "should": should })
                }
                range @ Clause::Range { .. } => render_clause_match_any(range),
            })
            .collect();
        json!({ "must": must })
    }

    /// True if any clause is an `AnyOf` (the only shape that can trigger the
    /// fallback rendering).
    pub fn has_any_of(&self) -> bool {
        self.must
            .iter()
            .any(|c| matches!(c, Clause::AnyOf { .. }))
    }
}

fn render_clause_match_any(clause: &Clause) -> Value {
    match clause {
        Clause::Eq { key, value } => json!({ "key": key, "match": { "value": value } }),
        Clause::AnyOf { key, values } => json!({ "key": key, "match": { "any": values } }),
        Clause::Range { key, gte, lte } => {
            let mut bounds = serde_json::Map::new();
            if let Some(gte) = gte {
                bounds.insert("gte".to_string(), json!(gte));
            }
            if let Some(lte) = lte {
                bounds.insert("lte".to_string(), json!(lte));
            }
            json!({ "key": key, "range": bounds })
        }
    }
}

// ============ Batched upsert with bisection ============

/// Failure modes a sink can report for one batch attempt.
#[derive(Debug)]
pub enum BatchError {
    /// The request timed out; the batch may be too large to land in time.
    Timeout,
    /// Anything else. Not retried by splitting.
    Fatal(anyhow::Error),
}

/// One-shot destination for a batch of points. [`upsert_in_batches`] drives
/// retries and splitting; implementations just attempt a single write.
#[async_trait]
pub trait PointSink: Send + Sync {
    async fn write_batch(&self, points: &[Point]) -> std::result::Result<(), BatchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

/// Write `points` through `sink` in batches of at most `batch_size`.
///
/// A timed-out batch is split in half straight away and both halves re-enter
/// the work stack; retries with backoff happen only once a batch is down to
/// a single point, so the retry budget is spent isolating the offender
/// instead of re-sending a batch that is likely just too large. A single
/// point that exhausts its retries is counted as failed rather than aborting
/// the rest of the run. Fatal errors abort immediately.
pub async fn upsert_in_batches(
    sink: &dyn PointSink,
    points: Vec<Point>,
    opts: BatchOptions,
) -> Result<UpsertStats> {
    let batch_size = opts.batch_size.max(1);
    let mut stats = UpsertStats::default();

    let mut stack: Vec<(Vec<Point>, u32)> = Vec::new();
    let mut iter = points.into_iter().peekable();
    let mut batches = Vec::new();
    while iter.peek().is_some() {
        let batch: Vec<Point> = iter.by_ref().take(batch_size).collect();
        batches.push(batch);
    }
    // Stack is LIFO; push in reverse so batches land in input order.
    for batch in batches.into_iter().rev() {
        stack.push((batch, opts.max_retries));
    }

    while let Some((batch, retries_left)) = stack.pop() {
        if batch.is_empty() {
            continue;
        }
        stats.batches += 1;
        match sink.write_batch(&batch).await {
            Ok(()) => {
                stats.stored += batch.len();
            }
            Err(BatchError::Timeout) => {
                if batch.len() > 1 {
                    let mid = batch.len() / 2;
                    let mut left = batch;
                    let right = left.split_off(mid);
                    // Right half goes under left so left is attempted first.
                    stack.push((right, opts.max_retries));
                    stack.push((left, opts.max_retries));
                } else if retries_left > 0 {
                    let burned = opts.max_retries - retries_left + 1;
                    tokio::time::sleep(Duration::from_millis(opts.backoff_ms * burned as u64))
                        .await;
                    stack.push((batch, retries_left - 1));
                } else {
                    stats.failed += 1;
                }
            }
            Err(BatchError::Fatal(err)) => {
                return Err(err.context("vector index upsert failed"));
            }
        }
    }

    Ok(stats)
}

// ============ Qdrant implementation ============

pub struct QdrantIndex {
    base_url: String,
    collection: String,
    vector_size: usize,
    batch: BatchOptions,
    client: reqwest::Client,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            vector_size: config.vector_size,
            batch: BatchOptions {
                batch_size: config.batch_size,
                max_retries: config.max_retries,
                backoff_ms: config.backoff_ms,
            },
            client,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<()> {
        let url = self.collection_url("");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach vector index at {}", self.base_url))?;

        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status().as_u16() != 404 {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("unexpected response checking collection: {} {}", status, body);
        }

        let body = json!({
            "vectors": { "size": self.vector_size, "distance": "Cosine" }
        });
        let resp = self.client.put(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("failed to create collection: {} {}", status, body);
        }
        Ok(())
    }

    async fn run_filtered(
        &self,
        url: &str,
        body_for: impl Fn(Value) -> Value,
        filter: &SearchFilter,
    ) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(url)
            .json(&body_for(filter.to_json()))
            .send()
            .await?;

        // Older servers reject match.any with a 400; retry once with the
        // should-of-equality rendering before giving up.
        if resp.status().as_u16() == 400 && filter.has_any_of() {
            let resp = self
                .client
                .post(url)
                .json(&body_for(filter.to_json_should_fallback()))
                .send()
                .await?;
            return Ok(resp);
        }
        Ok(resp)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, points: Vec<Point>) -> Result<UpsertStats> {
        upsert_in_batches(self, points, self.batch).await
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<RagHit>> {
        let url = self.collection_url("/points/search");
        let base = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let resp = match &filter {
            Some(f) => {
                self.run_filtered(
                    &url,
                    |filter_json| {
                        let mut body = base.clone();
                        body["filter"] = filter_json;
                        body
                    },
                    f,
                )
                .await?
            }
            None => self.client.post(&url).json(&base).send().await?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("vector search failed: {} {}", status, body);
        }

        let json: Value = resp.json().await?;
        let result = json
            .get("result")
            .ok_or_else(|| anyhow!("invalid search response contract: missing result"))?;
        parse_hits(result)
    }

    async fn lookup(&self, filter: SearchFilter, limit: usize) -> Result<Vec<RagHit>> {
        let url = self.collection_url("/points/scroll");
        let resp = self
            .run_filtered(
                &url,
                |filter_json| {
                    json!({
                        "filter": filter_json,
                        "limit": limit,
                        "with_payload": true,
                        "with_vector": false,
                    })
                },
                &filter,
            )
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("vector lookup failed: {} {}", status, body);
        }

        let json: Value = resp.json().await?;
        let points = json
            .get("result")
            .and_then(|r| r.get("points"))
            .ok_or_else(|| anyhow!("invalid scroll response contract: missing result.points"))?;
        parse_hits(points)
    }

    async fn exists_by_hash(&self, document_hash: &str) -> Result<bool> {
        let filter = SearchFilter::new().eq("documentHash", document_hash);
        let hits = self.lookup(filter, 1).await?;
        Ok(!hits.is_empty())
    }
}

#[async_trait]
impl PointSink for QdrantIndex {
    async fn write_batch(&self, points: &[Point]) -> std::result::Result<(), BatchError> {
        let url = self.collection_url("/points?wait=true");
        let body = json!({ "points": points });
        let resp = self.client.put(&url).json(&body).send().await;

        match resp {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 408 || status.as_u16() == 504 {
                    return Err(BatchError::Timeout);
                }
                let body = response.text().await.unwrap_or_default();
                Err(BatchError::Fatal(anyhow!(
                    "vector index upsert rejected: {} {}",
                    status,
                    body
                )))
            }
            Err(e) if e.is_timeout() => Err(BatchError::Timeout),
            Err(e) => Err(BatchError::Fatal(e.into())),
        }
    }
}

// ============ Response parsing ============

/// Parse search/scroll hits out of a response `result` node.
///
/// Two shapes occur in the wild: a plain array of hit objects, or an
/// envelope object whose `result` field is a JSON-encoded STRING containing
/// the array. Anything else is a contract violation and fails loudly rather
/// than returning an empty result set.
pub fn parse_hits(node: &Value) -> Result<Vec<RagHit>> {
    if let Some(items) = node.as_array() {
        return items.iter().map(parse_hit).collect();
    }

    if let Some(inner) = node.get("result") {
        if let Some(encoded) = inner.as_str() {
            let decoded: Value = serde_json::from_str(encoded)
                .context("invalid search response contract: result string is not JSON")?;
            let items = decoded.as_array().ok_or_else(|| {
                anyhow!("invalid search response contract: decoded result is not an array")
            })?;
            return items.iter().map(parse_hit).collect();
        }
        if let Some(items) = inner.as_array() {
            return items.iter().map(parse_hit).collect();
        }
    }

    bail!(
        "invalid search response contract: expected array or envelope, got {}",
        short_preview(node)
    )
}

fn parse_hit(item: &Value) -> Result<RagHit> {
    let payload = item
        .get("payload")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    let text = payload
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
    Ok(RagHit {
        text,
        score,
        metadata: payload,
    })
}

fn short_preview(node: &Value) -> String {
    let mut s = node.to_string();
    if s.len() > 120 {
        s.truncate(120);
        s.push('…');
    }
    s
}
