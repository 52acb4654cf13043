use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{MemoryError, MemoryResult, Permalink};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extraction::strip_enrichment;
use crate::index::{preview, VectorIndex};
use crate::keyword::KeywordScanner;
use crate::vector::VectorRecord;

/// Default number of results.
pub const DEFAULT_LIMIT: usize = 5;

/// Default semantic candidate multiplier.
pub const DEFAULT_OVERFETCH: usize = 2;

/// Relative weight of the semantic and keyword signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    /// Weight of the semantic score.
    pub semantic: f32,
    /// Weight of the keyword score.
    pub keyword: f32,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
        }
    }
}

impl SearchWeights {
    /// Weights as given; see [`SearchWeights::normalized`].
    pub fn new(semantic: f32, keyword: f32) -> Self {
        Self { semantic, keyword }
    }

    /// Scale both weights proportionally so they sum to 1.0.
    ///
    /// Negative, non-finite or all-zero weights are rejected.
    pub fn normalized(self) -> MemoryResult<Self> {
        if !self.semantic.is_finite() || !self.keyword.is_finite() {
            return Err(MemoryError::Validation(
                "search weights must be finite".to_string(),
            ));
        }
        if self.semantic < 0.0 || self.keyword < 0.0 {
            return Err(MemoryError::Validation(
                "search weights must be non-negative".to_string(),
            ));
        }
        let sum = self.semantic + self.keyword;
        if sum <= 0.0 {
            return Err(MemoryError::Validation(
                "search weights must not both be zero".to_string(),
            ));
        }
        if (sum - 1.0).abs() <= f32::EPSILON {
            return Ok(self);
        }
        Ok(Self {
            semantic: self.semantic / sum,
            keyword: self.keyword / sum,
        })
    }
}

/// Input to [`HybridSearcher::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Free text; must not be blank.
    pub query: String,
    /// `None` uses the searcher's default limit.
    pub limit: Option<usize>,
    /// `None` uses the searcher's default weights.
    pub weights: Option<SearchWeights>,
    /// `None` searches every folder.
    pub folder: Option<String>,
}

impl SearchRequest {
    /// Query with the default limit, weights and scope.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
            weights: None,
            folder: None,
        }
    }

    /// Set the result limit. Chainable builder method.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set explicit weights. Chainable builder method.
    pub fn with_weights(mut self, weights: SearchWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Restrict to one folder. Chainable builder method.
    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }
}

/// One ranked hit. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Permalink of the hit.
    pub permalink: Permalink,
    /// Title of the hit.
    pub title: String,
    /// Start of the raw content.
    pub preview: String,
    /// `1 - min(distance, 1)`; 0 for keyword-only hits.
    pub semantic_score: f32,
    /// Occurrences relative to the best keyword hit.
    pub keyword_score: f32,
    /// Weighted sum of both scores.
    pub combined_score: f32,
    /// Record modification time, used to break ties.
    pub updated_at: DateTime<Utc>,
}

/// A ranked hit together with the record it came from.
#[derive(Debug, Clone)]
pub struct RankedRecord {
    /// Hit as returned to callers.
    pub result: SearchResult,
    /// Underlying record, for reconciliation.
    pub record: VectorRecord,
}

struct Candidate {
    record: VectorRecord,
    semantic: f32,
    keyword: f32,
}

/// Hybrid searcher combining dense similarity with literal keyword
/// occurrences through a weighted sum.
///
/// ```text
/// combined = semantic_weight * semantic_score + keyword_weight * keyword_score
/// ```
///
/// The semantic side over-fetches `overfetch * limit` candidates; the keyword
/// side scans every record in scope. Results are ordered by combined score,
/// then most recent update, then permalink, so the same corpus and query
/// always produce the same ranking.
pub struct HybridSearcher {
    index: Arc<VectorIndex>,
    default_weights: SearchWeights,
    default_limit: usize,
    overfetch: usize,
}

impl HybridSearcher {
    /// Searcher with default weights, limit and over-fetch.
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self {
            index,
            default_weights: SearchWeights::default(),
            default_limit: DEFAULT_LIMIT,
            overfetch: DEFAULT_OVERFETCH,
        }
    }

    /// Weights used when a request carries none. Chainable builder method.
    pub fn with_default_weights(mut self, weights: SearchWeights) -> Self {
        self.default_weights = weights;
        self
    }

    /// Limit used when a request carries none. Chainable builder method.
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    /// Semantic candidate multiplier. Chainable builder method.
    pub fn with_overfetch(mut self, overfetch: usize) -> Self {
        self.overfetch = overfetch.max(1);
        self
    }

    /// Rank records for `request`.
    pub async fn search(&self, request: &SearchRequest) -> MemoryResult<Vec<SearchResult>> {
        Ok(self
            .rank(request)
            .await?
            .into_iter()
            .map(|ranked| ranked.result)
            .collect())
    }

    /// Like [`Self::search`] but keeps the underlying record of every hit.
    pub async fn rank(&self, request: &SearchRequest) -> MemoryResult<Vec<RankedRecord>> {
        if request.query.trim().is_empty() {
            return Err(MemoryError::Validation(
                "search query must not be empty".to_string(),
            ));
        }
        let limit = request.limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Err(MemoryError::Validation(
                "search limit must be > 0".to_string(),
            ));
        }
        let weights = request
            .weights
            .unwrap_or(self.default_weights)
            .normalized()?;
        let folder = request.folder.as_deref();

        let mut candidates: HashMap<Permalink, Candidate> = HashMap::new();

        let semantic_hits = self
            .index
            .query(&request.query, limit.saturating_mul(self.overfetch), folder)
            .await?;
        let semantic_count = semantic_hits.len();
        for hit in semantic_hits {
            let semantic = hit.score();
            candidates.insert(
                hit.record.permalink()?,
                Candidate {
                    record: hit.record,
                    semantic,
                    keyword: 0.0,
                },
            );
        }

        let corpus = self.index.records(folder).await?;
        let scanner = KeywordScanner::new(&request.query);
        let keyword_hits = scanner.score(corpus.into_iter().map(|record| {
            let text = format!("{}\n{}", record.metadata.title, strip_enrichment(&record.content));
            (record, text)
        }));
        let keyword_count = keyword_hits.len();
        for (record, keyword) in keyword_hits {
            let permalink = record.permalink()?;
            candidates
                .entry(permalink)
                .and_modify(|c| c.keyword = keyword)
                .or_insert(Candidate {
                    record,
                    semantic: 0.0,
                    keyword,
                });
        }

        debug!(
            query = %request.query,
            semantic = semantic_count,
            keyword = keyword_count,
            merged = candidates.len(),
            "Hybrid search candidates"
        );

        let mut ranked: Vec<RankedRecord> = candidates
            .into_iter()
            .map(|(permalink, c)| RankedRecord {
                result: SearchResult {
                    permalink,
                    title: c.record.metadata.title.clone(),
                    preview: preview(&c.record.content),
                    semantic_score: c.semantic,
                    keyword_score: c.keyword,
                    combined_score: weights.semantic * c.semantic + weights.keyword * c.keyword,
                    updated_at: c.record.updated_at,
                },
                record: c.record,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.result
                .combined_score
                .total_cmp(&a.result.combined_score)
                .then_with(|| b.result.updated_at.cmp(&a.result.updated_at))
                .then_with(|| a.result.permalink.cmp(&b.result.permalink))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}
