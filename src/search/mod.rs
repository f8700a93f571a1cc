//! Search engine for the memory bank
//!
//! Query flow: embed the query, ask the vector index for neighbours above
//! the threshold, load the records, apply structured filters, then rank,
//! aggregate and paginate. An empty query skips the vector steps and lists
//! every record matching the filters, newest first, with similarity 0.

mod facets;
mod ranking;
mod suggestions;

pub use facets::{aggregate_facets, TimePeriod};
pub use ranking::{extract_terms, generate_highlights, RelevanceComponents, RelevanceScorer};
pub use suggestions::suggest;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Deserializer};

use crate::config::{CoreConfig, SearchDefaults};
use crate::context::RequestContext;
use crate::embedding::EmbeddingProvider;
use crate::error::{MembankError, Result, Service};
use crate::storage::{queries, Storage};
use crate::types::*;
use crate::vector::{VectorIndex, VectorMatch};

/// Semantic search request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SemanticSearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub filter: MemoryFilter,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub threshold: Option<f32>,
}

impl SemanticSearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Faceted search request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacetedSearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub filter: MemoryFilter,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub threshold: Option<f32>,
    #[serde(default)]
    pub include_facets: bool,
    #[serde(default, deserialize_with = "lenient_sort_field")]
    pub sort_by: SortField,
    #[serde(default, deserialize_with = "lenient_sort_direction")]
    pub sort_direction: SortDirection,
}

/// Relevance-scored search request
pub type EnhancedSearchRequest = SemanticSearchRequest;

/// Autocomplete request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestionRequest {
    pub partial_query: String,
    pub project_id: Option<ProjectId>,
    pub limit: Option<usize>,
}

fn lenient_sort_field<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<SortField, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .map(|s| SortField::parse_lenient(&s))
        .unwrap_or_default())
}

fn lenient_sort_direction<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<SortDirection, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .map(|s| SortDirection::parse_lenient(&s))
        .unwrap_or_default())
}

/// Resolved knobs shared by every search flavour
struct Plan {
    limit: usize,
    offset: usize,
    threshold: f32,
}

/// Retrieval engine over the embedding provider, vector index and store
#[derive(Clone)]
pub struct SearchEngine {
    storage: Storage,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    defaults: SearchDefaults,
    scorer: RelevanceScorer,
}

impl SearchEngine {
    pub fn new(
        storage: Storage,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            index,
            defaults: config.search.clone(),
            scorer: RelevanceScorer::new(config.relevance.clone()),
        }
    }

    pub fn defaults(&self) -> &SearchDefaults {
        &self.defaults
    }

    fn plan(
        &self,
        filter: &MemoryFilter,
        limit: Option<usize>,
        offset: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Plan> {
        filter.validate()?;

        let limit = limit.unwrap_or(self.defaults.limit);
        if limit == 0 {
            return Err(MembankError::Validation("limit must be at least 1".into()));
        }

        let threshold = threshold.unwrap_or(self.defaults.threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MembankError::Validation(format!(
                "threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        Ok(Plan {
            limit,
            offset: offset.unwrap_or(0),
            threshold,
        })
    }

    /// Every filtered candidate above the threshold, best first
    async fn candidates(
        &self,
        ctx: &RequestContext,
        query: &str,
        filter: &MemoryFilter,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let pool = self.defaults.list_all_limit;

        if query.trim().is_empty() {
            let filter = filter.clone();
            let memories = ctx
                .guard(
                    Service::Persistence,
                    self.storage
                        .call(move |conn| queries::list_memories(conn, &filter, pool)),
                )
                .await?;
            tracing::debug!(count = memories.len(), "empty query listing");
            return Ok(memories
                .into_iter()
                .map(|memory| SearchResult {
                    memory,
                    similarity: 0.0,
                })
                .collect());
        }

        let vector = ctx
            .guard(Service::Embedding, self.embedder.embed(query))
            .await?;

        // Widen the lookup until the filtered pool is full or the index is exhausted
        let mut top_k = pool.max(1);
        loop {
            let matches = ctx
                .guard(Service::VectorIndex, self.index.query(&vector, top_k, threshold))
                .await?;
            let exhausted = matches.len() < top_k;

            let mut results = self.load_matches(ctx, matches, filter, threshold).await?;
            tracing::debug!(
                top_k,
                candidates = results.len(),
                threshold,
                "vector candidates after filtering"
            );

            if exhausted || results.len() >= pool {
                results.sort_by(by_similarity);
                results.truncate(pool);
                return Ok(results);
            }
            top_k = top_k.saturating_mul(2);
        }
    }

    /// Load the records behind index matches and keep those passing `filter`
    async fn load_matches(
        &self,
        ctx: &RequestContext,
        matches: Vec<VectorMatch>,
        filter: &MemoryFilter,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        if matches.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<MemoryId> = matches.iter().map(|m| m.id.clone()).collect();
        let loaded = ctx
            .guard(
                Service::Persistence,
                self.storage
                    .call(move |conn| queries::get_memories_by_ids(conn, &ids)),
            )
            .await?;
        let mut by_id: HashMap<MemoryId, Memory> =
            loaded.into_iter().map(|m| (m.id.clone(), m)).collect();

        Ok(matches
            .into_iter()
            .filter_map(|m| {
                let similarity = m.score.clamp(0.0, 1.0);
                let memory = by_id.remove(&m.id)?;
                (similarity >= threshold && filter.matches(&memory))
                    .then_some(SearchResult { memory, similarity })
            })
            .collect())
    }

    /// Similarity-ranked results above the threshold
    #[tracing::instrument(skip(self, ctx, request), fields(query = %request.query))]
    pub async fn semantic_search(
        &self,
        ctx: &RequestContext,
        request: &SemanticSearchRequest,
    ) -> Result<SearchPage<SearchResult>> {
        let plan = self.plan(&request.filter, request.limit, request.offset, request.threshold)?;
        let results = self
            .candidates(ctx, &request.query, &request.filter, plan.threshold)
            .await?;
        Ok(paginate(results, plan.offset, plan.limit))
    }

    /// Sortable search with optional facets over the full filtered set
    #[tracing::instrument(skip(self, ctx, request), fields(query = %request.query))]
    pub async fn faceted_search(
        &self,
        ctx: &RequestContext,
        request: &FacetedSearchRequest,
    ) -> Result<FacetedSearchResponse> {
        let plan = self.plan(&request.filter, request.limit, request.offset, request.threshold)?;
        let mut results = self
            .candidates(ctx, &request.query, &request.filter, plan.threshold)
            .await?;

        let facets = if request.include_facets {
            let memories: Vec<Memory> = results.iter().map(|r| r.memory.clone()).collect();
            Some(aggregate_facets(&memories, Utc::now()))
        } else {
            None
        };

        // A blank query keeps listing order under relevance sort
        let listing = request.query.trim().is_empty() && request.sort_by == SortField::Relevance;
        if !listing {
            sort_results(&mut results, request.sort_by, request.sort_direction);
        }

        let page = paginate(results, plan.offset, plan.limit);
        Ok(FacetedSearchResponse {
            results: page.results,
            total: page.total,
            facets,
        })
    }

    /// Results ranked by the composite relevance score
    #[tracing::instrument(skip(self, ctx, request), fields(query = %request.query))]
    pub async fn enhanced_search(
        &self,
        ctx: &RequestContext,
        request: &EnhancedSearchRequest,
    ) -> Result<SearchPage<EnhancedSearchResult>> {
        let plan = self.plan(&request.filter, request.limit, request.offset, request.threshold)?;
        let candidates = self
            .candidates(ctx, &request.query, &request.filter, plan.threshold)
            .await?;

        let terms = extract_terms(&request.query);
        let now = Utc::now();
        let mut scored: Vec<EnhancedSearchResult> = candidates
            .into_iter()
            .map(|c| self.scorer.score(c, &terms, now))
            .collect();

        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });

        Ok(paginate(scored, plan.offset, plan.limit))
    }

    /// Completions for a partial query from existing titles and tags
    #[tracing::instrument(skip(self, ctx, request), fields(partial = %request.partial_query))]
    pub async fn suggestions(
        &self,
        ctx: &RequestContext,
        request: &SuggestionRequest,
    ) -> Result<Vec<String>> {
        let limit = request.limit.unwrap_or(self.defaults.suggestion_limit);
        if limit == 0 {
            return Ok(vec![]);
        }

        let project_id = request.project_id.clone();
        let pool = self.defaults.list_all_limit;
        let entries = ctx
            .guard(
                Service::Persistence,
                self.storage.call(move |conn| {
                    queries::titles_and_tags(conn, project_id.as_deref(), pool)
                }),
            )
            .await?;

        Ok(suggest(&request.partial_query, &entries, limit))
    }
}

fn by_similarity(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

/// Sort by the requested key; ties always fall back to ID ascending
fn sort_results(results: &mut [SearchResult], field: SortField, direction: SortDirection) {
    results.sort_by(|a, b| {
        let primary = match field {
            SortField::Relevance => a
                .similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(Ordering::Equal),
            SortField::CreatedAt => a.memory.created_at.cmp(&b.memory.created_at),
            SortField::UpdatedAt => a.memory.updated_at.cmp(&b.memory.updated_at),
            SortField::Title => a
                .memory
                .title
                .to_lowercase()
                .cmp(&b.memory.title.to_lowercase()),
            SortField::Type => a.memory.memory_type.as_str().cmp(b.memory.memory_type.as_str()),
        };
        let primary = match direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary.then_with(|| a.memory.id.cmp(&b.memory.id))
    });
}

fn paginate<T>(results: Vec<T>, offset: usize, limit: usize) -> SearchPage<T> {
    let total = results.len();
    let results = results.into_iter().skip(offset).take(limit).collect();
    SearchPage { results, total }
}
