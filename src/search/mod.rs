
pub mod cache;
pub mod config;
pub mod expand;
pub mod normalize;
pub mod recall;
pub mod rerank;
pub mod result;
pub mod scoring;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::{Duration, Instant};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::MnemoraConfig;
use crate::core::error::{MnemoraError, Result};
use crate::graph::models::{Entity, EntityKind};
use crate::graph::store::GraphStore;
use crate::graph::types::TypeRegistry;
use crate::index::VectorIndex;
use crate::llm::embeddings::Embedder;
use crate::llm::extractor::AttributeExtractor;

pub use cache::{CacheStats, SearchCache};
pub use config::{KeySelection, RerankStrategy, ReturnType, SearchConfig};
pub use expand::{ExpandEngine, ExpandOutcome};
pub use normalize::{NameNormalizer, SynonymNormalizer};
pub use recall::{RecallEngine, RecallOutcome, ScoredKey};
pub use rerank::{RerankEngine, RerankOutcome};
pub use result::{
    RankedEvent, RankedSection, SearchResponse, SearchResults, SearchStats, SearchType,
    StageLog, StageOutcome,
};

use result::StageOutcome::{Degraded, Failed, Ok as StageOk, Skipped};
use scoring::{cosine_similarity, final_score, preference_score, time_decay, EntityProfile};

/// One retrieval call: query text, the caller's preference focus, and the
/// per-query knobs.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub focus: Vec<String>,
    pub config: SearchConfig,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            focus: Vec::new(),
            config: SearchConfig::default(),
        }
    }

    pub fn with_focus(mut self, focus: Vec<String>) -> Self {
        self.focus = focus;
        self
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }
}

/// Lifecycle of one query through the pipeline, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Received,
    AttributesExtracted,
    Recalled,
    Expanded,
    Reranked,
    Scored,
    Returned,
}

/// The full retrieval pipeline: extract → recall → expand → rerank →
/// score, with caching, retries, a query deadline and per-stage logs.
pub struct SearchPipeline {
    graph: Arc<dyn GraphStore>,
    extractor: Arc<dyn AttributeExtractor>,
    embedder: Arc<dyn Embedder>,
    normalizer: Arc<dyn NameNormalizer>,
    registry: Arc<TypeRegistry>,
    config: MnemoraConfig,
    cache: SearchCache<SearchResponse>,
    recall: RecallEngine,
    expand: ExpandEngine,
    rerank: RerankEngine,
}

impl SearchPipeline {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn AttributeExtractor>,
        embedder: Arc<dyn Embedder>,
        normalizer: Arc<dyn NameNormalizer>,
        registry: Arc<TypeRegistry>,
        config: MnemoraConfig,
    ) -> Self {
        let recall = RecallEngine::new(
            graph.clone(),
            index,
            embedder.clone(),
            registry.clone(),
        );
        let expand = ExpandEngine::new(graph.clone(), registry.clone(), normalizer.clone());
        let rerank = RerankEngine::new(graph.clone());
        let cache = SearchCache::new(config.cache_size, config.cache_ttl);
        Self {
            graph,
            extractor,
            embedder,
            normalizer,
            registry,
            config,
            cache,
            recall,
            expand,
            rerank,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        // Everything cheap to check fails before any I/O.
        request.config.validate()?;
        self.registry.validate()?;

        let cache_key = SearchCache::<SearchResponse>::make_key(
            &request.query,
            &request.focus,
            &request.config,
        );
        if let Some(mut cached) = self.cache.get(&cache_key) {
            debug!("Cache hit for query '{}'", crate::utils::safe_truncate(&request.query, 60));
            cached.stats.cache_hit = true;
            return Ok(cached);
        }

        let query_id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.query_deadline);
        let mut state = QueryState::Received;
        let mut stages: Vec<StageLog> = Vec::new();
        info!(
            "Query {} received: '{}'",
            query_id,
            crate::utils::safe_truncate_ellipsis(&request.query, 120)
        );

        // The query embedding feeds every later stage, so a hard failure
        // here aborts the query outright.
        let embed_started = Instant::now();
        let query_embedding = match self
            .with_retry(|| async {
                self.embedder
                    .embed(&request.query)
                    .await
                    .map_err(|e| MnemoraError::Embedding(e.to_string()))
            })
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                stages.push(stage_log("embed_query", Failed, embed_started, Some(e.to_string())));
                return Err(e);
            }
        };
        stages.push(stage_log("embed_query", StageOk, embed_started, None));

        let extract_started = Instant::now();
        let extracted = self
            .with_retry(|| async { self.extractor.extract(&request.query, &self.registry).await })
            .await
            .map_err(|e| match e {
                // An extractor that only ever timed out is still an
                // extraction failure for degradation purposes.
                MnemoraError::RetryExhausted(attempts, cause) => {
                    MnemoraError::Extraction(format!("gave up after {} attempts: {}", attempts, cause))
                }
                other => other,
            });
        let attributes = match extracted {
            Ok(attributes) => {
                stages.push(stage_log("extract_attributes", StageOk, extract_started, None));
                attributes
            }
            Err(e) if self.config.fail_fast || !e.is_degradable() => {
                stages.push(stage_log(
                    "extract_attributes",
                    Failed,
                    extract_started,
                    Some(e.to_string()),
                ));
                return Err(e);
            }
            Err(e) => {
                warn!("Query {}: extraction failed, degrading to vector-only: {}", query_id, e);
                stages.push(stage_log(
                    "extract_attributes",
                    Degraded,
                    extract_started,
                    Some(e.to_string()),
                ));
                Vec::new()
            }
        };
        advance(&mut state, QueryState::AttributesExtracted, query_id);

        let recall_started = Instant::now();
        let recall = self
            .recall
            .recall(&query_embedding, &attributes, &request.config)
            .await?;
        stages.push(stage_log(
            "recall",
            if recall.degraded { Degraded } else { StageOk },
            recall_started,
            None,
        ));
        advance(&mut state, QueryState::Recalled, query_id);

        if started.elapsed() >= deadline {
            warn!("Query {} hit the deadline after recall, returning partial results", query_id);
            return self
                .partial_response(query_id, &recall, request, started, stages)
                .await;
        }

        let expand_started = Instant::now();
        let expand = self.expand.expand(&recall, &request.config).await?;
        stages.push(stage_log("expand", StageOk, expand_started, None));
        advance(&mut state, QueryState::Expanded, query_id);

        if started.elapsed() >= deadline {
            warn!("Query {} hit the deadline after expansion, returning partial results", query_id);
            return self
                .partial_response(query_id, &recall, request, started, stages)
                .await;
        }

        let rerank_started = Instant::now();
        let reranked = self
            .rerank
            .rerank(&query_embedding, &recall, &expand, &request.config)
            .await?;
        stages.push(stage_log("rerank", StageOk, rerank_started, None));
        advance(&mut state, QueryState::Reranked, query_id);

        let score_started = Instant::now();
        let mut results = reranked.results;
        if request.config.final_blend {
            match &mut results {
                SearchResults::Events(events) => {
                    self.apply_final_blend(events, &query_embedding, request).await?;
                    stages.push(stage_log("score", StageOk, score_started, None));
                }
                SearchResults::Sections(_) => {
                    // Sections carry no timestamp, so the composite blend
                    // stays event-granularity only.
                    stages.push(stage_log(
                        "score",
                        Skipped,
                        score_started,
                        Some("paragraph granularity".to_string()),
                    ));
                }
            }
        } else {
            stages.push(stage_log("score", Skipped, score_started, Some("disabled".to_string())));
        }
        advance(&mut state, QueryState::Scored, query_id);

        let stats = SearchStats {
            entities_recalled: recall.key_final.len(),
            events_recalled: recall.filtered_events.len(),
            nodes_expanded: expand.node_count(),
            hops_used: expand.hops_used,
            candidates_reranked: reranked.candidate_count,
            results_returned: results.len(),
            strategy: request.config.strategy.to_string(),
            degraded: recall.degraded,
            cache_hit: false,
            pagerank_converged: reranked.converged,
            pagerank_iterations: reranked.iterations,
            total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };

        let response = SearchResponse {
            query_id,
            results,
            stats,
            stages,
        };
        self.cache.set(&cache_key, response.clone());
        advance(&mut state, QueryState::Returned, query_id);
        info!(
            "Query {} returned {} results in {:.1} ms",
            query_id,
            response.stats.results_returned,
            response.stats.total_duration_ms
        );
        Ok(response)
    }

    /// Deadline fallback: the recalled events ranked by their composite
    /// weights, with the remaining stages marked skipped.
    async fn partial_response(
        &self,
        query_id: Uuid,
        recall: &RecallOutcome,
        request: &SearchRequest,
        started: Instant,
        mut stages: Vec<StageLog>,
    ) -> Result<SearchResponse> {
        for stage in ["expand", "rerank", "score"] {
            if !stages.iter().any(|s| s.stage == stage) {
                stages.push(StageLog {
                    stage: stage.to_string(),
                    outcome: Skipped,
                    duration_ms: 0.0,
                    note: Some("deadline exceeded".to_string()),
                });
            }
        }

        let search_type = if recall.degraded {
            SearchType::Vector
        } else {
            SearchType::Both
        };
        let mut ids = recall.filtered_events.clone();
        ids.truncate(request.config.max_results);
        let events = self.graph.events_by_ids(&ids).await?;

        let ranked: Vec<RankedEvent> = events
            .into_iter()
            .map(|event| {
                let weight = recall.event_weights.get(&event.id).copied().unwrap_or(0.0);
                let clues = recall
                    .clues
                    .iter()
                    .filter(|c| c.from_node == event.id || c.to_node == event.id)
                    .cloned()
                    .collect();
                RankedEvent {
                    pagerank: 0.0,
                    weight,
                    score: weight,
                    search_type,
                    clues,
                    event,
                }
            })
            .collect();

        let stats = SearchStats {
            entities_recalled: recall.key_final.len(),
            events_recalled: recall.filtered_events.len(),
            results_returned: ranked.len(),
            strategy: request.config.strategy.to_string(),
            degraded: recall.degraded,
            total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            ..Default::default()
        };

        Ok(SearchResponse {
            query_id,
            results: SearchResults::Events(ranked),
            stats,
            stages,
        })
    }

    /// Composite rescoring of the reranked list: ranking relevance, direct
    /// vector similarity, recency decay and the caller's preference focus.
    async fn apply_final_blend(
        &self,
        events: &mut [RankedEvent],
        query_embedding: &[f32],
        request: &SearchRequest,
    ) -> Result<()> {
        let focus: BTreeSet<String> = request
            .focus
            .iter()
            .map(|name| self.normalizer.normalize(&EntityKind::Topic, name))
            .collect();
        let now = Utc::now();

        let mut entity_ids: Vec<String> = Vec::new();
        for ranked in events.iter() {
            for id in &ranked.event.entity_ids {
                if !entity_ids.contains(id) {
                    entity_ids.push(id.clone());
                }
            }
        }
        let entities = self.graph.entities_by_ids(&entity_ids).await?;
        let entity_map: HashMap<String, Entity> =
            entities.into_iter().map(|e| (e.id.clone(), e)).collect();

        for ranked in events.iter_mut() {
            let profile = EntityProfile::from_entities(
                ranked.event.entity_ids.iter().filter_map(|id| entity_map.get(id)),
                self.normalizer.as_ref(),
            );
            let relevance = ranked.score.clamp(0.0, 1.0);
            let vector = cosine_similarity(query_embedding, &ranked.event.embedding);
            let decay = time_decay(ranked.event.created_at, now, request.config.decay_lambda);
            let preference = preference_score(&profile, &focus);
            ranked.score = final_score(relevance, vector, decay, preference);
        }
        events.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    /// Bounded retry with exponential backoff and a per-call timeout.
    /// Returns the last underlying error so the caller can still classify
    /// it; attempts that never completed surface as `RetryExhausted`.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = Duration::from_secs(self.config.call_timeout);
        let attempts = self.config.max_retries.max(1);
        let mut delay = Duration::from_millis(100);
        let mut last_error =
            MnemoraError::RetryExhausted(attempts, "no attempt completed".to_string());

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                }
                Err(_) => {
                    warn!("Attempt {}/{} timed out after {:?}", attempt, attempts, timeout);
                    last_error = MnemoraError::RetryExhausted(
                        attempt,
                        format!("timed out after {}s", self.config.call_timeout),
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_error)
    }
}

fn advance(state: &mut QueryState, next: QueryState, query_id: Uuid) {
    debug!("Query {}: {} -> {}", query_id, state, next);
    *state = next;
}

fn stage_log(stage: &str, outcome: StageOutcome, started: Instant, note: Option<String>) -> StageLog {
    StageLog {
        stage: stage.to_string(),
        outcome,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        note,
    }
}
