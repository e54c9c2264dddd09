
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::core::error::Result;
use crate::graph::models::{Clue, ClueStage};
use crate::graph::store::GraphStore;
use crate::graph::types::TypeRegistry;
use crate::index::{IndexSpace, ScoredId, VectorIndex};
use crate::llm::embeddings::Embedder;
use crate::llm::extractor::ExtractedAttribute;
use super::config::{KeySelection, SearchConfig};

pub const QUERY_NODE: &str = "query";

#[derive(Debug, Clone)]
pub struct ScoredKey {
    pub id: String,
    pub weight: f64,
}

/// Stage1 output: the activated key set plus the filtered, weighted event
/// set that seeds expansion. All weights live here, never on the graph.
#[derive(Debug, Default)]
pub struct RecallOutcome {
    /// Step-8 ranked keys.
    pub key_final: Vec<ScoredKey>,
    /// Step-1 weights: entity id → query similarity.
    pub k1: HashMap<String, f64>,
    /// Step-2 events in discovery order.
    pub graph_events: Vec<String>,
    /// Step-3 ranking: event id → query similarity, descending.
    pub vector_events: Vec<ScoredId>,
    /// Step-5 weights on surviving events.
    pub w_ek: HashMap<String, f64>,
    /// Step-6 composite weights on surviving events.
    pub event_weights: HashMap<String, f64>,
    /// Surviving events ordered by composite weight, stable.
    pub filtered_events: Vec<String>,
    /// Entities attached to each surviving event (full edge lists).
    pub event_entities: HashMap<String, Vec<String>>,
    pub clues: Vec<Clue>,
    pub degraded: bool,
}

pub struct RecallEngine {
    graph: Arc<dyn GraphStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    registry: Arc<TypeRegistry>,
}

impl RecallEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            graph,
            index,
            embedder,
            registry,
        }
    }

    /// The 8-step weighted activation. `attributes` may be empty, in which
    /// case recall degrades to the direct vector path only.
    pub async fn recall(
        &self,
        query_embedding: &[f32],
        attributes: &[ExtractedAttribute],
        config: &SearchConfig,
    ) -> Result<RecallOutcome> {
        let mut outcome = RecallOutcome::default();

        if attributes.is_empty() {
            return self.vector_only(query_embedding, config).await;
        }

        // Step 1: query → key, one type-scoped search per attribute.
        let (key_order, k1) = self.query_to_keys(attributes, config, &mut outcome.clues).await?;
        outcome.k1 = k1;

        if key_order.is_empty() {
            debug!("No keys survived step 1, degrading to vector-only recall");
            return self.vector_only(query_embedding, config).await;
        }

        // Steps 2 and 3 are independent and run concurrently.
        let (graph_events, vector_hits) = tokio::join!(
            self.index.exact_lookup(&key_order),
            self.index
                .search_similar(IndexSpace::Event, query_embedding, config.max_events)
        );
        outcome.graph_events = graph_events?;

        let mut e1: HashMap<String, f64> = HashMap::new();
        for hit in vector_hits? {
            if hit.score < config.event_similarity_threshold {
                continue;
            }
            outcome.clues.push(Clue::new(ClueStage::QueryEvent, QUERY_NODE, &hit.id, hit.score));
            e1.insert(hit.id.clone(), hit.score);
            outcome.vector_events.push(hit);
        }

        info!(
            "Recall steps 1-3: {} keys, {} graph events, {} vector events",
            key_order.len(),
            outcome.graph_events.len(),
            outcome.vector_events.len()
        );

        // Step 4: the precision gate. Keep only events reachable by both
        // the entity path and the direct semantic path.
        let e1_ids: HashSet<&String> = e1.keys().collect();
        let mut surviving: Vec<String> = outcome
            .graph_events
            .iter()
            .filter(|id| e1_ids.contains(id))
            .cloned()
            .collect();
        surviving = self.scope_to_source(surviving, config).await?;

        if surviving.is_empty() {
            info!("Recall step 4: empty intersection, returning empty stage result");
            return Ok(outcome);
        }

        // Step 5: event–key weight, a sum so events touching more and
        // stronger keys rank higher.
        let entity_lists = join_all(
            surviving
                .iter()
                .map(|event_id| self.graph.entities_for_event(event_id)),
        )
        .await;

        for (event_id, entities) in surviving.iter().zip(entity_lists) {
            let entities = entities?;
            let mut weight = 0.0;
            for key in &entities {
                if let Some(similarity) = outcome.k1.get(key) {
                    weight += similarity;
                    outcome
                        .clues
                        .push(Clue::new(ClueStage::KeyEvent, key, event_id, *similarity));
                }
            }
            outcome.w_ek.insert(event_id.clone(), weight);
            outcome.event_entities.insert(event_id.clone(), entities);
        }

        // Step 6: composite weight; events absent from e1 cannot be here,
        // so the product is always defined.
        for event_id in &surviving {
            let composite = outcome.w_ek[event_id] * e1[event_id];
            if composite > 0.0 {
                outcome.event_weights.insert(event_id.clone(), composite);
            }
        }
        surviving.retain(|id| outcome.event_weights.contains_key(id));

        // Step 7: one reverse mutual-reinforcement pass back onto the keys.
        let mut w_ke: HashMap<String, f64> = HashMap::new();
        for event_id in &surviving {
            let composite = outcome.event_weights[event_id];
            for key in &outcome.event_entities[event_id] {
                if outcome.k1.contains_key(key) {
                    *w_ke.entry(key.clone()).or_insert(0.0) += composite;
                }
            }
        }

        // Step 8: top-key extraction, ties broken by discovery order.
        let mut ranked_keys: Vec<ScoredKey> = key_order
            .iter()
            .map(|id| ScoredKey {
                id: id.clone(),
                weight: w_ke.get(id).copied().unwrap_or(0.0),
            })
            .collect();
        ranked_keys.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));

        outcome.key_final = match config.key_selection {
            KeySelection::TopN(n) => {
                ranked_keys.truncate(n);
                ranked_keys
            }
            KeySelection::Threshold(t) => {
                ranked_keys.into_iter().filter(|k| k.weight >= t).collect()
            }
        };

        // Surviving events ordered by composite weight, stable over the
        // step-4 discovery order.
        surviving.sort_by(|a, b| {
            outcome.event_weights[b]
                .partial_cmp(&outcome.event_weights[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        outcome.filtered_events = surviving;

        info!(
            "Recall complete: {} final keys, {} filtered events",
            outcome.key_final.len(),
            outcome.filtered_events.len()
        );
        Ok(outcome)
    }

    /// Step 1: embed each attribute name and search its type-scoped entity
    /// space concurrently. Returns discovery-ordered key ids plus `k1`.
    async fn query_to_keys(
        &self,
        attributes: &[ExtractedAttribute],
        config: &SearchConfig,
        clues: &mut Vec<Clue>,
    ) -> Result<(Vec<String>, HashMap<String, f64>)> {
        let searches = attributes.iter().map(|attribute| async {
            let vector = match self.embedder.embed(&attribute.name).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("Embedding failed for attribute '{}': {}", attribute.name, e);
                    return Ok(Vec::new());
                }
            };
            let threshold = self
                .registry
                .threshold(&attribute.kind, config.key_similarity_threshold);
            let hits = self
                .index
                .search_similar(
                    IndexSpace::Entity(attribute.kind.clone()),
                    &vector,
                    config.vector_k,
                )
                .await?;
            Ok::<Vec<ScoredId>, crate::core::error::MnemoraError>(
                hits.into_iter().filter(|h| h.score >= threshold).collect(),
            )
        });

        let mut key_order: Vec<String> = Vec::new();
        let mut k1: HashMap<String, f64> = HashMap::new();

        for result in join_all(searches).await {
            for hit in result? {
                match k1.get_mut(&hit.id) {
                    Some(existing) => {
                        if hit.score > *existing {
                            *existing = hit.score;
                        }
                    }
                    None => {
                        key_order.push(hit.id.clone());
                        k1.insert(hit.id.clone(), hit.score);
                    }
                }
                clues.push(Clue::new(ClueStage::QueryKey, QUERY_NODE, &hit.id, hit.score));
            }
        }

        // Overall cap: keep the strongest keys, stable over discovery order.
        if key_order.len() > config.max_keys {
            let mut capped = key_order.clone();
            capped.sort_by(|a, b| k1[b].partial_cmp(&k1[a]).unwrap_or(std::cmp::Ordering::Equal));
            capped.truncate(config.max_keys);
            let kept: HashSet<&String> = capped.iter().collect();
            key_order.retain(|id| kept.contains(id));
            k1.retain(|id, _| key_order.contains(id));
        }

        Ok((key_order, k1))
    }

    /// Degraded recall: the direct query→event path only.
    async fn vector_only(&self, query_embedding: &[f32], config: &SearchConfig) -> Result<RecallOutcome> {
        let mut outcome = RecallOutcome {
            degraded: true,
            ..Default::default()
        };

        let hits = self
            .index
            .search_similar(IndexSpace::Event, query_embedding, config.max_events)
            .await?;

        let mut surviving = Vec::new();
        for hit in hits {
            if hit.score < config.event_similarity_threshold {
                continue;
            }
            outcome.clues.push(Clue::new(ClueStage::QueryEvent, QUERY_NODE, &hit.id, hit.score));
            surviving.push(hit.id.clone());
            outcome.event_weights.insert(hit.id.clone(), hit.score);
            outcome.vector_events.push(hit);
        }

        surviving = self.scope_to_source(surviving, config).await?;
        outcome.event_weights.retain(|id, _| surviving.contains(id));

        let entity_lists = join_all(
            surviving
                .iter()
                .map(|event_id| self.graph.entities_for_event(event_id)),
        )
        .await;
        for (event_id, entities) in surviving.iter().zip(entity_lists) {
            outcome.event_entities.insert(event_id.clone(), entities?);
        }

        outcome.filtered_events = surviving;
        info!(
            "Vector-only recall: {} events",
            outcome.filtered_events.len()
        );
        Ok(outcome)
    }

    /// Applies the caller's source scope, preserving order.
    async fn scope_to_source(&self, event_ids: Vec<String>, config: &SearchConfig) -> Result<Vec<String>> {
        let Some(source_id) = &config.source_id else {
            return Ok(event_ids);
        };
        let events = self.graph.events_by_ids(&event_ids).await?;
        let in_scope: HashSet<String> = events
            .into_iter()
            .filter(|e| &e.source_id == source_id)
            .map(|e| e.id)
            .collect();
        Ok(event_ids.into_iter().filter(|id| in_scope.contains(id)).collect())
    }
}
