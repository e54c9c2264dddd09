
pub mod pagerank;
pub mod rrf;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::core::error::Result;
use crate::graph::models::{Clue, Event, NodeId};
use crate::graph::store::GraphStore;
use super::config::{RerankStrategy, ReturnType, SearchConfig};
use super::expand::ExpandOutcome;
use super::recall::RecallOutcome;
use super::result::{RankedEvent, RankedSection, SearchResults, SearchType};
use super::scoring::cosine_similarity;

pub use pagerank::{power_iteration, PageRankResult, CONVERGENCE_EPSILON};
pub use rrf::{fuse, RankedList, DEFAULT_RRF_K};

/// Blend shares for the PageRank ranking key.
const PAGERANK_SHARE: f64 = 0.4;
const WEIGHT_SHARE: f64 = 0.3;
const VECTOR_SHARE: f64 = 0.3;

#[derive(Debug)]
pub struct RerankOutcome {
    pub results: SearchResults,
    pub candidate_count: usize,
    pub converged: bool,
    pub iterations: u32,
}

struct Candidate {
    event: Event,
    /// Accumulated composite weight, reported on the output record.
    weight: f64,
    /// Pure entity-path strength (`W_ek`, or the expansion weight), used
    /// as the graph-side ranking for rank fusion. The composite already
    /// contains the vector score as a factor, so fusing it against the
    /// vector ranking would count the semantic path twice.
    path_weight: f64,
    vector: f64,
    search_type: SearchType,
}

pub struct RerankEngine {
    graph: Arc<dyn GraphStore>,
}

impl RerankEngine {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    pub async fn rerank(
        &self,
        query_embedding: &[f32],
        recall: &RecallOutcome,
        expand: &ExpandOutcome,
        config: &SearchConfig,
    ) -> Result<RerankOutcome> {
        let candidates = self.collect_candidates(query_embedding, recall, expand).await?;
        let candidate_count = candidates.len();
        info!(
            "Reranking {} candidates with {} at {} granularity",
            candidate_count, config.strategy, config.return_type
        );

        let mut clues = recall.clues.clone();
        clues.extend(expand.clues.iter().cloned());

        let outcome = match (config.strategy, config.return_type) {
            (RerankStrategy::PageRank, ReturnType::Event) => {
                self.pagerank_events(candidates, &clues, config)
            }
            (RerankStrategy::Rrf, ReturnType::Event) => self.rrf_events(candidates, &clues, config),
            (RerankStrategy::PageRank, ReturnType::Paragraph) => {
                self.pagerank_sections(candidates, &clues, config).await?
            }
            // Rejected by SearchConfig::validate before any I/O.
            (RerankStrategy::Rrf, ReturnType::Paragraph) => {
                return Err(crate::core::error::MnemoraError::Validation(
                    "RRF strategy does not support paragraph return type".to_string(),
                ))
            }
        };

        Ok(RerankOutcome {
            candidate_count,
            ..outcome
        })
    }

    /// Union of the recalled and expanded event sets with their per-query
    /// weights, vector scores and provenance.
    async fn collect_candidates(
        &self,
        query_embedding: &[f32],
        recall: &RecallOutcome,
        expand: &ExpandOutcome,
    ) -> Result<Vec<Candidate>> {
        let recall_type = if recall.degraded {
            SearchType::Vector
        } else {
            SearchType::Both
        };
        let vector_scores: HashMap<&String, f64> = recall
            .vector_events
            .iter()
            .map(|hit| (&hit.id, hit.score))
            .collect();

        let mut ids: Vec<String> = recall.filtered_events.clone();
        let mut kinds: HashMap<String, SearchType> = ids
            .iter()
            .map(|id| (id.clone(), recall_type))
            .collect();
        for id in expand.expanded_event_ids() {
            if !kinds.contains_key(&id) {
                kinds.insert(id.clone(), SearchType::Expand);
                ids.push(id);
            }
        }

        let events = self.graph.events_by_ids(&ids).await?;
        let mut candidates = Vec::with_capacity(events.len());
        for event in events {
            let weight = recall
                .event_weights
                .get(&event.id)
                .copied()
                .or_else(|| {
                    expand
                        .node_weights
                        .get(&NodeId::Event(event.id.clone()))
                        .copied()
                })
                .unwrap_or(0.0);
            let path_weight = recall
                .w_ek
                .get(&event.id)
                .copied()
                .or_else(|| {
                    expand
                        .node_weights
                        .get(&NodeId::Event(event.id.clone()))
                        .copied()
                })
                .unwrap_or(weight);
            let vector = vector_scores
                .get(&event.id)
                .copied()
                .unwrap_or_else(|| cosine_similarity(query_embedding, &event.embedding));
            let search_type = kinds.get(&event.id).copied().unwrap_or(SearchType::Expand);
            candidates.push(Candidate {
                event,
                weight,
                path_weight,
                vector,
                search_type,
            });
        }
        Ok(candidates)
    }

    fn pagerank_events(
        &self,
        candidates: Vec<Candidate>,
        clues: &[Clue],
        config: &SearchConfig,
    ) -> RerankOutcome {
        // Shared-entity edges over the candidate set.
        let mut entity_members: HashMap<&String, Vec<usize>> = HashMap::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            for entity_id in &candidate.event.entity_ids {
                entity_members.entry(entity_id).or_default().push(idx);
            }
        }
        let adjacency = build_adjacency(candidates.len(), entity_members.values());

        let pr = power_iteration(&adjacency, config.damping_factor, config.max_iterations);
        let blended = blend_scores(&candidates, &pr.scores);

        let mut ranked: Vec<RankedEvent> = candidates
            .into_iter()
            .enumerate()
            .map(|(idx, c)| RankedEvent {
                clues: clues_for_event(clues, &c.event.id),
                pagerank: pr.scores[idx],
                weight: c.weight,
                score: blended[idx],
                search_type: c.search_type,
                event: c.event,
            })
            .collect();

        ranked.retain(|r| r.score >= config.score_threshold);
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked.truncate(config.max_results);

        RerankOutcome {
            results: SearchResults::Events(ranked),
            candidate_count: 0,
            converged: pr.converged,
            iterations: pr.iterations,
        }
    }

    fn rrf_events(&self, candidates: Vec<Candidate>, clues: &[Clue], config: &SearchConfig) -> RerankOutcome {
        // Two rankings over the same candidates: the pure entity-path
        // weights and the direct vector similarities.
        let mut by_weight: Vec<&Candidate> = candidates.iter().collect();
        by_weight.sort_by(|a, b| b.path_weight.partial_cmp(&a.path_weight).unwrap_or(Ordering::Equal));
        let weight_ranking: Vec<String> = by_weight.iter().map(|c| c.event.id.clone()).collect();

        let mut by_vector: Vec<&Candidate> = candidates.iter().collect();
        by_vector.sort_by(|a, b| b.vector.partial_cmp(&a.vector).unwrap_or(Ordering::Equal));
        let vector_ranking: Vec<String> = by_vector.iter().map(|c| c.event.id.clone()).collect();

        let fused = fuse(
            &[
                RankedList {
                    ids: &weight_ranking,
                    weight: 1.0,
                },
                RankedList {
                    ids: &vector_ranking,
                    weight: 1.0,
                },
            ],
            config.rrf_k,
        );

        let mut by_id: HashMap<String, Candidate> = candidates
            .into_iter()
            .map(|c| (c.event.id.clone(), c))
            .collect();

        let mut ranked = Vec::new();
        for (id, score) in fused {
            if score < config.score_threshold {
                continue;
            }
            let Some(candidate) = by_id.remove(&id) else { continue };
            ranked.push(RankedEvent {
                clues: clues_for_event(clues, &candidate.event.id),
                pagerank: 0.0,
                weight: candidate.weight,
                score,
                search_type: candidate.search_type,
                event: candidate.event,
            });
        }
        ranked.truncate(config.max_results);

        RerankOutcome {
            results: SearchResults::Events(ranked),
            candidate_count: 0,
            converged: true,
            iterations: 0,
        }
    }

    async fn pagerank_sections(
        &self,
        candidates: Vec<Candidate>,
        clues: &[Clue],
        config: &SearchConfig,
    ) -> Result<RerankOutcome> {
        // Join candidates up to their source sections.
        struct SectionAgg {
            weight: f64,
            vector: f64,
            search_type: SearchType,
            event_ids: Vec<String>,
            entity_ids: Vec<String>,
        }

        let mut order: Vec<String> = Vec::new();
        let mut aggregates: HashMap<String, SectionAgg> = HashMap::new();
        for candidate in &candidates {
            let Some(section_id) = &candidate.event.section_id else { continue };
            let agg = aggregates.entry(section_id.clone()).or_insert_with(|| {
                order.push(section_id.clone());
                SectionAgg {
                    weight: 0.0,
                    vector: 0.0,
                    search_type: candidate.search_type,
                    event_ids: Vec::new(),
                    entity_ids: Vec::new(),
                }
            });
            agg.weight += candidate.weight;
            agg.vector = agg.vector.max(candidate.vector);
            agg.search_type = agg.search_type.merge(candidate.search_type);
            agg.event_ids.push(candidate.event.id.clone());
            for entity_id in &candidate.event.entity_ids {
                if !agg.entity_ids.contains(entity_id) {
                    agg.entity_ids.push(entity_id.clone());
                }
            }
        }

        // Sections are linked when their events share an entity.
        let mut entity_members: HashMap<&String, Vec<usize>> = HashMap::new();
        for (idx, section_id) in order.iter().enumerate() {
            for entity_id in &aggregates[section_id].entity_ids {
                entity_members.entry(entity_id).or_default().push(idx);
            }
        }
        let adjacency = build_adjacency(order.len(), entity_members.values());
        let pr = power_iteration(&adjacency, config.damping_factor, config.max_iterations);

        let max_weight = order
            .iter()
            .map(|id| aggregates[id].weight)
            .fold(0.0_f64, f64::max);
        let max_pr = pr.scores.iter().copied().fold(0.0_f64, f64::max);

        let sections = self.graph.sections_by_ids(&order).await?;
        let section_records: HashMap<String, _> =
            sections.into_iter().map(|s| (s.id.clone(), s)).collect();

        let mut ranked = Vec::new();
        for (idx, section_id) in order.iter().enumerate() {
            let Some(section) = section_records.get(section_id) else { continue };
            let agg = &aggregates[section_id];
            let w_norm = if max_weight > 0.0 { agg.weight / max_weight } else { 0.0 };
            let pr_norm = if max_pr > 0.0 { pr.scores[idx] / max_pr } else { 0.0 };
            let score = PAGERANK_SHARE * pr_norm + WEIGHT_SHARE * w_norm + VECTOR_SHARE * agg.vector;
            if score < config.score_threshold {
                continue;
            }
            let mut section_clues = Vec::new();
            for event_id in &agg.event_ids {
                section_clues.extend(clues_for_event(clues, event_id));
            }
            ranked.push(RankedSection {
                section: section.clone(),
                pagerank: pr.scores[idx],
                weight: agg.weight,
                score,
                search_type: agg.search_type,
                event_ids: agg.event_ids.clone(),
                clues: section_clues,
            });
        }

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked.truncate(config.max_results);

        Ok(RerankOutcome {
            results: SearchResults::Sections(ranked),
            candidate_count: 0,
            converged: pr.converged,
            iterations: pr.iterations,
        })
    }
}

/// Undirected adjacency from membership lists: every pair sharing a group
/// gets an edge once.
fn build_adjacency<'a, I>(n: usize, groups: I) -> Vec<Vec<usize>>
where
    I: Iterator<Item = &'a Vec<usize>>,
{
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for members in groups {
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                if !adjacency[a].contains(&b) {
                    adjacency[a].push(b);
                    adjacency[b].push(a);
                }
            }
        }
    }
    adjacency
}

/// PageRank blend: normalized centrality, normalized accumulated weight
/// and the raw vector similarity.
fn blend_scores(candidates: &[Candidate], pagerank: &[f64]) -> Vec<f64> {
    let max_weight = candidates.iter().map(|c| c.weight).fold(0.0_f64, f64::max);
    let max_pr = pagerank.iter().copied().fold(0.0_f64, f64::max);

    candidates
        .iter()
        .zip(pagerank)
        .map(|(candidate, pr)| {
            let w_norm = if max_weight > 0.0 { candidate.weight / max_weight } else { 0.0 };
            let pr_norm = if max_pr > 0.0 { pr / max_pr } else { 0.0 };
            PAGERANK_SHARE * pr_norm + WEIGHT_SHARE * w_norm + VECTOR_SHARE * candidate.vector
        })
        .collect()
}

/// Clues touching one event, matching both raw ids and node-prefixed ids.
fn clues_for_event(clues: &[Clue], event_id: &str) -> Vec<Clue> {
    let prefixed = format!("event:{}", event_id);
    clues
        .iter()
        .filter(|clue| {
            clue.from_node == event_id
                || clue.to_node == event_id
                || clue.from_node == prefixed
                || clue.to_node == prefixed
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::{ClueStage, Section};
    use crate::graph::store::InMemoryGraph;
    use crate::index::ScoredId;
    use chrono::Utc;

    fn event(id: &str, entity_ids: &[&str], section: Option<&str>, embedding: Vec<f32>) -> Event {
        Event {
            id: id.to_string(),
            source_id: "src".to_string(),
            title: id.to_string(),
            content: String::new(),
            embedding,
            created_at: Utc::now(),
            entity_ids: entity_ids.iter().map(|s| s.to_string()).collect(),
            section_id: section.map(|s| s.to_string()),
        }
    }

    fn recall_with(events: &[(&str, f64, f64)]) -> RecallOutcome {
        // (id, weight, vector score)
        let mut recall = RecallOutcome::default();
        for (id, weight, vector) in events {
            recall.filtered_events.push(id.to_string());
            recall.event_weights.insert(id.to_string(), *weight);
            recall.vector_events.push(ScoredId {
                id: id.to_string(),
                score: *vector,
            });
        }
        recall
    }

    fn graph_with(events: &[Event]) -> Arc<InMemoryGraph> {
        let graph = Arc::new(InMemoryGraph::new());
        for event in events {
            graph.insert_event(event.clone());
        }
        graph
    }

    #[tokio::test]
    async fn test_pagerank_event_mode_orders_and_truncates() {
        // a and b share an entity; c is isolated with a weak vector score.
        let graph = graph_with(&[
            event("a", &["k1"], None, vec![1.0, 0.0]),
            event("b", &["k1"], None, vec![0.9, 0.1]),
            event("c", &[], None, vec![0.1, 0.9]),
        ]);
        let recall = recall_with(&[("a", 2.0, 0.95), ("b", 1.0, 0.9), ("c", 0.2, 0.3)]);
        let expand = ExpandOutcome::default();
        let engine = RerankEngine::new(graph);

        let config = SearchConfig {
            max_results: 2,
            ..Default::default()
        };
        let outcome = engine
            .rerank(&[1.0, 0.0], &recall, &expand, &config)
            .await
            .unwrap();

        let events = outcome.results.as_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.id, "a");
        assert!(events[0].score >= events[1].score);
        assert_eq!(outcome.candidate_count, 3);
        assert!(outcome.converged);
    }

    #[tokio::test]
    async fn test_rrf_fuses_entity_path_against_vector_path() {
        let graph = graph_with(&[
            event("x", &[], None, vec![1.0, 0.0]),
            event("y", &[], None, vec![0.9, 0.1]),
        ]);
        // Entity-path strengths and vector scores disagree: x leads W_ek,
        // y leads the vector ranking. The composite W_e2 = W_ek × e1
        // ranks y first on both axes, so fusing the composite instead of
        // W_ek would always hand the fusion to y.
        let mut recall = recall_with(&[("x", 1.0, 0.5), ("y", 1.35, 0.9)]);
        recall.w_ek.insert("x".to_string(), 2.0);
        recall.w_ek.insert("y".to_string(), 1.5);
        let expand = ExpandOutcome::default();
        let engine = RerankEngine::new(graph);

        let config = SearchConfig {
            strategy: RerankStrategy::Rrf,
            ..Default::default()
        };
        let outcome = engine
            .rerank(&[1.0, 0.0], &recall, &expand, &config)
            .await
            .unwrap();

        let events = outcome.results.as_events().unwrap();
        assert_eq!(events.len(), 2);
        // Ranks are symmetric (1st+2nd each), so first appearance in the
        // entity-path list breaks the tie in favor of x.
        assert_eq!(events[0].event.id, "x");
        assert_eq!(events[0].pagerank, 0.0);
        // The output record still carries the composite weight.
        assert!((events[0].weight - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_paragraph_mode_joins_sections() {
        let graph = graph_with(&[
            event("a", &["k1"], Some("s1"), vec![1.0, 0.0]),
            event("b", &["k1"], Some("s1"), vec![0.9, 0.1]),
            event("c", &["k2"], Some("s2"), vec![0.8, 0.2]),
        ]);
        graph.insert_section(Section {
            id: "s1".to_string(),
            source_id: "src".to_string(),
            content: "first paragraph".to_string(),
        });
        graph.insert_section(Section {
            id: "s2".to_string(),
            source_id: "src".to_string(),
            content: "second paragraph".to_string(),
        });

        let recall = recall_with(&[("a", 2.0, 0.95), ("b", 1.0, 0.9), ("c", 0.5, 0.8)]);
        let expand = ExpandOutcome::default();
        let engine = RerankEngine::new(graph);

        let config = SearchConfig {
            return_type: ReturnType::Paragraph,
            ..Default::default()
        };
        let outcome = engine
            .rerank(&[1.0, 0.0], &recall, &expand, &config)
            .await
            .unwrap();

        let sections = outcome.results.as_sections().unwrap();
        assert_eq!(sections.len(), 2);
        // s1 aggregates both strong events and ranks first.
        assert_eq!(sections[0].section.id, "s1");
        assert_eq!(sections[0].event_ids, vec!["a".to_string(), "b".to_string()]);
        assert!(sections[0].weight > sections[1].weight);
    }

    #[tokio::test]
    async fn test_score_threshold_prunes() {
        let graph = graph_with(&[event("a", &[], None, vec![1.0, 0.0])]);
        let recall = recall_with(&[("a", 1.0, 0.9)]);
        let expand = ExpandOutcome::default();
        let engine = RerankEngine::new(graph);

        let config = SearchConfig {
            score_threshold: 0.999,
            ..Default::default()
        };
        let outcome = engine
            .rerank(&[1.0, 0.0], &recall, &expand, &config)
            .await
            .unwrap();
        // Blend tops out below 1.0 here, so everything is pruned.
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_clue_trails_attached() {
        let graph = graph_with(&[event("a", &["k1"], None, vec![1.0, 0.0])]);
        let mut recall = recall_with(&[("a", 1.0, 0.9)]);
        recall.clues.push(Clue::new(ClueStage::KeyEvent, "k1", "a", 0.9));
        recall.clues.push(Clue::new(ClueStage::QueryKey, "query", "k1", 0.9));
        let expand = ExpandOutcome::default();
        let engine = RerankEngine::new(graph);

        let outcome = engine
            .rerank(&[1.0, 0.0], &recall, &expand, &SearchConfig::default())
            .await
            .unwrap();
        let events = outcome.results.as_events().unwrap();
        assert_eq!(events[0].clues.len(), 1);
        assert_eq!(events[0].clues[0].to_node, "a");
    }

    #[tokio::test]
    async fn test_rrf_paragraph_rejected() {
        let graph = graph_with(&[]);
        let engine = RerankEngine::new(graph);
        let config = SearchConfig {
            strategy: RerankStrategy::Rrf,
            return_type: ReturnType::Paragraph,
            ..Default::default()
        };
        let result = engine
            .rerank(
                &[1.0, 0.0],
                &RecallOutcome::default(),
                &ExpandOutcome::default(),
                &config,
            )
            .await;
        assert!(result.is_err());
    }
}
