
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use crate::core::error::Result;
use crate::graph::models::{Clue, ClueStage, Entity, NodeId};
use crate::graph::store::GraphStore;
use crate::graph::types::TypeRegistry;
use super::config::SearchConfig;
use super::normalize::NameNormalizer;
use super::recall::RecallOutcome;
use super::scoring::{dimension_relevance, EntityProfile};

/// Multi-hop activation result: admitted nodes per hop, their accumulated
/// weights, and the traversal clues.
#[derive(Debug, Default)]
pub struct ExpandOutcome {
    pub hops: BTreeMap<u32, Vec<NodeId>>,
    pub node_weights: HashMap<NodeId, f64>,
    pub clues: Vec<Clue>,
    pub hops_used: u32,
}

impl ExpandOutcome {
    pub fn node_count(&self) -> usize {
        self.hops.values().map(Vec::len).sum()
    }

    pub fn expanded_event_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for nodes in self.hops.values() {
            for node in nodes {
                if node.is_event() {
                    ids.push(node.raw_id().to_string());
                }
            }
        }
        ids
    }
}

struct FrontierNode {
    node: NodeId,
    /// Profile of the seed this activation chain started from. Relevance
    /// is always computed against the origin, not the immediate parent.
    origin: Arc<EntityProfile>,
    weight: f64,
}

pub struct ExpandEngine {
    graph: Arc<dyn GraphStore>,
    registry: Arc<TypeRegistry>,
    normalizer: Arc<dyn NameNormalizer>,
}

impl ExpandEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        registry: Arc<TypeRegistry>,
        normalizer: Arc<dyn NameNormalizer>,
    ) -> Self {
        Self {
            graph,
            registry,
            normalizer,
        }
    }

    pub async fn expand(&self, recall: &RecallOutcome, config: &SearchConfig) -> Result<ExpandOutcome> {
        let mut outcome = ExpandOutcome::default();
        if config.max_depth == 0 {
            return Ok(outcome);
        }

        let (mut frontier, mut visited) = self.seed_frontier(recall).await?;
        if frontier.is_empty() {
            return Ok(outcome);
        }

        for hop in 1..=config.max_depth {
            let next = self
                .advance_hop(&frontier, &mut visited, &mut outcome, hop, config)
                .await?;
            if next.is_empty() {
                break;
            }
            outcome.hops_used = hop;
            frontier = next;
        }

        info!(
            "Expansion: {} nodes over {} hops from {} seeds",
            outcome.node_count(),
            outcome.hops_used,
            visited.len() - outcome.node_count()
        );
        Ok(outcome)
    }

    /// Builds the hop-0 frontier from the recalled keys and events. Seeds
    /// are pre-inserted into the visited set so they are never re-emitted.
    async fn seed_frontier(&self, recall: &RecallOutcome) -> Result<(Vec<FrontierNode>, HashSet<NodeId>)> {
        let mut entity_ids: Vec<String> = recall.key_final.iter().map(|k| k.id.clone()).collect();
        for attached in recall.event_entities.values() {
            for id in attached {
                if !entity_ids.contains(id) {
                    entity_ids.push(id.clone());
                }
            }
        }
        let entity_map = self.fetch_entities(&entity_ids).await?;

        let mut frontier = Vec::new();
        let mut visited = HashSet::new();

        for key in &recall.key_final {
            let node = NodeId::Entity(key.id.clone());
            if !visited.insert(node.clone()) {
                continue;
            }
            let Some(entity) = entity_map.get(&key.id) else { continue };
            let profile = EntityProfile::from_entities([entity], self.normalizer.as_ref());
            frontier.push(FrontierNode {
                node,
                origin: Arc::new(profile),
                weight: key.weight.max(1.0e-6),
            });
        }

        for event_id in &recall.filtered_events {
            let node = NodeId::Event(event_id.clone());
            if !visited.insert(node.clone()) {
                continue;
            }
            let attached = recall
                .event_entities
                .get(event_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let profile = EntityProfile::from_entities(
                attached.iter().filter_map(|id| entity_map.get(id)),
                self.normalizer.as_ref(),
            );
            frontier.push(FrontierNode {
                node,
                origin: Arc::new(profile),
                weight: recall.event_weights.get(event_id).copied().unwrap_or(1.0),
            });
        }

        Ok((frontier, visited))
    }

    /// One hop: concurrent neighbor-list fetch per frontier node, then a
    /// single-threaded merge that owns the visited set.
    async fn advance_hop(
        &self,
        frontier: &[FrontierNode],
        visited: &mut HashSet<NodeId>,
        outcome: &mut ExpandOutcome,
        hop: u32,
        config: &SearchConfig,
    ) -> Result<Vec<FrontierNode>> {
        let neighbor_lists = join_all(frontier.iter().map(|item| async {
            match &item.node {
                NodeId::Entity(id) => {
                    let events = self.graph.events_for_entity(id).await?;
                    Ok::<Vec<NodeId>, crate::core::error::MnemoraError>(
                        events.into_iter().map(NodeId::Event).collect(),
                    )
                }
                NodeId::Event(id) => {
                    let entities = self.graph.entities_for_event(id).await?;
                    Ok(entities.into_iter().map(NodeId::Entity).collect())
                }
            }
        }))
        .await;

        let mut fetched: Vec<(usize, Vec<NodeId>)> = Vec::with_capacity(frontier.len());
        for (idx, list) in neighbor_lists.into_iter().enumerate() {
            fetched.push((idx, list?));
        }

        // Prefetch every record this hop might need in two batch calls.
        let (entity_map, event_profiles) = self.fetch_neighbor_profiles(&fetched, config).await?;

        let mut next_frontier = Vec::new();
        let mut admitted_this_hop = Vec::new();

        for (idx, neighbors) in &fetched {
            let parent = &frontier[*idx];

            let mut admissible: Vec<(NodeId, f64)> = Vec::new();
            for neighbor in neighbors {
                if visited.contains(neighbor) {
                    continue;
                }
                let source_id = config.source_id.as_deref();
                let relevance = match neighbor {
                    NodeId::Entity(id) => match entity_map.get(id) {
                        Some(entity) => {
                            let profile =
                                EntityProfile::from_entities([entity], self.normalizer.as_ref());
                            dimension_relevance(&profile, &parent.origin, &self.registry, source_id)
                        }
                        None => continue,
                    },
                    NodeId::Event(id) => match event_profiles.get(id) {
                        Some(profile) => {
                            dimension_relevance(profile, &parent.origin, &self.registry, source_id)
                        }
                        None => continue,
                    },
                };
                if relevance >= config.expand_threshold {
                    admissible.push((neighbor.clone(), relevance));
                }
            }

            // Per-node breadth cap: strongest first, stable over the
            // neighbor discovery order.
            admissible.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            admissible.truncate(config.breadth_per_hop);

            for (node, relevance) in admissible {
                if !visited.insert(node.clone()) {
                    continue;
                }
                let weight = parent.weight * relevance;
                outcome.clues.push(Clue::new(
                    ClueStage::Expand,
                    parent.node.to_string(),
                    node.to_string(),
                    relevance,
                ));
                outcome.node_weights.insert(node.clone(), weight);
                admitted_this_hop.push(node.clone());
                next_frontier.push(FrontierNode {
                    node,
                    origin: parent.origin.clone(),
                    weight,
                });
            }
        }

        if !admitted_this_hop.is_empty() {
            debug!("Hop {}: admitted {} nodes", hop, admitted_this_hop.len());
            outcome.hops.insert(hop, admitted_this_hop);
        }

        Ok(next_frontier)
    }

    /// Batch-fetches the entities and event profiles a hop's candidate
    /// neighbors need, applying the source scope to events.
    async fn fetch_neighbor_profiles(
        &self,
        fetched: &[(usize, Vec<NodeId>)],
        config: &SearchConfig,
    ) -> Result<(HashMap<String, Entity>, HashMap<String, Arc<EntityProfile>>)> {
        let mut entity_ids = Vec::new();
        let mut event_ids = Vec::new();
        let mut seen = HashSet::new();
        for (_, neighbors) in fetched {
            for neighbor in neighbors {
                if !seen.insert(neighbor.clone()) {
                    continue;
                }
                match neighbor {
                    NodeId::Entity(id) => entity_ids.push(id.clone()),
                    NodeId::Event(id) => event_ids.push(id.clone()),
                }
            }
        }

        let events = self.graph.events_by_ids(&event_ids).await?;
        let events: Vec<_> = match &config.source_id {
            Some(source) => events.into_iter().filter(|e| &e.source_id == source).collect(),
            None => events,
        };

        for event in &events {
            for id in &event.entity_ids {
                if !entity_ids.contains(id) {
                    entity_ids.push(id.clone());
                }
            }
        }
        let entity_map = self.fetch_entities(&entity_ids).await?;

        let mut event_profiles = HashMap::new();
        for event in events {
            let profile = EntityProfile::from_entities(
                event.entity_ids.iter().filter_map(|id| entity_map.get(id)),
                self.normalizer.as_ref(),
            );
            event_profiles.insert(event.id, Arc::new(profile));
        }

        Ok((entity_map, event_profiles))
    }

    async fn fetch_entities(&self, ids: &[String]) -> Result<HashMap<String, Entity>> {
        let entities = self.graph.entities_by_ids(ids).await?;
        Ok(entities.into_iter().map(|e| (e.id.clone(), e)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::{EntityKind, Event};
    use crate::graph::store::InMemoryGraph;
    use crate::search::normalize::SynonymNormalizer;
    use crate::search::recall::ScoredKey;
    use chrono::Utc;

    fn entity(id: &str, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            kind: EntityKind::Topic,
            name: name.to_string(),
            normalized_name: name.to_lowercase(),
            embedding: None,
        }
    }

    fn event(id: &str, entity_ids: &[&str]) -> Event {
        Event {
            id: id.to_string(),
            source_id: "src".to_string(),
            title: id.to_string(),
            content: String::new(),
            embedding: vec![1.0, 0.0],
            created_at: Utc::now(),
            entity_ids: entity_ids.iter().map(|s| s.to_string()).collect(),
            section_id: None,
        }
    }

    /// Chain: seed event a, k1, event b, k2, event c, all on one topic so
    /// every neighbor passes the relevance threshold.
    fn chain_graph() -> Arc<InMemoryGraph> {
        let graph = Arc::new(InMemoryGraph::new());
        graph.insert_entity(entity("k1", "rust"));
        graph.insert_entity(entity("k2", "rust"));
        graph.insert_event(event("a", &["k1"]));
        graph.insert_event(event("b", &["k1", "k2"]));
        graph.insert_event(event("c", &["k2"]));
        graph
    }

    fn seed_from() -> RecallOutcome {
        let mut recall = RecallOutcome::default();
        recall.key_final = vec![ScoredKey {
            id: "k1".to_string(),
            weight: 1.0,
        }];
        recall.filtered_events = vec!["a".to_string()];
        recall.event_weights.insert("a".to_string(), 1.0);
        recall
            .event_entities
            .insert("a".to_string(), vec!["k1".to_string()]);
        recall
    }

    fn engine(graph: Arc<InMemoryGraph>) -> ExpandEngine {
        ExpandEngine::new(
            graph,
            Arc::new(TypeRegistry::with_defaults()),
            Arc::new(SynonymNormalizer::new()),
        )
    }

    #[tokio::test]
    async fn test_no_node_emitted_twice() {
        let graph = chain_graph();
        let recall = seed_from();
        let engine = engine(graph);

        let config = SearchConfig {
            max_depth: 4,
            breadth_per_hop: 5,
            expand_threshold: 0.1,
            ..Default::default()
        };
        let outcome = engine.expand(&recall, &config).await.unwrap();

        let mut seen = HashSet::new();
        for nodes in outcome.hops.values() {
            for node in nodes {
                assert!(seen.insert(node.clone()), "node {} emitted twice", node);
            }
        }
        // Seeds never reappear in the expansion output.
        assert!(!seen.contains(&NodeId::Event("a".to_string())));
        assert!(!seen.contains(&NodeId::Entity("k1".to_string())));
        assert!(outcome.hops_used <= config.max_depth);
    }

    #[tokio::test]
    async fn test_reaches_chain_within_depth() {
        let graph = chain_graph();
        let recall = seed_from();
        let engine = engine(graph);

        let config = SearchConfig {
            max_depth: 3,
            breadth_per_hop: 5,
            expand_threshold: 0.1,
            ..Default::default()
        };
        let outcome = engine.expand(&recall, &config).await.unwrap();

        // k1's events arrive at hop 1, k2 at hop 2, c at hop 3.
        assert!(outcome
            .hops
            .get(&1)
            .map(|nodes| nodes.contains(&NodeId::Event("b".to_string())))
            .unwrap_or(false));
        assert!(outcome
            .hops
            .get(&2)
            .map(|nodes| nodes.contains(&NodeId::Entity("k2".to_string())))
            .unwrap_or(false));
        assert!(outcome
            .hops
            .get(&3)
            .map(|nodes| nodes.contains(&NodeId::Event("c".to_string())))
            .unwrap_or(false));

        // Weight decays along the chain.
        let b = outcome.node_weights[&NodeId::Event("b".to_string())];
        let c = outcome.node_weights[&NodeId::Event("c".to_string())];
        assert!(b >= c);
    }

    #[tokio::test]
    async fn test_depth_zero_expands_nothing() {
        let graph = chain_graph();
        let recall = seed_from();
        let engine = engine(graph);

        let config = SearchConfig {
            max_depth: 0,
            ..Default::default()
        };
        let outcome = engine.expand(&recall, &config).await.unwrap();
        assert_eq!(outcome.node_count(), 0);
        assert_eq!(outcome.hops_used, 0);
    }

    #[tokio::test]
    async fn test_threshold_stops_traversal() {
        let graph = Arc::new(InMemoryGraph::new());
        graph.insert_entity(entity("k1", "rust"));
        graph.insert_entity(entity("k9", "gardening"));
        graph.insert_event(event("a", &["k1"]));
        // b's profile shares nothing with the origin beyond the linking key.
        graph.insert_event(event("b", &["k1", "k9"]));

        let mut recall = RecallOutcome::default();
        recall.filtered_events = vec!["a".to_string()];
        recall.event_weights.insert("a".to_string(), 1.0);
        recall
            .event_entities
            .insert("a".to_string(), vec!["k1".to_string()]);

        let engine = engine(graph);
        let config = SearchConfig {
            max_depth: 3,
            expand_threshold: 0.9,
            ..Default::default()
        };
        let outcome = engine.expand(&recall, &config).await.unwrap();

        // k1 matches the origin profile exactly (hop 1), but b's diluted
        // overlap falls below the threshold and the traversal stops.
        assert!(outcome
            .hops
            .get(&1)
            .map(|nodes| nodes.contains(&NodeId::Entity("k1".to_string())))
            .unwrap_or(false));
        assert!(!outcome
            .node_weights
            .contains_key(&NodeId::Event("b".to_string())));
    }

    #[tokio::test]
    async fn test_breadth_cap_bounds_fanout() {
        let graph = Arc::new(InMemoryGraph::new());
        graph.insert_entity(entity("k1", "rust"));
        for i in 0..10 {
            graph.insert_event(event(&format!("e{}", i), &["k1"]));
        }

        let mut recall = RecallOutcome::default();
        recall.key_final = vec![ScoredKey {
            id: "k1".to_string(),
            weight: 1.0,
        }];

        let engine = engine(graph);
        let breadth = 3;
        let depth = 2;
        let config = SearchConfig {
            max_depth: depth,
            breadth_per_hop: breadth,
            expand_threshold: 0.1,
            ..Default::default()
        };
        let outcome = engine.expand(&recall, &config).await.unwrap();

        // One seed: hop i admits at most breadth^i nodes.
        let mut frontier = 1usize;
        for hop in 1..=depth {
            frontier *= breadth;
            let admitted = outcome.hops.get(&hop).map(Vec::len).unwrap_or(0);
            assert!(admitted <= frontier, "hop {} admitted {} > {}", hop, admitted, frontier);
        }
        let bound: usize = (1..=depth).map(|i| breadth.pow(i)).sum();
        assert!(outcome.node_count() <= bound);
    }
}
