
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::graph::models::EntityKind;
use crate::search::scoring::cosine_similarity;

/// Which embedding space a nearest-neighbor search runs over. Sections
/// are never searched by vector; they only enter as the output join of
/// paragraph-mode reranking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexSpace {
    Entity(EntityKind),
    Event,
}

impl std::fmt::Display for IndexSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity(kind) => write!(f, "entity/{}", kind),
            Self::Event => write!(f, "event"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f64,
}

/// Nearest-neighbor search over entity and event embeddings, plus the
/// exact entity→event join used by recall step 2.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-k by similarity, descending, deterministic tie-break.
    async fn search_similar(&self, space: IndexSpace, vector: &[f32], top_k: usize) -> Result<Vec<ScoredId>>;

    /// All event ids attached to any of the given entities, first-seen
    /// order, no similarity involved.
    async fn exact_lookup(&self, entity_ids: &[String]) -> Result<Vec<String>>;
}

#[async_trait]
impl VectorIndex for Arc<dyn VectorIndex> {
    async fn search_similar(&self, space: IndexSpace, vector: &[f32], top_k: usize) -> Result<Vec<ScoredId>> {
        (**self).search_similar(space, vector, top_k).await
    }

    async fn exact_lookup(&self, entity_ids: &[String]) -> Result<Vec<String>> {
        (**self).exact_lookup(entity_ids).await
    }
}

#[derive(Default)]
struct IndexData {
    spaces: HashMap<IndexSpace, Vec<(String, Vec<f32>)>>,
    entity_events: HashMap<String, Vec<String>>,
}

/// Brute-force in-memory index for tests and the demo binary. Insertion
/// order is the tie-break order, so results are fully deterministic.
#[derive(Default)]
pub struct InMemoryIndex {
    data: RwLock<IndexData>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, space: IndexSpace, id: impl Into<String>, vector: Vec<f32>) {
        self.data
            .write()
            .spaces
            .entry(space)
            .or_default()
            .push((id.into(), vector));
    }

    /// Registers the entity→event edges served by `exact_lookup`.
    pub fn link(&self, entity_id: impl Into<String>, event_id: impl Into<String>) {
        let mut data = self.data.write();
        let events = data.entity_events.entry(entity_id.into()).or_default();
        let event_id = event_id.into();
        if !events.contains(&event_id) {
            events.push(event_id);
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search_similar(&self, space: IndexSpace, vector: &[f32], top_k: usize) -> Result<Vec<ScoredId>> {
        let data = self.data.read();
        let entries = match data.spaces.get(&space) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        let mut scored: Vec<ScoredId> = entries
            .iter()
            .map(|(id, candidate)| ScoredId {
                id: id.clone(),
                score: cosine_similarity(vector, candidate),
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn exact_lookup(&self, entity_ids: &[String]) -> Result<Vec<String>> {
        let data = self.data.read();
        let mut seen = std::collections::HashSet::new();
        let mut events = Vec::new();
        for entity_id in entity_ids {
            if let Some(attached) = data.entity_events.get(entity_id) {
                for event_id in attached {
                    if seen.insert(event_id.clone()) {
                        events.push(event_id.clone());
                    }
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = InMemoryIndex::new();
        index.insert(IndexSpace::Event, "far", vec![0.0, 1.0]);
        index.insert(IndexSpace::Event, "near", vec![1.0, 0.0]);
        index.insert(IndexSpace::Event, "mid", vec![1.0, 1.0]);

        let hits = index
            .search_similar(IndexSpace::Event, &[1.0, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[1].id, "mid");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_spaces_are_isolated() {
        let index = InMemoryIndex::new();
        index.insert(IndexSpace::Entity(EntityKind::Topic), "k1", vec![1.0, 0.0]);

        let events = index
            .search_similar(IndexSpace::Event, &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert!(events.is_empty());

        let topics = index
            .search_similar(IndexSpace::Entity(EntityKind::Topic), &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(topics.len(), 1);
    }

    #[tokio::test]
    async fn test_exact_lookup_first_seen_order() {
        let index = InMemoryIndex::new();
        index.link("k1", "a");
        index.link("k1", "b");
        index.link("k2", "b");
        index.link("k2", "c");

        let events = index
            .exact_lookup(&["k1".to_string(), "k2".to_string()])
            .await
            .unwrap();
        assert_eq!(events, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
