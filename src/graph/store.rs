
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::error::Result;
use super::models::{Entity, Event, Section};

/// Read-only view of the persistent entity–event graph. Implementations
/// must never be mutated by the retrieval engine; all per-query weight
/// state lives in maps owned by the query.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Batch fetch, returned in request order; missing ids are skipped.
    async fn events_by_ids(&self, ids: &[String]) -> Result<Vec<Event>>;

    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>>;

    async fn sections_by_ids(&self, ids: &[String]) -> Result<Vec<Section>>;

    /// Events attached to an entity, in insertion order.
    async fn events_for_entity(&self, entity_id: &str) -> Result<Vec<String>>;

    /// Entities attached to an event, in insertion order.
    async fn entities_for_event(&self, event_id: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl GraphStore for Arc<dyn GraphStore> {
    async fn events_by_ids(&self, ids: &[String]) -> Result<Vec<Event>> {
        (**self).events_by_ids(ids).await
    }

    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>> {
        (**self).entities_by_ids(ids).await
    }

    async fn sections_by_ids(&self, ids: &[String]) -> Result<Vec<Section>> {
        (**self).sections_by_ids(ids).await
    }

    async fn events_for_entity(&self, entity_id: &str) -> Result<Vec<String>> {
        (**self).events_for_entity(entity_id).await
    }

    async fn entities_for_event(&self, event_id: &str) -> Result<Vec<String>> {
        (**self).entities_for_event(event_id).await
    }
}

#[derive(Default)]
struct GraphData {
    events: HashMap<String, Event>,
    entities: HashMap<String, Entity>,
    sections: HashMap<String, Section>,
    entity_events: HashMap<String, Vec<String>>,
    event_entities: HashMap<String, Vec<String>>,
}

/// Deterministic in-memory graph for tests and the demo binary. Writes
/// happen only while the graph is being seeded; retrieval holds read locks.
#[derive(Default)]
pub struct InMemoryGraph {
    data: RwLock<GraphData>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entity(&self, entity: Entity) {
        let mut data = self.data.write();
        data.entity_events.entry(entity.id.clone()).or_default();
        data.entities.insert(entity.id.clone(), entity);
    }

    /// Inserts an event and wires its entity edges both ways.
    pub fn insert_event(&self, event: Event) {
        let mut data = self.data.write();
        for entity_id in &event.entity_ids {
            let attached = data.entity_events.entry(entity_id.clone()).or_default();
            if !attached.contains(&event.id) {
                attached.push(event.id.clone());
            }
        }
        data.event_entities.insert(event.id.clone(), event.entity_ids.clone());
        data.events.insert(event.id.clone(), event);
    }

    pub fn insert_section(&self, section: Section) {
        self.data.write().sections.insert(section.id.clone(), section);
    }

    pub fn event_count(&self) -> usize {
        self.data.read().events.len()
    }

    pub fn entity_count(&self) -> usize {
        self.data.read().entities.len()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn events_by_ids(&self, ids: &[String]) -> Result<Vec<Event>> {
        let data = self.data.read();
        Ok(ids.iter().filter_map(|id| data.events.get(id).cloned()).collect())
    }

    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>> {
        let data = self.data.read();
        Ok(ids.iter().filter_map(|id| data.entities.get(id).cloned()).collect())
    }

    async fn sections_by_ids(&self, ids: &[String]) -> Result<Vec<Section>> {
        let data = self.data.read();
        Ok(ids.iter().filter_map(|id| data.sections.get(id).cloned()).collect())
    }

    async fn events_for_entity(&self, entity_id: &str) -> Result<Vec<String>> {
        let data = self.data.read();
        Ok(data.entity_events.get(entity_id).cloned().unwrap_or_default())
    }

    async fn entities_for_event(&self, event_id: &str) -> Result<Vec<String>> {
        let data = self.data.read();
        Ok(data.event_entities.get(event_id).cloned().unwrap_or_default())
    }
}
