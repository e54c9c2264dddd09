
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::graph::models::{Entity, EntityKind};
use crate::graph::types::TypeRegistry;
use super::normalize::NameNormalizer;

/// Blend between name overlap and embedding similarity when both sides
/// carry embeddings.
const JACCARD_SHARE: f64 = 0.6;
const EMBEDDING_SHARE: f64 = 0.4;

/// Final composite blend.
const RELEVANCE_SHARE: f64 = 0.3;
const VECTOR_SHARE: f64 = 0.3;
const DECAY_SHARE: f64 = 0.2;
const PREFERENCE_SHARE: f64 = 0.2;

pub const DEFAULT_DECAY_LAMBDA: f64 = 0.01;

/// Cosine similarity mapped into [0, 1].
pub fn cosine_similarity(vec1: &[f32], vec2: &[f32]) -> f64 {
    if vec1.is_empty() || vec2.is_empty() || vec1.len() != vec2.len() {
        return 0.0;
    }

    let dot_product: f32 = vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum();
    let mag1: f32 = vec1.iter().map(|a| a * a).sum::<f32>().sqrt();
    let mag2: f32 = vec2.iter().map(|b| b * b).sum::<f32>().sqrt();

    if mag1 == 0.0 || mag2 == 0.0 {
        return 0.0;
    }

    let similarity = f64::from(dot_product / (mag1 * mag2));
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// One dimension of an entity profile: the normalized names present plus
/// any embeddings that came with them.
#[derive(Debug, Clone, Default)]
pub struct ProfileDim {
    pub names: BTreeSet<String>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Per-node view of "which entities, per dimension". Events get the
/// profile of their attached entities; a lone entity is a single-dimension
/// profile of itself.
#[derive(Debug, Clone, Default)]
pub struct EntityProfile {
    pub dims: HashMap<EntityKind, ProfileDim>,
}

impl EntityProfile {
    pub fn from_entities<'a, I>(entities: I, normalizer: &dyn NameNormalizer) -> Self
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let mut profile = Self::default();
        for entity in entities {
            profile.add(entity, normalizer);
        }
        profile
    }

    pub fn add(&mut self, entity: &Entity, normalizer: &dyn NameNormalizer) {
        let dim = self.dims.entry(entity.kind.clone()).or_default();
        dim.names.insert(normalizer.normalize(&entity.kind, &entity.name));
        if let Some(embedding) = &entity.embedding {
            dim.embeddings.push(embedding.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn names(&self, kind: &EntityKind) -> Option<&BTreeSet<String>> {
        self.dims.get(kind).map(|d| &d.names)
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn max_pairwise_cosine(a: &[Vec<f32>], b: &[Vec<f32>]) -> f64 {
    let mut best = 0.0_f64;
    for va in a {
        for vb in b {
            best = best.max(cosine_similarity(va, vb));
        }
    }
    best
}

/// Multi-dimension entity-overlap relevance in [0, 1]. Dimensions absent
/// on either side contribute neither to the numerator nor the denominator.
/// Dimension weights honor the registry's per-source overrides when the
/// query is scoped to a source.
pub fn dimension_relevance(
    a: &EntityProfile,
    b: &EntityProfile,
    registry: &TypeRegistry,
    source_id: Option<&str>,
) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for (kind, dim_a) in &a.dims {
        let Some(dim_b) = b.dims.get(kind) else { continue };

        let name_sim = jaccard(&dim_a.names, &dim_b.names);
        let similarity = if !dim_a.embeddings.is_empty() && !dim_b.embeddings.is_empty() {
            JACCARD_SHARE * name_sim
                + EMBEDDING_SHARE * max_pairwise_cosine(&dim_a.embeddings, &dim_b.embeddings)
        } else {
            name_sim
        };

        let weight = registry.weight_for_source(kind, source_id);
        numerator += weight * similarity;
        denominator += weight;
    }

    if denominator == 0.0 {
        0.0
    } else {
        (numerator / denominator).clamp(0.0, 1.0)
    }
}

/// `exp(-λ × days_since_created)`, clamped into [0, 1].
pub fn time_decay(created_at: DateTime<Utc>, now: DateTime<Utc>, lambda: f64) -> f64 {
    let days = now.signed_duration_since(created_at).num_seconds() as f64 / 86400.0;
    let days = days.max(0.0);
    (-lambda * days).exp().clamp(0.0, 1.0)
}

/// Base 0.5, +0.3 when topics intersect the caller's focus set, +0.2 when
/// tags do, capped at 1.0. The focus set is expected pre-normalized.
pub fn preference_score(profile: &EntityProfile, focus: &BTreeSet<String>) -> f64 {
    let mut score = 0.5;
    if focus.is_empty() {
        return score;
    }
    if let Some(topics) = profile.names(&EntityKind::Topic) {
        if topics.intersection(focus).next().is_some() {
            score += 0.3;
        }
    }
    if let Some(tags) = profile.names(&EntityKind::Tag) {
        if tags.intersection(focus).next().is_some() {
            score += 0.2;
        }
    }
    score.min(1.0)
}

/// `0.3·relevance + 0.3·vector + 0.2·decay + 0.2·preference`.
pub fn final_score(relevance: f64, vector_sim: f64, decay: f64, preference: f64) -> f64 {
    RELEVANCE_SHARE * relevance
        + VECTOR_SHARE * vector_sim
        + DECAY_SHARE * decay
        + PREFERENCE_SHARE * preference
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::normalize::SynonymNormalizer;

    fn entity(id: &str, kind: EntityKind, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            normalized_name: name.to_lowercase(),
            embedding: None,
        }
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        // Orthogonal maps to the midpoint of [0, 1].
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_worked_topic_overlap_example() {
        // Event A topics {"大模型", "微调"}, event B topics
        // {"LLM", "微调", "训练"}; with the llm→大模型 alias the normalized
        // sets intersect in 2 of 3 names, and with a single overlapping
        // dimension the type weight cancels out.
        let normalizer = SynonymNormalizer::new();
        let registry = TypeRegistry::with_defaults();

        let a = EntityProfile::from_entities(
            [
                &entity("k1", EntityKind::Topic, "大模型"),
                &entity("k2", EntityKind::Topic, "微调"),
            ],
            &normalizer,
        );
        let b = EntityProfile::from_entities(
            [
                &entity("k3", EntityKind::Topic, "LLM"),
                &entity("k4", EntityKind::Topic, "微调"),
                &entity("k5", EntityKind::Topic, "训练"),
            ],
            &normalizer,
        );

        let relevance = dimension_relevance(&a, &b, &registry, None);
        assert!((relevance - 2.0 / 3.0).abs() < 0.01, "got {}", relevance);
    }

    #[test]
    fn test_disjoint_dimensions_do_not_contribute() {
        let normalizer = SynonymNormalizer::new();
        let registry = TypeRegistry::with_defaults();

        let a = EntityProfile::from_entities(
            [
                &entity("k1", EntityKind::Topic, "rust"),
                &entity("k2", EntityKind::Person, "alice"),
            ],
            &normalizer,
        );
        let b = EntityProfile::from_entities([&entity("k3", EntityKind::Topic, "rust")], &normalizer);

        // Person exists only on one side, so relevance is pure topic overlap.
        assert!((dimension_relevance(&a, &b, &registry, None) - 1.0).abs() < 1e-9);

        let c = EntityProfile::from_entities([&entity("k4", EntityKind::Time, "2024-01-01")], &normalizer);
        assert_eq!(dimension_relevance(&a, &c, &registry, None), 0.0);
    }

    #[test]
    fn test_source_override_changes_relevance() {
        let normalizer = SynonymNormalizer::new();
        let mut registry = TypeRegistry::with_defaults();
        let mut topic = crate::graph::types::EntityTypeConfig::new(EntityKind::Topic, "topic", 1.5, 0.6);
        topic.source_overrides.insert("src-1".to_string(), 3.0);
        registry.insert(topic);

        // Topics match fully, persons not at all: shifting the topic
        // weight moves the normalized blend.
        let a = EntityProfile::from_entities(
            [
                &entity("k1", EntityKind::Topic, "rust"),
                &entity("k2", EntityKind::Person, "alice"),
            ],
            &normalizer,
        );
        let b = EntityProfile::from_entities(
            [
                &entity("k3", EntityKind::Topic, "rust"),
                &entity("k4", EntityKind::Person, "bob"),
            ],
            &normalizer,
        );

        let unscoped = dimension_relevance(&a, &b, &registry, None);
        let scoped = dimension_relevance(&a, &b, &registry, Some("src-1"));
        assert!((unscoped - 1.5 / 2.6).abs() < 1e-9, "got {}", unscoped);
        assert!((scoped - 3.0 / 4.1).abs() < 1e-9, "got {}", scoped);
        assert!(scoped > unscoped);
        // Other sources keep the base weight.
        let other = dimension_relevance(&a, &b, &registry, Some("src-2"));
        assert!((other - unscoped).abs() < 1e-9);
    }

    #[test]
    fn test_time_decay() {
        let now = Utc::now();
        assert!((time_decay(now, now, DEFAULT_DECAY_LAMBDA) - 1.0).abs() < 1e-6);

        let hundred_days_ago = now - chrono::Duration::days(100);
        let decayed = time_decay(hundred_days_ago, now, DEFAULT_DECAY_LAMBDA);
        assert!((decayed - (-1.0_f64).exp()).abs() < 0.001);

        // Future timestamps do not boost above 1.
        let tomorrow = now + chrono::Duration::days(1);
        assert_eq!(time_decay(tomorrow, now, DEFAULT_DECAY_LAMBDA), 1.0);
    }

    #[test]
    fn test_preference_score() {
        let normalizer = SynonymNormalizer::new();
        let profile = EntityProfile::from_entities(
            [
                &entity("k1", EntityKind::Topic, "rust"),
                &entity("k2", EntityKind::Tag, "backend"),
            ],
            &normalizer,
        );

        let empty = BTreeSet::new();
        assert_eq!(preference_score(&profile, &empty), 0.5);

        let topic_focus: BTreeSet<String> = ["rust".to_string()].into();
        assert!((preference_score(&profile, &topic_focus) - 0.8).abs() < 1e-9);

        let both: BTreeSet<String> = ["rust".to_string(), "backend".to_string()].into();
        assert!((preference_score(&profile, &both) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_final_score_blend() {
        let score = final_score(1.0, 1.0, 1.0, 1.0);
        assert!((score - 1.0).abs() < 1e-9);
        assert!((final_score(0.5, 0.5, 0.0, 0.0) - 0.3).abs() < 1e-9);
    }
}
