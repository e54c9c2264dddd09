
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{MnemoraError, Result};
use super::models::EntityKind;

/// Per-dimension configuration: how much the dimension contributes to
/// scoring and how similar a vector match must be to count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    pub kind: EntityKind,
    pub display_name: String,
    pub weight: f64,
    pub similarity_threshold: f64,
    /// Per-source weight overrides, keyed by source id.
    #[serde(default)]
    pub source_overrides: HashMap<String, f64>,
}

impl EntityTypeConfig {
    pub fn new(kind: EntityKind, display_name: &str, weight: f64, similarity_threshold: f64) -> Self {
        Self {
            kind,
            display_name: display_name.to_string(),
            weight,
            similarity_threshold,
            source_overrides: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.weight < 0.0 {
            return Err(MnemoraError::Validation(format!(
                "entity type {} has negative weight {}",
                self.kind, self.weight
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(MnemoraError::Validation(format!(
                "entity type {} has similarity threshold {} outside [0, 1]",
                self.kind, self.similarity_threshold
            )));
        }
        for (source, weight) in &self.source_overrides {
            if *weight < 0.0 {
                return Err(MnemoraError::Validation(format!(
                    "entity type {} has negative override {} for source {}",
                    self.kind, weight, source
                )));
            }
        }
        Ok(())
    }
}

/// The configured dimension set. Kinds absent from the registry fall back
/// to weight 1.0 and the caller-supplied key similarity threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRegistry {
    types: HashMap<EntityKind, EntityTypeConfig>,
}

pub const DEFAULT_TYPE_WEIGHTS: &[(&str, f64)] = &[
    ("time", 0.9),
    ("location", 1.0),
    ("person", 1.1),
    ("topic", 1.5),
    ("action", 1.0),
    ("tag", 0.8),
];

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, weight) in DEFAULT_TYPE_WEIGHTS {
            let kind = EntityKind::from(*name);
            registry.insert(EntityTypeConfig::new(
                kind,
                name,
                *weight,
                DEFAULT_SIMILARITY_THRESHOLD,
            ));
        }
        registry
    }

    pub fn insert(&mut self, config: EntityTypeConfig) {
        self.types.insert(config.kind.clone(), config);
    }

    pub fn get(&self, kind: &EntityKind) -> Option<&EntityTypeConfig> {
        self.types.get(kind)
    }

    pub fn contains(&self, kind: &EntityKind) -> bool {
        self.types.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &EntityKind> {
        self.types.keys()
    }

    pub fn weight(&self, kind: &EntityKind) -> f64 {
        self.types.get(kind).map_or(1.0, |t| t.weight)
    }

    /// Weight with the per-source override applied when one exists.
    pub fn weight_for_source(&self, kind: &EntityKind, source_id: Option<&str>) -> f64 {
        match (self.types.get(kind), source_id) {
            (Some(t), Some(source)) => t.source_overrides.get(source).copied().unwrap_or(t.weight),
            (Some(t), None) => t.weight,
            (None, _) => 1.0,
        }
    }

    pub fn threshold(&self, kind: &EntityKind, fallback: f64) -> f64 {
        self.types.get(kind).map_or(fallback, |t| t.similarity_threshold)
    }

    pub fn validate(&self) -> Result<()> {
        for config in self.types.values() {
            config.validate()?;
        }
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let registry = TypeRegistry::with_defaults();
        assert_eq!(registry.weight(&EntityKind::Topic), 1.5);
        assert_eq!(registry.weight(&EntityKind::Person), 1.1);
        assert_eq!(registry.weight(&EntityKind::Time), 0.9);
        // Unconfigured kinds fall back to 1.0.
        assert_eq!(registry.weight(&EntityKind::Custom("department".into())), 1.0);
    }

    #[test]
    fn test_source_override() {
        let mut registry = TypeRegistry::with_defaults();
        let mut config = EntityTypeConfig::new(EntityKind::Topic, "topic", 1.5, 0.6);
        config.source_overrides.insert("src-1".to_string(), 2.0);
        registry.insert(config);

        assert_eq!(registry.weight_for_source(&EntityKind::Topic, Some("src-1")), 2.0);
        assert_eq!(registry.weight_for_source(&EntityKind::Topic, Some("src-2")), 1.5);
        assert_eq!(registry.weight_for_source(&EntityKind::Topic, None), 1.5);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut registry = TypeRegistry::new();
        registry.insert(EntityTypeConfig::new(EntityKind::Topic, "topic", 1.5, 1.2));
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let config = EntityTypeConfig::new(EntityKind::Tag, "tag", -0.1, 0.5);
        assert!(config.validate().is_err());
    }
}
