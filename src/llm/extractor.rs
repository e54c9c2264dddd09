
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::{MnemoraError, Result};
use crate::graph::models::EntityKind;
use crate::graph::types::TypeRegistry;
use super::provider::LlmProvider;

/// Minimum confidence for an attribute to survive validation.
const MIN_CONFIDENCE: f64 = 0.1;

/// A typed query attribute candidate, already schema-validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedAttribute {
    pub kind: EntityKind,
    pub name: String,
    pub confidence: f64,
}

/// Turns query text into typed candidate attributes. Implementations must
/// return an empty set rather than garbage when the backing model fails to
/// produce well-formed output; hard failures (unreachable provider) are
/// errors so the pipeline can decide between aborting and degrading.
#[async_trait]
pub trait AttributeExtractor: Send + Sync {
    async fn extract(&self, query: &str, registry: &TypeRegistry) -> Result<Vec<ExtractedAttribute>>;
}

#[async_trait]
impl AttributeExtractor for Arc<dyn AttributeExtractor> {
    async fn extract(&self, query: &str, registry: &TypeRegistry) -> Result<Vec<ExtractedAttribute>> {
        (**self).extract(query, registry).await
    }
}

/// Raw record as emitted by the LLM, before validation.
#[derive(Debug, Deserialize)]
struct RawAttribute {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

/// Validates raw LLM records against the registry: unknown dimensions,
/// empty names and out-of-range confidences are rejected, not duck-typed.
fn validate_attributes(raw: Vec<RawAttribute>, registry: &TypeRegistry) -> Vec<ExtractedAttribute> {
    let mut attributes = Vec::new();
    for entry in raw {
        let name = entry.name.trim();
        if name.is_empty() {
            warn!("Rejecting attribute with empty name (type={})", entry.kind);
            continue;
        }
        if !(0.0..=1.0).contains(&entry.confidence) {
            warn!(
                "Rejecting attribute '{}' with confidence {} outside [0, 1]",
                name, entry.confidence
            );
            continue;
        }
        if entry.confidence < MIN_CONFIDENCE {
            debug!("Dropping low-confidence attribute '{}' ({})", name, entry.confidence);
            continue;
        }
        let kind = EntityKind::from(entry.kind.as_str());
        if !registry.contains(&kind) {
            warn!("Rejecting attribute '{}' with unconfigured type '{}'", name, entry.kind);
            continue;
        }
        attributes.push(ExtractedAttribute {
            kind,
            name: name.to_string(),
            confidence: entry.confidence,
        });
    }
    attributes
}

/// LLM-backed extractor with strict JSON schema validation.
pub struct LlmAttributeExtractor<P: LlmProvider> {
    provider: P,
}

impl<P: LlmProvider> LlmAttributeExtractor<P> {
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn build_system_prompt(&self, registry: &TypeRegistry) -> String {
        let mut kinds: Vec<String> = registry.kinds().map(|k| k.to_string()).collect();
        kinds.sort();

        format!(
            r#"You are a query analysis system. Extract the typed attributes a retrieval
engine should match against.

Allowed types: {}

Output JSON with this structure:
{{
  "attributes": [
    {{"type": "topic", "name": "attribute name", "confidence": 0.9}}
  ]
}}

Rules: confidence is a number in [0, 1]; only use the allowed types; extract
short, atomic attribute names; output nothing but the JSON object."#,
            kinds.join(", ")
        )
    }
}

#[async_trait]
impl<P: LlmProvider> AttributeExtractor for LlmAttributeExtractor<P> {
    async fn extract(&self, query: &str, registry: &TypeRegistry) -> Result<Vec<ExtractedAttribute>> {
        let system_prompt = self.build_system_prompt(registry);
        let user_prompt = format!("Extract attributes from this query:\n\n{}", query);

        let (response, _metadata) = self
            .provider
            .generate(&system_prompt, &user_prompt, Some("json_object"))
            .await
            .map_err(|e| MnemoraError::Extraction(e.to_string()))?;

        match serde_json::from_str::<RawExtraction>(&response) {
            Ok(raw) => {
                let attributes = validate_attributes(raw.attributes, registry);
                debug!("Extracted {} validated attributes", attributes.len());
                Ok(attributes)
            }
            Err(e) => {
                warn!("Failed to parse extraction output: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

lazy_static! {
    static ref DATE_PATTERN: Regex =
        Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{4}年\d{1,2}月(\d{1,2}日)?|today|yesterday|昨天|今天)\b")
            .expect("valid date pattern");
    static ref TAG_PATTERN: Regex = Regex::new(r"#([\w\p{Han}-]+)").expect("valid tag pattern");
    static ref MENTION_PATTERN: Regex = Regex::new(r"@([\w\p{Han}.-]+)").expect("valid mention pattern");
    static ref TOKEN_PATTERN: Regex = Regex::new(r"[\w\p{Han}]{2,}").expect("valid token pattern");
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "about", "what", "when", "where", "who", "how",
    "did", "was", "were", "have", "has", "this", "that", "from", "into",
];

/// Offline fallback extractor: regex over dates, tags, mentions, and the
/// remaining significant tokens as topic candidates. No network calls, so
/// it can never time out.
pub struct PatternAttributeExtractor;

#[async_trait]
impl AttributeExtractor for PatternAttributeExtractor {
    async fn extract(&self, query: &str, registry: &TypeRegistry) -> Result<Vec<ExtractedAttribute>> {
        let mut raw = Vec::new();

        for m in DATE_PATTERN.find_iter(query) {
            raw.push(RawAttribute {
                kind: "time".to_string(),
                name: m.as_str().to_string(),
                confidence: 0.9,
            });
        }
        for c in TAG_PATTERN.captures_iter(query) {
            raw.push(RawAttribute {
                kind: "tag".to_string(),
                name: c[1].to_string(),
                confidence: 0.9,
            });
        }
        for c in MENTION_PATTERN.captures_iter(query) {
            raw.push(RawAttribute {
                kind: "person".to_string(),
                name: c[1].to_string(),
                confidence: 0.8,
            });
        }
        for m in TOKEN_PATTERN.find_iter(query) {
            let token = m.as_str();
            let lower = token.to_lowercase();
            if STOPWORDS.contains(&lower.as_str()) || DATE_PATTERN.is_match(token) {
                continue;
            }
            raw.push(RawAttribute {
                kind: "topic".to_string(),
                name: token.to_string(),
                confidence: 0.5,
            });
        }

        Ok(validate_attributes(raw, registry))
    }
}

/// Fixed-output extractor for tests and the demo binary.
pub struct StaticAttributeExtractor {
    attributes: Vec<ExtractedAttribute>,
}

impl StaticAttributeExtractor {
    pub fn new(attributes: Vec<ExtractedAttribute>) -> Self {
        Self { attributes }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl AttributeExtractor for StaticAttributeExtractor {
    async fn extract(&self, _query: &str, registry: &TypeRegistry) -> Result<Vec<ExtractedAttribute>> {
        Ok(self
            .attributes
            .iter()
            .filter(|a| registry.contains(&a.kind))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejects_malformed() {
        let registry = TypeRegistry::with_defaults();
        let raw = vec![
            RawAttribute {
                kind: "topic".to_string(),
                name: "rust".to_string(),
                confidence: 0.9,
            },
            RawAttribute {
                kind: "topic".to_string(),
                name: "  ".to_string(),
                confidence: 0.9,
            },
            RawAttribute {
                kind: "topic".to_string(),
                name: "overconfident".to_string(),
                confidence: 1.5,
            },
            RawAttribute {
                kind: "galaxy".to_string(),
                name: "andromeda".to_string(),
                confidence: 0.9,
            },
            RawAttribute {
                kind: "topic".to_string(),
                name: "noise".to_string(),
                confidence: 0.05,
            },
        ];

        let validated = validate_attributes(raw, &registry);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].name, "rust");
        assert_eq!(validated[0].kind, EntityKind::Topic);
    }

    #[tokio::test]
    async fn test_pattern_extractor_finds_dates_and_tags() {
        let registry = TypeRegistry::with_defaults();
        let attributes = PatternAttributeExtractor
            .extract("what did @alice ship on 2024-03-01 #release", &registry)
            .await
            .unwrap();

        assert!(attributes
            .iter()
            .any(|a| a.kind == EntityKind::Time && a.name == "2024-03-01"));
        assert!(attributes
            .iter()
            .any(|a| a.kind == EntityKind::Tag && a.name == "release"));
        assert!(attributes
            .iter()
            .any(|a| a.kind == EntityKind::Person && a.name == "alice"));
        assert!(attributes
            .iter()
            .any(|a| a.kind == EntityKind::Topic && a.name == "ship"));
        // Stopwords never become topics.
        assert!(!attributes.iter().any(|a| a.name == "what"));
    }

    #[tokio::test]
    async fn test_static_extractor_respects_registry() {
        let registry = TypeRegistry::with_defaults();
        let extractor = StaticAttributeExtractor::new(vec![
            ExtractedAttribute {
                kind: EntityKind::Topic,
                name: "rust".to_string(),
                confidence: 0.9,
            },
            ExtractedAttribute {
                kind: EntityKind::Custom("galaxy".to_string()),
                name: "andromeda".to_string(),
                confidence: 0.9,
            },
        ]);

        let attributes = extractor.extract("anything", &registry).await.unwrap();
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].name, "rust");
    }
}
