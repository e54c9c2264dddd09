
use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::graph::models::EntityKind;

/// Entity-name normalization seam. The engines only compare normalized
/// names, so swapping this out changes every overlap computation.
pub trait NameNormalizer: Send + Sync {
    fn normalize(&self, kind: &EntityKind, name: &str) -> String;
}

impl NameNormalizer for Arc<dyn NameNormalizer> {
    fn normalize(&self, kind: &EntityKind, name: &str) -> String {
        (**self).normalize(kind, name)
    }
}

lazy_static! {
    static ref DEFAULT_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("llm", "大模型");
        m.insert("large language model", "大模型");
        m.insert("fine-tuning", "微调");
        m.insert("finetuning", "微调");
        m.insert("ml", "machine learning");
        m.insert("ai", "artificial intelligence");
        m.insert("k8s", "kubernetes");
        m.insert("js", "javascript");
        m.insert("ts", "typescript");
        m.insert("py", "python");
        m
    };
}

/// Default normalizer: lowercase, trim, collapse inner whitespace, then a
/// replaceable alias lookup.
pub struct SynonymNormalizer {
    aliases: HashMap<String, String>,
}

impl SynonymNormalizer {
    pub fn new() -> Self {
        Self {
            aliases: DEFAULT_ALIASES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Replaces the whole alias table.
    pub fn with_aliases(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn add_alias(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.aliases.insert(from.into().to_lowercase(), to.into());
    }

    fn canonical(&self, name: &str) -> String {
        let folded = name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match self.aliases.get(&folded) {
            Some(alias) => alias.clone(),
            None => folded,
        }
    }
}

impl Default for SynonymNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NameNormalizer for SynonymNormalizer {
    fn normalize(&self, _kind: &EntityKind, name: &str) -> String {
        self.canonical(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_lookup() {
        let normalizer = SynonymNormalizer::new();
        assert_eq!(normalizer.normalize(&EntityKind::Topic, "LLM"), "大模型");
        assert_eq!(
            normalizer.normalize(&EntityKind::Topic, "Large  Language Model"),
            "大模型"
        );
        assert_eq!(normalizer.normalize(&EntityKind::Topic, "微调"), "微调");
    }

    #[test]
    fn test_case_and_whitespace_folding() {
        let normalizer = SynonymNormalizer::new();
        assert_eq!(normalizer.normalize(&EntityKind::Person, "  Alice  Chen "), "alice chen");
    }

    #[test]
    fn test_replaceable_table() {
        let mut aliases = HashMap::new();
        aliases.insert("gpu".to_string(), "graphics processor".to_string());
        let normalizer = SynonymNormalizer::with_aliases(aliases);
        assert_eq!(
            normalizer.normalize(&EntityKind::Topic, "GPU"),
            "graphics processor"
        );
        // Default aliases are gone once replaced.
        assert_eq!(normalizer.normalize(&EntityKind::Topic, "LLM"), "llm");
    }
}
