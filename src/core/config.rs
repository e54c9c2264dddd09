
use serde::{Deserialize, Serialize};

/// Engine-level configuration: collaborator endpoints, call budgets and
/// cache sizing. Per-query knobs live in [`crate::search::SearchConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnemoraConfig {
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_base_url: String,
    pub llm_temperature: f64,

    pub embedding_model: String,
    pub embedding_url: String,

    /// Per collaborator call, in seconds.
    pub call_timeout: u64,
    /// Overall query deadline, in seconds.
    pub query_deadline: u64,
    pub max_retries: u32,

    pub cache_size: usize,
    pub cache_ttl: u64,

    /// Abort on any stage failure instead of continuing degraded.
    pub fail_fast: bool,
}

impl MnemoraConfig {
    pub fn new() -> Self {
        Self {
            llm_provider: "ollama".to_string(),
            llm_model: crate::DEFAULT_LLM_MODEL.to_string(),
            llm_base_url: crate::DEFAULT_OLLAMA_URL.to_string(),
            llm_temperature: 0.3,

            embedding_model: crate::DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_url: crate::DEFAULT_OLLAMA_URL.to_string(),

            call_timeout: 30,
            query_deadline: 120,
            max_retries: 3,

            cache_size: crate::DEFAULT_CACHE_SIZE,
            cache_ttl: crate::DEFAULT_CACHE_TTL,

            fail_fast: false,
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(url) = std::env::var("MNEMORA_OLLAMA_URL") {
            config.llm_base_url = url.clone();
            config.embedding_url = url;
        }
        if let Ok(model) = std::env::var("MNEMORA_LLM_MODEL") {
            config.llm_model = model;
        }
        if let Ok(model) = std::env::var("MNEMORA_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(deadline) = std::env::var("MNEMORA_QUERY_DEADLINE") {
            if let Ok(secs) = deadline.parse() {
                config.query_deadline = secs;
            }
        }
        config
    }
}

impl Default for MnemoraConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MnemoraConfig::new();
        assert_eq!(config.max_retries, 3);
        assert!(!config.fail_fast);
        assert!(config.call_timeout <= config.query_deadline);
    }
}
