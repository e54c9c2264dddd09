
pub mod embeddings;
pub mod extractor;
pub mod ollama;
pub mod provider;

pub use embeddings::{Embedder, EmbeddingError, OllamaEmbedder, StaticEmbedder};
pub use extractor::{
    AttributeExtractor, ExtractedAttribute, LlmAttributeExtractor, PatternAttributeExtractor,
    StaticAttributeExtractor,
};
pub use ollama::OllamaProvider;
pub use provider::{LlmMetadata, LlmProvider, LlmProviderError};
