//! Mnemora: graph-augmented retrieval over an entity–event memory.
//!
//! A query runs through four stages: typed attribute extraction, weighted
//! activation recall over the bipartite entity–event graph, multi-hop
//! expansion, and PageRank/RRF reranking with an optional composite
//! scoring blend. The graph itself is read-only during retrieval; all
//! per-query weight state lives in maps owned by the query.

pub mod core;
pub mod graph;
pub mod index;
pub mod llm;
pub mod search;
pub mod utils;

pub use self::core::{MnemoraConfig, MnemoraError, Result};
pub use graph::{Entity, EntityKind, Event, GraphStore, InMemoryGraph, Section, TypeRegistry};
pub use index::{InMemoryIndex, IndexSpace, ScoredId, VectorIndex};
pub use search::{
    RerankStrategy, ReturnType, SearchConfig, SearchPipeline, SearchRequest, SearchResponse,
    SearchResults,
};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_LLM_MODEL: &str = "qwen2.5:7b";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_CACHE_SIZE: usize = 1000;
pub const DEFAULT_CACHE_TTL: u64 = 300;
