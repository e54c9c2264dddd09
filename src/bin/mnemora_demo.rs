//! Seeds an in-memory graph and runs a couple of retrieval queries
//! end to end. No network services required.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mnemora::graph::models::{Entity, EntityKind, Event};
use mnemora::index::{IndexSpace, InMemoryIndex};
use mnemora::llm::embeddings::StaticEmbedder;
use mnemora::llm::extractor::{ExtractedAttribute, StaticAttributeExtractor};
use mnemora::search::{SearchPipeline, SearchRequest, SynonymNormalizer};
use mnemora::{InMemoryGraph, MnemoraConfig, TypeRegistry};

fn entity(id: &str, kind: EntityKind, name: &str) -> Entity {
    Entity {
        id: id.to_string(),
        kind,
        name: name.to_string(),
        normalized_name: name.to_lowercase(),
        embedding: None,
    }
}

fn event(id: &str, title: &str, entity_ids: &[&str], embedding: Vec<f32>, days_ago: i64) -> Event {
    Event {
        id: id.to_string(),
        source_id: "notes".to_string(),
        title: title.to_string(),
        content: format!("{}.", title),
        embedding,
        created_at: Utc::now() - Duration::days(days_ago),
        entity_ids: entity_ids.iter().map(|s| s.to_string()).collect(),
        section_id: None,
    }
}

fn seed() -> (Arc<InMemoryGraph>, Arc<InMemoryIndex>) {
    let graph = Arc::new(InMemoryGraph::new());
    graph.insert_entity(entity("t-rust", EntityKind::Topic, "rust"));
    graph.insert_entity(entity("t-async", EntityKind::Topic, "async"));
    graph.insert_entity(entity("t-db", EntityKind::Topic, "database"));
    graph.insert_entity(entity("p-alice", EntityKind::Person, "alice"));

    graph.insert_event(event(
        "e1",
        "Reviewed the async runtime migration with alice",
        &["t-rust", "t-async", "p-alice"],
        vec![0.9, 0.4, 0.1],
        2,
    ));
    graph.insert_event(event(
        "e2",
        "Profiled the tokio scheduler under load",
        &["t-rust", "t-async"],
        vec![0.8, 0.55, 0.2],
        30,
    ));
    graph.insert_event(event(
        "e3",
        "Tuned the storage engine compaction settings",
        &["t-db"],
        vec![0.1, 0.2, 0.95],
        5,
    ));

    let index = Arc::new(InMemoryIndex::new());
    index.insert(IndexSpace::Entity(EntityKind::Topic), "t-rust", vec![1.0, 0.2, 0.0]);
    index.insert(IndexSpace::Entity(EntityKind::Topic), "t-async", vec![0.6, 0.8, 0.0]);
    index.insert(IndexSpace::Entity(EntityKind::Topic), "t-db", vec![0.0, 0.1, 1.0]);
    index.insert(IndexSpace::Entity(EntityKind::Person), "p-alice", vec![0.3, 0.3, 0.3]);
    index.insert(IndexSpace::Event, "e1", vec![0.9, 0.4, 0.1]);
    index.insert(IndexSpace::Event, "e2", vec![0.8, 0.55, 0.2]);
    index.insert(IndexSpace::Event, "e3", vec![0.1, 0.2, 0.95]);
    index.link("t-rust", "e1");
    index.link("t-rust", "e2");
    index.link("t-async", "e1");
    index.link("t-async", "e2");
    index.link("t-db", "e3");
    index.link("p-alice", "e1");

    (graph, index)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (graph, index) = seed();

    let extractor = Arc::new(StaticAttributeExtractor::new(vec![
        ExtractedAttribute {
            kind: EntityKind::Topic,
            name: "rust".to_string(),
            confidence: 0.9,
        },
        ExtractedAttribute {
            kind: EntityKind::Topic,
            name: "async".to_string(),
            confidence: 0.8,
        },
    ]));
    let embedder = Arc::new(
        StaticEmbedder::new(3)
            .with_vector("what did we do on the async runtime", vec![0.85, 0.5, 0.1])
            .with_vector("rust", vec![1.0, 0.2, 0.0])
            .with_vector("async", vec![0.6, 0.8, 0.0]),
    );

    let pipeline = SearchPipeline::new(
        graph,
        index,
        extractor,
        embedder,
        Arc::new(SynonymNormalizer::new()),
        Arc::new(TypeRegistry::with_defaults()),
        MnemoraConfig::from_env(),
    );

    let request = SearchRequest::new("what did we do on the async runtime")
        .with_focus(vec!["rust".to_string()]);
    let response = pipeline.search(&request).await?;

    info!(
        "Query {} finished: {} results, strategy={}, degraded={}",
        response.query_id,
        response.stats.results_returned,
        response.stats.strategy,
        response.stats.degraded
    );
    if let Some(events) = response.results.as_events() {
        for (rank, ranked) in events.iter().enumerate() {
            println!(
                "#{} [{:.3}] {} (weight={:.3}, pagerank={:.3}, via={}, clues={})",
                rank + 1,
                ranked.score,
                ranked.event.title,
                ranked.weight,
                ranked.pagerank,
                ranked.search_type,
                ranked.clues.len()
            );
        }
    }
    for stage in &response.stages {
        println!("stage {:<20} {:<8} {:.1} ms", stage.stage, stage.outcome.to_string(), stage.duration_ms);
    }

    Ok(())
}
