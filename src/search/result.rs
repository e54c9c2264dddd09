
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::models::{Clue, Event, Section};

/// Which recall path first surfaced a candidate. Events found only by
/// the entity path never survive the recall intersection, so there is no
/// graph-only variant at result granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Vector,
    Both,
    Expand,
}

impl SearchType {
    /// Merging provenance when the same node arrives via two paths.
    pub fn merge(self, other: SearchType) -> SearchType {
        use SearchType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Expand, b) => b,
            (a, Expand) => a,
            _ => Both,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedEvent {
    pub event: Event,
    pub pagerank: f64,
    pub weight: f64,
    pub score: f64,
    pub search_type: SearchType,
    pub clues: Vec<Clue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSection {
    pub section: Section,
    pub pagerank: f64,
    pub weight: f64,
    pub score: f64,
    pub search_type: SearchType,
    pub event_ids: Vec<String>,
    pub clues: Vec<Clue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SearchResults {
    Events(Vec<RankedEvent>),
    Sections(Vec<RankedSection>),
}

impl SearchResults {
    pub fn len(&self) -> usize {
        match self {
            Self::Events(v) => v.len(),
            Self::Sections(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_events(&self) -> Option<&[RankedEvent]> {
        match self {
            Self::Events(v) => Some(v),
            Self::Sections(_) => None,
        }
    }

    pub fn as_sections(&self) -> Option<&[RankedSection]> {
        match self {
            Self::Sections(v) => Some(v),
            Self::Events(_) => None,
        }
    }
}

/// Per-stage counters reported with every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStats {
    pub entities_recalled: usize,
    pub events_recalled: usize,
    pub nodes_expanded: usize,
    pub hops_used: u32,
    pub candidates_reranked: usize,
    pub results_returned: usize,
    pub strategy: String,
    pub degraded: bool,
    pub cache_hit: bool,
    pub pagerank_converged: bool,
    pub pagerank_iterations: u32,
    pub total_duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Ok,
    Degraded,
    Skipped,
    Failed,
}

/// Structured record of one pipeline stage, attached to the response for
/// observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLog {
    pub stage: String,
    pub outcome: StageOutcome,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query_id: Uuid,
    pub results: SearchResults,
    pub stats: SearchStats,
    pub stages: Vec<StageLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_type_merge() {
        assert_eq!(SearchType::Vector.merge(SearchType::Both), SearchType::Both);
        assert_eq!(SearchType::Vector.merge(SearchType::Vector), SearchType::Vector);
        assert_eq!(SearchType::Expand.merge(SearchType::Vector), SearchType::Vector);
        assert_eq!(SearchType::Both.merge(SearchType::Expand), SearchType::Both);
    }

    #[test]
    fn test_results_accessors() {
        let results = SearchResults::Events(Vec::new());
        assert!(results.is_empty());
        assert!(results.as_events().is_some());
        assert!(results.as_sections().is_none());
    }
}
