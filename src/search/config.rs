
use serde::{Deserialize, Serialize};

use crate::core::error::{MnemoraError, Result};
use super::scoring::DEFAULT_DECAY_LAMBDA;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum RerankStrategy {
    PageRank,
    Rrf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReturnType {
    Event,
    Paragraph,
}

/// Final key extraction mode for recall step 8. Exactly one of the two is
/// active per call, so the choice is encoded in the type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelection {
    TopN(usize),
    Threshold(f64),
}

/// Per-query knobs. Everything here is caller-supplied and validated
/// before any I/O happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Restrict retrieval to one source corpus.
    pub source_id: Option<String>,

    /// Fallback entity similarity threshold for kinds without their own.
    pub key_similarity_threshold: f64,
    pub event_similarity_threshold: f64,
    pub max_keys: usize,
    pub max_events: usize,
    /// Per-type cap for recall step 1.
    pub vector_k: usize,
    pub key_selection: KeySelection,

    pub max_depth: u32,
    pub breadth_per_hop: usize,
    pub expand_threshold: f64,

    pub strategy: RerankStrategy,
    pub return_type: ReturnType,
    pub max_results: usize,
    pub score_threshold: f64,
    pub damping_factor: f64,
    pub max_iterations: u32,
    pub rrf_k: f64,

    pub decay_lambda: f64,
    /// Apply the composite scoring blend to the reranked list.
    pub final_blend: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            source_id: None,

            key_similarity_threshold: 0.6,
            event_similarity_threshold: 0.55,
            max_keys: 20,
            max_events: 50,
            vector_k: 5,
            key_selection: KeySelection::TopN(10),

            max_depth: 2,
            breadth_per_hop: 5,
            expand_threshold: 0.3,

            strategy: RerankStrategy::PageRank,
            return_type: ReturnType::Event,
            max_results: 10,
            score_threshold: 0.0,
            damping_factor: 0.85,
            max_iterations: 50,
            rrf_k: 60.0,

            decay_lambda: DEFAULT_DECAY_LAMBDA,
            final_blend: true,
        }
    }
}

impl SearchConfig {
    /// Named presets in the spirit of retrieval modes.
    pub fn from_mode(mode: &str) -> Self {
        match mode {
            "precise" => Self {
                key_similarity_threshold: 0.75,
                event_similarity_threshold: 0.7,
                max_depth: 1,
                breadth_per_hop: 3,
                expand_threshold: 0.5,
                key_selection: KeySelection::Threshold(0.4),
                ..Default::default()
            },
            "broad" => Self {
                key_similarity_threshold: 0.5,
                event_similarity_threshold: 0.45,
                max_events: 100,
                max_depth: 2,
                breadth_per_hop: 8,
                expand_threshold: 0.2,
                max_results: 20,
                ..Default::default()
            },
            "deep" => Self {
                max_depth: 3,
                breadth_per_hop: 5,
                expand_threshold: 0.25,
                max_iterations: 100,
                ..Default::default()
            },
            _ => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("key_similarity_threshold", self.key_similarity_threshold),
            ("event_similarity_threshold", self.event_similarity_threshold),
            ("expand_threshold", self.expand_threshold),
            ("score_threshold", self.score_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MnemoraError::Validation(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }

        if let KeySelection::Threshold(t) = self.key_selection {
            if t < 0.0 {
                return Err(MnemoraError::Validation(format!(
                    "final key threshold must be non-negative, got {}",
                    t
                )));
            }
        }
        if let KeySelection::TopN(0) = self.key_selection {
            return Err(MnemoraError::Validation(
                "top_n_keys must be at least 1".to_string(),
            ));
        }

        if self.max_keys == 0 || self.max_events == 0 || self.vector_k == 0 {
            return Err(MnemoraError::Validation(
                "max_keys, max_events and vector_k must be at least 1".to_string(),
            ));
        }
        if self.breadth_per_hop == 0 {
            return Err(MnemoraError::Validation(
                "breadth_per_hop must be at least 1".to_string(),
            ));
        }
        if self.max_results == 0 {
            return Err(MnemoraError::Validation(
                "max_results must be at least 1".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.damping_factor) || self.damping_factor == 0.0 {
            return Err(MnemoraError::Validation(format!(
                "damping_factor must be in (0, 1), got {}",
                self.damping_factor
            )));
        }
        if self.max_iterations == 0 {
            return Err(MnemoraError::Validation(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.rrf_k <= 0.0 {
            return Err(MnemoraError::Validation(format!(
                "rrf_k must be positive, got {}",
                self.rrf_k
            )));
        }
        if self.decay_lambda < 0.0 {
            return Err(MnemoraError::Validation(format!(
                "decay_lambda must be non-negative, got {}",
                self.decay_lambda
            )));
        }

        // Rank fusion is only defined for event-granularity results.
        if self.strategy == RerankStrategy::Rrf && self.return_type == ReturnType::Paragraph {
            return Err(MnemoraError::Validation(
                "RRF strategy does not support paragraph return type".to_string(),
            ));
        }

        Ok(())
    }
}
