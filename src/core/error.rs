
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MnemoraError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Attribute extraction failed: {0}")]
    Extraction(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Graph store error: {0}")]
    Graph(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retry exhausted after {0} attempts: {1}")]
    RetryExhausted(u32, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MnemoraError {
    /// True for failures the pipeline may absorb in degraded mode.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::Extraction(_))
    }
}

pub type Result<T> = std::result::Result<T, MnemoraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_is_degradable() {
        assert!(MnemoraError::Extraction("timeout".into()).is_degradable());
        assert!(!MnemoraError::VectorIndex("down".into()).is_degradable());
        assert!(!MnemoraError::Validation("bad threshold".into()).is_degradable());
    }
}
