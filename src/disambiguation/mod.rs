//! Context-sensitive choice between candidate expansions using embedding
//! similarity.

pub mod cache;
pub mod disambiguator;
pub mod embedder;
pub mod ollama;
#[cfg(test)]
pub(crate) mod test_support;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use cache::EmbeddingCache;
pub use disambiguator::{
    cosine_similarity, CandidateText, Choice, EmbeddingDisambiguator, MAX_ABANDONED_WORKERS,
};
pub use embedder::{EmbeddingModel, HashingEmbedder, MockEmbedder, EMBEDDING_DIM};
#[cfg(feature = "onnx-embeddings")]
pub use embedder::OnnxEmbedder;
pub use ollama::OllamaEmbedder;

/// Failures inside an embedding model.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Embedding model initialization: {0}")]
    ModelInit(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Cannot connect to embedding service at {0}")]
    Connection(String),

    #[error("Embedding service returned {status}: {body}")]
    Service { status: u16, body: String },
}

/// Failures surfaced to the orchestration layer.
#[derive(Error, Debug)]
pub enum DisambiguationError {
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(#[from] EmbeddingError),

    #[error("Embedding call exceeded {0:?}")]
    Timeout(Duration),

    #[error("{0} timed-out embedding calls still running; not starting another")]
    WorkersExhausted(usize),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("No candidate expansions to choose from")]
    NoCandidates,
}

impl DisambiguationError {
    /// Whether the model (rather than the caller's input) is at fault.
    pub fn is_model_failure(&self) -> bool {
        !matches!(self, DisambiguationError::NoCandidates)
    }
}
