//! Types for embedding and matching

use serde::{Deserialize, Serialize};

/// A nearest-neighbour hit from the in-memory index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedMatch<T> {
    /// Cosine similarity in [-1.0, 1.0]
    pub similarity: f32,

    /// Position of the entry in insertion order
    pub position: usize,

    /// The payload stored with the embedding
    pub payload: T,
}

/// Error types for the embedding provider
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("Embedding provider request failed: {0}")]
    Provider(String),

    #[error("Embedding response malformed: {0}")]
    Malformed(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Error types for index operations
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Index entry dimension {actual} does not match index dimension {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
}
