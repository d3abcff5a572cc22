//! Sentinel Matcher - text embeddings and cosine nearest-neighbour search
//!
//! Provides the embedding capability contract for the platform plus the two
//! vector primitives built on top of it:
//!
//! 1. An in-memory nearest-neighbour index over ground-truth query embeddings
//! 2. Centroid math for per-agent drift baselines

pub mod centroid;
pub mod embedder;
pub mod matcher;
pub mod types;

pub use centroid::{cosine_similarity, mean_centroid};
pub use embedder::{BedrockEmbedder, TextEmbedder};
pub use matcher::EmbeddingIndex;
pub use types::{EmbedderError, IndexedMatch, MatcherError};
