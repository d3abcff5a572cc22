//! In-memory cosine nearest-neighbour index
//!
//! Holds the embeddings of one ground-truth artifact. Rebuilt whenever the
//! artifact is (re)loaded; the platform never persists this index.

use tracing::debug;

use crate::centroid::cosine_similarity;
use crate::types::{IndexedMatch, MatcherError};

/// Brute-force cosine index over payloads of type `T`
pub struct EmbeddingIndex<T> {
    dimension: usize,
    entries: Vec<(Vec<f32>, T)>,
}

impl<T: Clone> EmbeddingIndex<T> {
    /// Create an empty index for vectors of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one embedding + payload pair
    pub fn insert(&mut self, embedding: Vec<f32>, payload: T) -> Result<(), MatcherError> {
        if embedding.len() != self.dimension {
            return Err(MatcherError::Dimension {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        self.entries.push((embedding, payload));
        Ok(())
    }

    /// Return the single best match, or `None` for an empty index.
    pub fn find_nearest(&self, query: &[f32]) -> Option<IndexedMatch<T>> {
        let mut best: Option<IndexedMatch<T>> = None;

        for (position, (vec, payload)) in self.entries.iter().enumerate() {
            let Some(similarity) = cosine_similarity(query, vec) else {
                continue;
            };
            let better = best
                .as_ref()
                .map(|b| similarity > b.similarity)
                .unwrap_or(true);
            if better {
                best = Some(IndexedMatch {
                    similarity,
                    position,
                    payload: payload.clone(),
                });
            }
        }

        if let Some(ref hit) = best {
            debug!(
                "Nearest neighbour at position {} (similarity {:.3})",
                hit.position, hit.similarity
            );
        }
        best
    }

    /// Return the best match iff it clears the threshold.
    pub fn find_match(&self, query: &[f32], threshold: f32) -> Option<IndexedMatch<T>> {
        self.find_nearest(query)
            .filter(|hit| hit.similarity >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(entries: Vec<(Vec<f32>, &'static str)>) -> EmbeddingIndex<&'static str> {
        let mut idx = EmbeddingIndex::new(entries[0].0.len());
        for (vec, label) in entries {
            idx.insert(vec, label).unwrap();
        }
        idx
    }

    #[test]
    fn test_exact_member_returns_itself() {
        let idx = index_with(vec![
            (vec![1.0, 0.0, 0.0], "a"),
            (vec![0.0, 1.0, 0.0], "b"),
            (vec![0.0, 0.0, 1.0], "c"),
        ]);
        let hit = idx.find_nearest(&[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(hit.payload, "b");
        assert!(hit.similarity >= 0.999);
    }

    #[test]
    fn test_threshold_filters_weak_matches() {
        let idx = index_with(vec![(vec![1.0, 0.0], "a")]);
        assert!(idx.find_match(&[0.0, 1.0], 0.95).is_none());
        assert!(idx.find_match(&[1.0, 0.01], 0.95).is_some());
    }

    #[test]
    fn test_empty_index() {
        let idx: EmbeddingIndex<&str> = EmbeddingIndex::new(3);
        assert!(idx.find_nearest(&[1.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_dimension_guard_on_insert() {
        let mut idx: EmbeddingIndex<&str> = EmbeddingIndex::new(3);
        let err = idx.insert(vec![1.0, 0.0], "short").unwrap_err();
        assert!(matches!(
            err,
            MatcherError::Dimension {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_mismatched_query_skipped() {
        let idx = index_with(vec![(vec![1.0, 0.0], "a")]);
        // Query of the wrong dimension cannot match anything
        assert!(idx.find_nearest(&[1.0, 0.0, 0.0]).is_none());
    }
}
