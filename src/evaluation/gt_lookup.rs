//! Ground-truth lookup via the semantic matcher
//!
//! The agent's artifact is embedded into an in-memory cosine index; the
//! evaluator asks for the nearest reference query at a 0.95 threshold.
//! Rebuilt whenever the artifact is loaded - never persisted.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ground_truth::{ExpectedOutput, GroundTruthArtifact};
use sentinel_matcher::{EmbeddingIndex, TextEmbedder};

/// Similarity floor for accepting a reference
pub const MATCH_THRESHOLD: f32 = 0.95;

/// A matched reference query
#[derive(Debug, Clone)]
pub struct GroundTruthMatch {
    pub natural_language: String,
    pub sql: String,
    pub complexity: Option<String>,
    pub expected_output: Option<ExpectedOutput>,
    pub similarity: f32,
}

/// In-memory nearest-neighbour index over one artifact
pub struct GroundTruthIndex {
    index: EmbeddingIndex<usize>,
    artifact: GroundTruthArtifact,
    embedder: Arc<dyn TextEmbedder>,
}

impl GroundTruthIndex {
    /// Embed every artifact query and build the index. Queries whose
    /// embedding fails are skipped rather than failing the build.
    pub async fn build(
        artifact: GroundTruthArtifact,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self> {
        info!(
            "Building semantic index over {} ground-truth queries",
            artifact.queries.len()
        );

        let mut index = EmbeddingIndex::new(embedder.dimension());
        for (position, query) in artifact.queries.iter().enumerate() {
            match embedder.embed(&query.natural_language).await {
                Ok(embedding) => {
                    index.insert(embedding, position)?;
                }
                Err(e) => warn!("Skipping unembeddable ground-truth query {position}: {e}"),
            }
        }

        Ok(Self {
            index,
            artifact,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Nearest reference at or above `threshold`.
    pub async fn find_match(
        &self,
        query_text: &str,
        threshold: f32,
    ) -> Result<Option<GroundTruthMatch>> {
        if self.index.is_empty() {
            return Ok(None);
        }

        let embedding = self.embedder.embed(query_text).await?;
        let Some(hit) = self.index.find_match(&embedding, threshold) else {
            return Ok(None);
        };

        let entry = &self.artifact.queries[hit.payload];
        info!(
            "Semantic match found: '{query_text}' -> '{}' (score {:.3})",
            entry.natural_language, hit.similarity
        );

        Ok(Some(GroundTruthMatch {
            natural_language: entry.natural_language.clone(),
            sql: entry.sql.clone(),
            complexity: entry.complexity.clone(),
            expected_output: entry.expected_output.clone(),
            similarity: hit.similarity,
        }))
    }
}

/// Shared fallback artifact consulted when an agent has none of its own
pub const SHARED_ARTIFACT: &str = "all_queries.json";

/// Per-process cache of ground-truth indexes, one per agent.
///
/// Replaces what would otherwise be a module-level singleton: constructed
/// once at startup, handed to evaluators, invalidated after (re)generation.
/// Each replica rebuilds on its own cadence; there is no cross-process
/// invalidation.
pub struct GroundTruthCatalog {
    store: Arc<crate::ground_truth::GroundTruthStore>,
    embedder: Arc<dyn TextEmbedder>,
    cache: tokio::sync::RwLock<std::collections::HashMap<String, Arc<GroundTruthIndex>>>,
}

impl GroundTruthCatalog {
    pub fn new(
        store: Arc<crate::ground_truth::GroundTruthStore>,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Self {
        Self {
            store,
            embedder,
            cache: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// The index for an agent, building it from the agent's artifact (or
    /// the shared fallback) on first use.
    pub async fn index_for(&self, agent_name: &str) -> Option<Arc<GroundTruthIndex>> {
        let key = agent_name.to_lowercase();

        if let Some(index) = self.cache.read().await.get(&key) {
            return Some(index.clone());
        }

        let filename = crate::ground_truth::artifact_filename(agent_name);
        let artifact = match self.store.load(&filename).await {
            Some(artifact) => artifact,
            None => {
                warn!("Agent-specific artifact {filename} not found, trying shared fallback");
                self.store.load(SHARED_ARTIFACT).await?
            }
        };

        match GroundTruthIndex::build(artifact, self.embedder.clone()).await {
            Ok(index) => {
                let index = Arc::new(index);
                self.cache.write().await.insert(key, index.clone());
                Some(index)
            }
            Err(e) => {
                warn!("Failed to build ground-truth index for {agent_name}: {e}");
                None
            }
        }
    }

    /// Drop the cached index so the next lookup rebuilds from storage.
    pub async fn invalidate(&self, agent_name: &str) {
        self.cache
            .write()
            .await
            .remove(&agent_name.to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ground_truth::GroundTruthQuery;
    use async_trait::async_trait;
    use sentinel_matcher::EmbedderError;

    /// Deterministic embedder: known phrases get fixed unit vectors.
    struct StubEmbedder;

    #[async_trait]
    impl TextEmbedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            let lower = text.to_lowercase();
            Ok(if lower.contains("stock") {
                vec![1.0, 0.0, 0.0]
            } else if lower.contains("revenue") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            })
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_id(&self) -> &str {
            "stub"
        }
    }

    fn artifact() -> GroundTruthArtifact {
        let mut artifact = GroundTruthArtifact::empty(1, "demand");
        for (nl, sql) in [
            (
                "How many products are in stock?",
                "SELECT COUNT(*) FROM products WHERE stock_levels > 0",
            ),
            (
                "Total revenue per region",
                "SELECT region, SUM(revenue) FROM orders GROUP BY region",
            ),
        ] {
            artifact.queries.push(GroundTruthQuery {
                id: None,
                natural_language: nl.into(),
                sql: sql.into(),
                complexity: Some("simple".into()),
                expected_output: None,
                generation_error: None,
                generated_at: None,
                incremental: None,
            });
        }
        artifact.total_queries = 2;
        artifact
    }

    #[tokio::test]
    async fn test_member_query_matches_itself() {
        let index = GroundTruthIndex::build(artifact(), Arc::new(StubEmbedder))
            .await
            .unwrap();
        let hit = index
            .find_match("How many products are in stock?", 0.999)
            .await
            .unwrap()
            .unwrap();
        assert!(hit.sql.contains("stock_levels"));
        assert!(hit.similarity >= 0.999);
    }

    #[tokio::test]
    async fn test_below_threshold_returns_none() {
        let index = GroundTruthIndex::build(artifact(), Arc::new(StubEmbedder))
            .await
            .unwrap();
        let miss = index.find_match("asdf qwer", MATCH_THRESHOLD).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_empty_artifact() {
        let index = GroundTruthIndex::build(
            GroundTruthArtifact::empty(1, "demand"),
            Arc::new(StubEmbedder),
        )
        .await
        .unwrap();
        assert!(index.is_empty());
        assert!(index.find_match("anything", 0.5).await.unwrap().is_none());
    }
}
