//! Semantic drift detection
//!
//! A baseline is the centroid of a representative query set's embeddings.
//! Each incoming query is embedded and compared by cosine similarity;
//! similarity bands classify it as normal / medium / high. Two guard
//! outcomes never carry a score: a missing baseline and a baseline whose
//! dimension disagrees with the current embedding provider.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::{DriftRow, MonitoringRepository};
use sentinel_matcher::{cosine_similarity, mean_centroid, TextEmbedder};

/// Drift thresholds (expressed as drift = 1 - similarity)
#[derive(Debug, Clone, Copy)]
pub struct DriftThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            high: 0.5,
            medium: 0.3,
        }
    }
}

/// Drift classification bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClass {
    Normal,
    Medium,
    High,
    NoBaseline,
    DimensionMismatch,
}

impl DriftClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftClass::Normal => "normal",
            DriftClass::Medium => "medium",
            DriftClass::High => "high",
            DriftClass::NoBaseline => "no_baseline",
            DriftClass::DimensionMismatch => "dimension_mismatch",
        }
    }
}

/// One drift detection outcome
#[derive(Debug, Clone, Serialize)]
pub struct DriftOutcome {
    pub query_id: String,
    pub agent_type: String,
    pub drift_score: f64,
    pub classification: DriftClass,
    pub similarity_to_baseline: f64,
    pub is_anomaly: bool,
}

/// Classify a similarity value against the thresholds.
pub fn classify_similarity(similarity: f64, thresholds: DriftThresholds) -> (DriftClass, bool) {
    if similarity >= 1.0 - thresholds.medium {
        (DriftClass::Normal, false)
    } else if similarity >= 1.0 - thresholds.high {
        (DriftClass::Medium, false)
    } else {
        (DriftClass::High, true)
    }
}

/// Per-agent baseline management + per-query detection
pub struct DriftDetector {
    repo: MonitoringRepository,
    embedder: Arc<dyn TextEmbedder>,
    thresholds: DriftThresholds,
}

impl DriftDetector {
    pub fn new(
        repo: MonitoringRepository,
        embedder: Arc<dyn TextEmbedder>,
        thresholds: DriftThresholds,
    ) -> Self {
        Self {
            repo,
            embedder,
            thresholds,
        }
    }

    /// Embed the query set and store its centroid as the agent's baseline.
    pub async fn create_baseline(&self, agent_type: &str, queries: &[String]) -> Result<i32> {
        info!(
            "Creating baseline for {agent_type} from {} queries",
            queries.len()
        );

        let embeddings = self.embedder.embed_batch(queries).await?;
        let centroid = mean_centroid(&embeddings)
            .ok_or_else(|| anyhow::anyhow!("cannot build a baseline from zero queries"))?;

        let version = self
            .repo
            .upsert_baseline(agent_type, &centroid, queries.len() as i32)
            .await?;

        info!("Baseline saved for {agent_type}: version {version}");
        Ok(version)
    }

    /// Detect drift for one query and persist the record.
    pub async fn detect(
        &self,
        query_id: &str,
        query_text: &str,
        agent_type: &str,
    ) -> Result<DriftOutcome> {
        let query_embedding = self.embedder.embed(query_text).await?;

        let baseline = self.repo.latest_baseline(agent_type).await?;

        let outcome = match baseline {
            None => {
                warn!("No baseline for {agent_type} - cannot detect drift");
                DriftOutcome {
                    query_id: query_id.to_string(),
                    agent_type: agent_type.to_string(),
                    drift_score: 0.0,
                    classification: DriftClass::NoBaseline,
                    similarity_to_baseline: 0.0,
                    is_anomaly: false,
                }
            }
            Some(baseline) if baseline.centroid.len() != query_embedding.len() => {
                warn!(
                    "Baseline dimension mismatch for {agent_type}: query={}, baseline={}. \
                     Regenerate the baseline with the current embedding model.",
                    query_embedding.len(),
                    baseline.centroid.len()
                );
                DriftOutcome {
                    query_id: query_id.to_string(),
                    agent_type: agent_type.to_string(),
                    drift_score: 0.0,
                    classification: DriftClass::DimensionMismatch,
                    similarity_to_baseline: 0.0,
                    is_anomaly: false,
                }
            }
            Some(baseline) => {
                let similarity = cosine_similarity(&query_embedding, &baseline.centroid)
                    .unwrap_or(0.0) as f64;
                let (classification, is_anomaly) =
                    classify_similarity(similarity, self.thresholds);
                DriftOutcome {
                    query_id: query_id.to_string(),
                    agent_type: agent_type.to_string(),
                    drift_score: 1.0 - similarity,
                    classification,
                    similarity_to_baseline: similarity,
                    is_anomaly,
                }
            }
        };

        // Guard outcomes skip the embedding column so a stale-dimension
        // vector never lands in the table.
        let embedding = match outcome.classification {
            DriftClass::DimensionMismatch => None,
            _ => Some(query_embedding),
        };

        self.repo
            .upsert_drift(&DriftRow {
                query_id: outcome.query_id.clone(),
                query_embedding: embedding,
                drift_score: outcome.drift_score,
                drift_classification: outcome.classification.as_str().to_string(),
                similarity_to_baseline: outcome.similarity_to_baseline,
                is_anomaly: outcome.is_anomaly,
            })
            .await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: DriftThresholds = DriftThresholds {
        high: 0.5,
        medium: 0.3,
    };

    #[test]
    fn test_normal_band() {
        let (class, anomaly) = classify_similarity(0.85, T);
        assert_eq!(class, DriftClass::Normal);
        assert!(!anomaly);
    }

    #[test]
    fn test_medium_band() {
        let (class, anomaly) = classify_similarity(0.6, T);
        assert_eq!(class, DriftClass::Medium);
        assert!(!anomaly);
    }

    #[test]
    fn test_high_band_is_anomaly() {
        let (class, anomaly) = classify_similarity(0.3, T);
        assert_eq!(class, DriftClass::High);
        assert!(anomaly);
    }

    #[test]
    fn test_band_edges() {
        // similarity exactly at 1 - medium is still normal
        assert_eq!(classify_similarity(0.7, T).0, DriftClass::Normal);
        // similarity exactly at 1 - high is still medium
        assert_eq!(classify_similarity(0.5, T).0, DriftClass::Medium);
    }

    #[test]
    fn test_drift_score_complements_similarity() {
        let similarity: f64 = 0.82;
        let drift = 1.0 - similarity;
        assert!((drift + similarity - 1.0).abs() < f64::EPSILON);
    }
}
