//! Ground-truth artifacts
//!
//! One JSON artifact per agent, keyed by the normalized agent name. Full
//! generation writes it; incremental generation appends to it; the
//! evaluator's semantic lookup reads it.

pub mod generator;
pub mod incremental;
pub mod prompt;
pub mod storage;

pub use generator::GroundTruthGenerator;
pub use incremental::IncrementalGenerator;
pub use storage::GroundTruthStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agentdb::SqlValue;

/// Captured output of one ground-truth SQL execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedOutput {
    pub columns: Vec<String>,
    pub row_count: i64,
    /// First rows only, capped at 20
    pub sample_rows: Vec<Vec<SqlValue>>,
    pub execution_time_ms: f64,
}

/// One generated (NL, SQL, expected output) tuple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub natural_language: String,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
    pub expected_output: Option<ExpectedOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
}

/// Bookkeeping for one incremental append
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalUpdate {
    pub timestamp: DateTime<Utc>,
    pub query_count: usize,
    pub success_count: usize,
    pub fail_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub fail_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incremental_updates: Vec<IncrementalUpdate>,
}

/// The per-agent artifact stored in the object store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthArtifact {
    pub agent_id: i64,
    pub agent_name: String,
    pub total_queries: usize,
    pub queries: Vec<GroundTruthQuery>,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
}

impl GroundTruthArtifact {
    pub fn empty(agent_id: i64, agent_name: &str) -> Self {
        Self {
            agent_id,
            agent_name: agent_name.to_string(),
            total_queries: 0,
            queries: Vec::new(),
            metadata: ArtifactMetadata::default(),
        }
    }

    /// Next local id for an appended query.
    pub fn next_id(&self) -> u32 {
        self.queries.len() as u32 + 1
    }
}

/// Artifact filename for an agent: lowercase, spaces collapsed to `_`.
pub fn artifact_filename(agent_name: &str) -> String {
    format!("{}_queries.json", agent_name.to_lowercase().replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_filename() {
        assert_eq!(artifact_filename("Demand"), "demand_queries.json");
        assert_eq!(
            artifact_filename("Spend Analytics"),
            "spend_analytics_queries.json"
        );
    }

    #[test]
    fn test_artifact_round_trip() {
        let artifact = GroundTruthArtifact {
            agent_id: 7,
            agent_name: "demand".into(),
            total_queries: 1,
            queries: vec![GroundTruthQuery {
                id: Some(1),
                natural_language: "How many products are in stock?".into(),
                sql: "SELECT COUNT(*) FROM products WHERE stock_levels > 0".into(),
                complexity: Some("simple".into()),
                expected_output: Some(ExpectedOutput {
                    columns: vec!["count".into()],
                    row_count: 1,
                    sample_rows: vec![vec![SqlValue::Int(42)]],
                    execution_time_ms: 5.0,
                }),
                generation_error: None,
                generated_at: None,
                incremental: None,
            }],
            metadata: ArtifactMetadata::default(),
        };

        let json = serde_json::to_string(&artifact).unwrap();
        let back: GroundTruthArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_queries, 1);
        let output = back.queries[0].expected_output.as_ref().unwrap();
        assert_eq!(output.columns, vec!["count"]);
        assert!(matches!(output.sample_rows[0][0], SqlValue::Int(42)));
    }

    #[test]
    fn test_next_id_monotonic() {
        let mut artifact = GroundTruthArtifact::empty(1, "a");
        assert_eq!(artifact.next_id(), 1);
        artifact.queries.push(GroundTruthQuery {
            id: Some(1),
            natural_language: "q".into(),
            sql: "SELECT 1".into(),
            complexity: None,
            expected_output: None,
            generation_error: None,
            generated_at: None,
            incremental: None,
        });
        assert_eq!(artifact.next_id(), 2);
    }
}
