//! Full ground-truth generation
//!
//! Schema + relationships + sampled rows go into a prompt; the LLM returns
//! strict-JSON (NL, SQL) pairs in batches; every generated SQL is executed
//! against the agent DB to capture its expected output. Execution failures
//! keep the query with `expected_output: null` - they never abort a batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::prompt::build_generation_prompt;
use super::{artifact_filename, ExpectedOutput, GroundTruthArtifact, GroundTruthQuery, GroundTruthStore};
use crate::agentdb::{AgentDbKind, QueryExecutor};
use crate::discovery::{discover_relationships, sample_database, ColumnInfo};
use crate::llm::{strip_code_fences, LlmClient};

/// Full run: 4 batches of 25 queries
const BATCH_SIZE: usize = 25;
const NUM_BATCHES: usize = 4;

/// Rows kept in an expected output
pub(crate) const SAMPLE_ROW_CAP: usize = 20;

const SYSTEM_PROMPT: &str =
    "You are an expert SQL test-query generator. Respond with strict JSON only.";

#[derive(Debug, Deserialize)]
struct RawQuery {
    natural_language: String,
    sql: String,
}

/// Generator for complete per-agent artifacts
pub struct GroundTruthGenerator {
    llm: Arc<dyn LlmClient>,
    store: Arc<GroundTruthStore>,
    executor: QueryExecutor,
}

impl GroundTruthGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<GroundTruthStore>) -> Self {
        Self {
            llm,
            store,
            // Ground-truth execution runs under a tighter 5s budget than
            // evaluation-time validation.
            executor: QueryExecutor::new(Duration::from_secs(5), 10_000),
        }
    }

    /// Generate the artifact for one agent. Returns the query count.
    pub async fn generate_for_agent(
        &self,
        agent_id: i64,
        agent_name: &str,
        db_url: &str,
        columns: &[ColumnInfo],
    ) -> Result<usize> {
        info!("Starting ground truth generation for agent {agent_id} ({agent_name})");

        let db_type = db_type_label(db_url)?;
        let relationships = discover_relationships(db_url).await;
        let samples = sample_database(db_url, columns, 5).await;

        info!(
            "Generating {} queries in {} batches of {}",
            BATCH_SIZE * NUM_BATCHES,
            NUM_BATCHES,
            BATCH_SIZE
        );

        let mut raw_queries = Vec::new();
        for batch in 1..=NUM_BATCHES {
            let prompt = build_generation_prompt(
                agent_name,
                &db_type,
                columns,
                &relationships,
                &samples,
                BATCH_SIZE,
            );

            match self.llm.chat(SYSTEM_PROMPT, &prompt).await {
                Ok(response) => {
                    let parsed = parse_query_response(&response);
                    if parsed.is_empty() {
                        warn!("Batch {batch}/{NUM_BATCHES} generated no queries");
                    } else {
                        info!("Batch {batch}/{NUM_BATCHES} generated {} queries", parsed.len());
                        raw_queries.extend(parsed);
                    }
                }
                // A failed batch does not abort the run
                Err(e) => warn!("Batch {batch}/{NUM_BATCHES} failed: {e}"),
            }
        }

        if raw_queries.is_empty() {
            bail!("no queries were generated");
        }

        let mut artifact = GroundTruthArtifact::empty(agent_id, agent_name);
        let mut success_count = 0;
        let mut fail_count = 0;

        info!("Executing {} queries to capture outputs", raw_queries.len());
        for raw in raw_queries {
            let enriched = self
                .execute_and_enrich(raw.0, raw.1, db_url, false)
                .await;
            if enriched.expected_output.is_some() {
                success_count += 1;
            } else {
                fail_count += 1;
            }
            artifact.queries.push(enriched);
        }

        artifact.total_queries = artifact.queries.len();
        artifact.metadata.generated_at = Some(Utc::now());
        artifact.metadata.success_count = success_count;
        artifact.metadata.fail_count = fail_count;

        let filename = artifact_filename(agent_name);
        self.store
            .save(&filename, &artifact)
            .await
            .context("failed to save ground-truth artifact")?;

        info!(
            "Saved {} queries to {filename} (success: {success_count}, failed: {fail_count})",
            artifact.total_queries
        );
        Ok(artifact.total_queries)
    }

    /// Execute one generated SQL and wrap it as an artifact entry.
    pub(crate) async fn execute_and_enrich(
        &self,
        natural_language: String,
        sql: String,
        db_url: &str,
        incremental: bool,
    ) -> GroundTruthQuery {
        let mut query = GroundTruthQuery {
            id: None,
            natural_language,
            sql: sql.clone(),
            complexity: None,
            expected_output: None,
            generation_error: None,
            generated_at: Some(Utc::now()),
            incremental: incremental.then_some(true),
        };

        if sql.trim().is_empty() {
            query.generation_error = Some("empty sql".to_string());
            return query;
        }

        let result = self.executor.execute(&sql, db_url).await;
        if result.success {
            query.expected_output = Some(ExpectedOutput {
                columns: result.columns,
                row_count: result.row_count as i64,
                sample_rows: result.rows.into_iter().take(SAMPLE_ROW_CAP).collect(),
                execution_time_ms: (result.execution_time_ms * 100.0).round() / 100.0,
            });
        } else {
            query.generation_error = result.error;
        }
        query
    }

    pub(crate) fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub(crate) fn store(&self) -> &Arc<GroundTruthStore> {
        &self.store
    }
}

/// Parse an LLM response into validated (NL, SQL) pairs.
///
/// Tolerates markdown fences and leading prose by extracting the outermost
/// JSON array before parsing.
pub(crate) fn parse_query_response(response: &str) -> Vec<(String, String)> {
    let cleaned = strip_code_fences(response);

    let start = cleaned.find('[');
    let end = cleaned.rfind(']');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if e > s => &cleaned[s..=e],
        _ => {
            warn!("No JSON array found in generation response");
            return Vec::new();
        }
    };

    let parsed: Vec<RawQuery> = match serde_json::from_str(json_str) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Failed to parse generation response: {e}");
            return Vec::new();
        }
    };

    parsed
        .into_iter()
        .filter(|q| !q.natural_language.trim().is_empty() && !q.sql.trim().is_empty())
        .map(|q| (q.natural_language, q.sql))
        .collect()
}

fn db_type_label(db_url: &str) -> Result<String> {
    Ok(match AgentDbKind::from_url(db_url)? {
        AgentDbKind::Postgres => "postgresql".to_string(),
        AgentDbKind::MySql => "mysql".to_string(),
        AgentDbKind::Sqlite => "sqlite".to_string(),
        AgentDbKind::MongoDb => "mongodb".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_array() {
        let response = r#"[
            {"natural_language": "Count products", "sql": "SELECT COUNT(*) FROM products"},
            {"natural_language": "List orders", "sql": "SELECT * FROM orders"}
        ]"#;
        let parsed = parse_query_response(response);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "Count products");
    }

    #[test]
    fn test_parse_fenced_array() {
        let response = "```json\n[{\"natural_language\": \"q\", \"sql\": \"SELECT 1\"}]\n```";
        assert_eq!(parse_query_response(response).len(), 1);
    }

    #[test]
    fn test_parse_with_leading_prose() {
        let response = "Here are your queries:\n[{\"natural_language\": \"q\", \"sql\": \"SELECT 1\"}]";
        assert_eq!(parse_query_response(response).len(), 1);
    }

    #[test]
    fn test_parse_filters_empty_fields() {
        let response = r#"[
            {"natural_language": "", "sql": "SELECT 1"},
            {"natural_language": "ok", "sql": ""},
            {"natural_language": "ok", "sql": "SELECT 2"}
        ]"#;
        let parsed = parse_query_response(response);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].1, "SELECT 2");
    }

    #[test]
    fn test_parse_garbage_returns_empty() {
        assert!(parse_query_response("the model refused").is_empty());
        assert!(parse_query_response("[{broken json").is_empty());
    }
}
