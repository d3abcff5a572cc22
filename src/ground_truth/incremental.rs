//! Incremental ground-truth generation
//!
//! Scoped to the (schema, table) pairs a schema scan just found. New
//! queries are appended to the existing artifact with monotonically
//! increasing local ids and an `incremental_updates` metadata entry.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use super::generator::{parse_query_response, GroundTruthGenerator};
use super::prompt::build_incremental_prompt;
use super::{artifact_filename, GroundTruthArtifact, GroundTruthStore, IncrementalUpdate};
use crate::agentdb::AgentDbKind;
use crate::discovery::{sample_database, ColumnInfo};
use crate::llm::LlmClient;

/// Queries per new table, and the overall cap per scan
const QUERIES_PER_TABLE: usize = 10;
const MAX_QUERIES: usize = 100;

const SYSTEM_PROMPT: &str =
    "You are an expert SQL test-query generator. Respond with strict JSON only.";

/// Generator for scan-scoped artifact appends
pub struct IncrementalGenerator {
    inner: GroundTruthGenerator,
}

impl IncrementalGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<GroundTruthStore>) -> Self {
        Self {
            inner: GroundTruthGenerator::new(llm, store),
        }
    }

    /// Generate queries for newly discovered columns only and append them to
    /// the agent's artifact. Returns the number of appended queries.
    pub async fn generate_for_new_schemas(
        &self,
        agent_id: i64,
        agent_name: &str,
        db_url: &str,
        new_columns: &[ColumnInfo],
    ) -> Result<usize> {
        if new_columns.is_empty() {
            info!("No new schemas to generate queries for agent {agent_id}");
            return Ok(0);
        }

        let new_tables: BTreeSet<(String, String)> = new_columns
            .iter()
            .map(|c| (c.schema_name.clone(), c.table_name.clone()))
            .collect();
        let num_queries = (new_tables.len() * QUERIES_PER_TABLE).min(MAX_QUERIES);

        info!(
            "Generating incremental ground truth: {} new tables, {} queries",
            new_tables.len(),
            num_queries
        );

        let db_type = match AgentDbKind::from_url(db_url)? {
            AgentDbKind::Postgres => "postgres",
            AgentDbKind::MySql => "mysql",
            AgentDbKind::Sqlite => "sqlite",
            AgentDbKind::MongoDb => "mongodb",
        };
        let samples = sample_database(db_url, new_columns, 5).await;

        let prompt =
            build_incremental_prompt(agent_name, db_type, new_columns, &samples, num_queries);
        let response = self
            .inner
            .llm()
            .chat(SYSTEM_PROMPT, &prompt)
            .await
            .context("incremental generation LLM call failed")?;

        let raw_queries = parse_query_response(&response);
        if raw_queries.is_empty() {
            warn!("Incremental generation produced no queries");
            return Ok(0);
        }

        let store: &Arc<GroundTruthStore> = self.inner.store();
        let filename = artifact_filename(agent_name);
        let mut artifact = store
            .load(&filename)
            .await
            .unwrap_or_else(|| GroundTruthArtifact::empty(agent_id, agent_name));

        let mut success_count = 0;
        let mut fail_count = 0;
        let appended = raw_queries.len();

        for (natural_language, sql) in raw_queries {
            let mut enriched = self
                .inner
                .execute_and_enrich(natural_language, sql, db_url, true)
                .await;
            enriched.id = Some(artifact.next_id());
            if enriched.expected_output.is_some() {
                success_count += 1;
            } else {
                fail_count += 1;
            }
            artifact.queries.push(enriched);
        }

        artifact.total_queries = artifact.queries.len();
        artifact.metadata.incremental_updates.push(IncrementalUpdate {
            timestamp: Utc::now(),
            query_count: appended,
            success_count,
            fail_count,
        });

        store
            .save(&filename, &artifact)
            .await
            .context("failed to save incremental artifact")?;

        info!(
            "Appended {appended} queries to {filename} (success: {success_count}, failed: {fail_count})"
        );
        Ok(appended)
    }
}
