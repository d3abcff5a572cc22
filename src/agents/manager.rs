//! Agent lifecycle orchestration
//!
//! Registration mints the one-time API key; discovery runs as a spawned
//! task that walks the agent through pending → discovering → active (or
//! error), generates ground truth with retries, records data-quality
//! findings and tries to enable polling via query-log detection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{error, info, warn};

use super::query_log;
use crate::auth::{generate_api_key, GeneratedKey};
use crate::context::Services;
use crate::database::agent_repository::DataQualityIssue;
use crate::database::{AgentRow, NewAgentFields, QueryLogConfigRow};
use crate::discovery::{sample_database, ColumnInfo, SchemaDiscovery};
use crate::error::PlatformError;
use crate::ground_truth::{GroundTruthGenerator, IncrementalGenerator};

/// Ground-truth retry policy: 3 attempts, exponential backoff from 5s
const GT_MAX_ATTEMPTS: u32 = 3;
const GT_BASE_DELAY_S: u64 = 5;

/// Registration input
#[derive(Debug, Clone)]
pub struct RegisterAgentInput {
    pub agent_name: String,
    pub db_url: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub agent_url: Option<String>,
    pub poll_interval_s: Option<i32>,
}

/// Summary of one schema scan
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanSummary {
    pub has_changes: bool,
    pub new_tables: usize,
    pub new_columns: usize,
    pub queries_generated: usize,
}

/// Agent lifecycle service
pub struct AgentManager {
    services: Arc<Services>,
}

impl AgentManager {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    // =========================================================================
    // Registration + key management
    // =========================================================================

    /// Register a new agent and kick off discovery in the background.
    /// The raw API key in the return value is shown exactly once.
    pub async fn register(
        &self,
        input: RegisterAgentInput,
    ) -> Result<(AgentRow, String), PlatformError> {
        if input.agent_name.trim().is_empty() {
            return Err(PlatformError::BadRequest("agent_name is required".into()));
        }
        if let Some(existing) = self.services.agents.get_by_name(&input.agent_name).await? {
            return Err(PlatformError::Conflict(format!(
                "agent '{}' already exists",
                existing.agent_name
            )));
        }

        let GeneratedKey {
            full_key,
            key_hash,
            key_prefix,
        } = generate_api_key(&input.agent_name);

        let row = self
            .services
            .agents
            .register(&NewAgentFields {
                agent_name: input.agent_name.clone(),
                display_name: input.display_name,
                description: input.description,
                db_url: input.db_url,
                agent_url: input.agent_url,
                poll_interval_s: input.poll_interval_s.unwrap_or(30),
                api_key_hash: key_hash,
                api_key_prefix: key_prefix,
            })
            .await?;

        // Discovery runs detached; registration returns immediately
        let manager = AgentManager::new(self.services.clone());
        let agent_id = row.agent_id;
        tokio::spawn(async move {
            if let Err(e) = manager.discover_and_configure(agent_id).await {
                error!("Discovery failed for agent {agent_id}: {e:#}");
            }
        });

        Ok((row, full_key))
    }

    /// Rotate the API key. The old hash is unusable the moment this returns.
    pub async fn regenerate_api_key(&self, agent_id: i64) -> Result<String, PlatformError> {
        let agent = self
            .services
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("agent {agent_id}")))?;

        let key = generate_api_key(&agent.agent_name);
        self.services
            .agents
            .replace_api_key(agent_id, &key.key_hash, &key.key_prefix)
            .await?;
        info!("Rotated API key for agent '{}'", agent.agent_name);
        Ok(key.full_key)
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Full discovery flow for one agent.
    pub async fn discover_and_configure(&self, agent_id: i64) -> Result<()> {
        let agents = &self.services.agents;
        let agent = agents
            .get(agent_id)
            .await?
            .context("agent disappeared before discovery")?;

        agents.update_status(agent_id, "discovering", None).await?;

        let columns = match SchemaDiscovery::discover(&agent.db_url).await {
            Ok(columns) if !columns.is_empty() => columns,
            Ok(_) => {
                agents
                    .update_status(agent_id, "error", Some("No user-defined schema found"))
                    .await?;
                bail!("no user-defined schema found for agent {agent_id}");
            }
            Err(e) => {
                agents
                    .update_status(agent_id, "error", Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        agents.replace_discovered_schemas(agent_id, &columns).await?;

        // Discovery succeeded: the agent is active regardless of what the
        // optional steps below achieve.
        agents.update_status(agent_id, "active", None).await?;

        self.generate_ground_truth_with_retry(agent_id).await;

        if let Err(e) = self.run_database_validation(agent_id, &agent.db_url, &columns).await {
            warn!("Database validation failed for agent {agent_id}: {e}");
        }

        match query_log::detect_query_log_table(&columns) {
            Some((schema_name, table_name, matched)) => {
                agents
                    .upsert_query_log_config(&QueryLogConfigRow {
                        agent_id,
                        schema_name,
                        table_name,
                        query_text_column: matched
                            .query_text_column
                            .unwrap_or_else(|| "query_text".into()),
                        sql_column: matched.sql_column.unwrap_or_else(|| "sql".into()),
                        timestamp_column: matched
                            .timestamp_column
                            .unwrap_or_else(|| "created_at".into()),
                        status_column: matched.status_column,
                        error_column: matched.error_column,
                        id_column: matched.id_column,
                        last_seen_timestamp: None,
                        last_seen_id: None,
                    })
                    .await?;
                info!("Agent {agent_id}: query log detected, polling enabled");
            }
            None => info!("Agent {agent_id}: no query log found, SDK ingestion only"),
        }

        Ok(())
    }

    /// Re-run discovery for an already registered agent.
    pub async fn refresh(&self, agent_id: i64) -> Result<(), PlatformError> {
        self.services
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("agent {agent_id}")))?;

        let manager = AgentManager::new(self.services.clone());
        tokio::spawn(async move {
            if let Err(e) = manager.discover_and_configure(agent_id).await {
                error!("Refresh failed for agent {agent_id}: {e:#}");
            }
        });
        Ok(())
    }

    // =========================================================================
    // Ground truth
    // =========================================================================

    /// Run full generation with the retry state machine. Every transition
    /// is a single registry update, visible to the dashboard mid-flight.
    pub async fn generate_ground_truth_with_retry(&self, agent_id: i64) {
        let agents = &self.services.agents;
        if let Err(e) = agents.set_gt_in_progress(agent_id).await {
            error!("Could not mark gt in_progress for agent {agent_id}: {e}");
            return;
        }

        for attempt in 1..=GT_MAX_ATTEMPTS {
            info!("Ground truth generation attempt {attempt}/{GT_MAX_ATTEMPTS} for agent {agent_id}");

            match self.generate_ground_truth_once(agent_id).await {
                Ok(query_count) => {
                    if let Err(e) = agents.set_gt_success(agent_id, query_count as i32).await {
                        error!("Could not record gt success for agent {agent_id}: {e}");
                    }
                    info!(
                        "Ground truth generation successful for agent {agent_id}: {query_count} queries"
                    );
                    self.create_baseline_from_artifact(agent_id).await;
                    return;
                }
                Err(e) => {
                    error!("Ground truth attempt {attempt} failed for agent {agent_id}: {e:#}");
                    if attempt == GT_MAX_ATTEMPTS {
                        if let Err(se) = agents
                            .set_gt_failed(agent_id, &e.to_string(), Some(attempt as i32))
                            .await
                        {
                            error!("Could not record gt failure for agent {agent_id}: {se}");
                        }
                        return;
                    }
                    let delay = GT_BASE_DELAY_S * 2u64.pow(attempt - 1);
                    info!("Retrying in {delay} seconds");
                    if let Err(se) = agents.bump_gt_retry(agent_id, attempt as i32).await {
                        error!("Could not bump gt retry for agent {agent_id}: {se}");
                    }
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
            }
        }
    }

    async fn generate_ground_truth_once(&self, agent_id: i64) -> Result<usize> {
        let agent = self
            .services
            .agents
            .get(agent_id)
            .await?
            .context("agent not found")?;

        let columns = SchemaDiscovery::discover(&agent.db_url).await?;
        if columns.is_empty() {
            bail!("no schemas found, cannot generate ground truth");
        }

        let generator = GroundTruthGenerator::new(
            self.services.generator_llm.clone(),
            self.services.gt_store.clone(),
        );
        let count = generator
            .generate_for_agent(agent_id, &agent.agent_name, &agent.db_url, &columns)
            .await?;
        if count == 0 {
            bail!("no queries were generated");
        }

        self.services.gt_catalog.invalidate(&agent.agent_name).await;
        Ok(count)
    }

    /// Build the drift baseline from the freshly written artifact.
    /// Non-fatal: generation already succeeded.
    async fn create_baseline_from_artifact(&self, agent_id: i64) {
        let result: Result<()> = async {
            let agent = self
                .services
                .agents
                .get(agent_id)
                .await?
                .context("agent not found")?;
            let filename = crate::ground_truth::artifact_filename(&agent.agent_name);
            let artifact = self
                .services
                .gt_store
                .load(&filename)
                .await
                .context("artifact missing after generation")?;

            let texts: Vec<String> = artifact
                .queries
                .iter()
                .map(|q| q.natural_language.clone())
                .collect();
            self.services
                .drift_detector()
                .create_baseline(&agent.agent_name, &texts)
                .await?;
            info!("Drift baseline auto-created for '{}'", agent.agent_name);
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("Baseline creation after ground truth generation failed (non-fatal): {e:#}");
        }
    }

    /// Manual retry entry point. Rejected while a run is in flight or after
    /// a success; otherwise the retry counter resets and generation reruns.
    pub async fn retry_ground_truth(&self, agent_id: i64) -> Result<String, PlatformError> {
        let agent = self
            .services
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("agent {agent_id}")))?;

        match agent.gt_status.as_str() {
            "in_progress" => {
                return Err(PlatformError::Conflict(
                    "ground truth generation already in progress".into(),
                ))
            }
            "success" => {
                return Err(PlatformError::Conflict(
                    "ground truth already generated successfully".into(),
                ))
            }
            _ => {}
        }

        self.services.agents.reset_gt_retry(agent_id).await?;

        let manager = AgentManager::new(self.services.clone());
        tokio::spawn(async move {
            manager.generate_ground_truth_with_retry(agent_id).await;
        });

        Ok("ground truth generation restarted".to_string())
    }

    // =========================================================================
    // Schema scans
    // =========================================================================

    /// Detect schema changes and generate incremental ground truth for the
    /// new tables/columns only.
    pub async fn scan_schema_changes(&self, agent_id: i64) -> Result<ScanSummary> {
        let agents = &self.services.agents;
        let agent = agents.get(agent_id).await?.context("agent not found")?;

        info!("Schema scan for agent {agent_id}");

        let current = SchemaDiscovery::discover(&agent.db_url).await?;
        let stored = agents.discovered_columns(agent_id).await?;

        let stored_ids: std::collections::HashSet<_> =
            stored.iter().map(ColumnInfo::identity).collect();
        let stored_tables: std::collections::HashSet<_> = stored
            .iter()
            .map(|c| (c.schema_name.clone(), c.table_name.clone()))
            .collect();

        let new_columns: Vec<ColumnInfo> = current
            .iter()
            .filter(|c| !stored_ids.contains(&c.identity()))
            .cloned()
            .collect();
        let new_tables: std::collections::BTreeSet<(String, String)> = new_columns
            .iter()
            .map(|c| (c.schema_name.clone(), c.table_name.clone()))
            .filter(|t| !stored_tables.contains(t))
            .collect();

        if new_columns.is_empty() {
            agents.touch_scan_timestamp(agent_id).await?;
            info!("No schema changes detected for agent {agent_id}");
            return Ok(ScanSummary {
                has_changes: false,
                new_tables: 0,
                new_columns: 0,
                queries_generated: 0,
            });
        }

        // Append-only change log: tables first, then their columns
        for (schema, table) in &new_tables {
            agents
                .record_schema_change(agent_id, "table_added", schema, table, None, None)
                .await?;
        }
        for col in &new_columns {
            agents
                .record_schema_change(
                    agent_id,
                    "column_added",
                    &col.schema_name,
                    &col.table_name,
                    Some(&col.column_name),
                    Some(&col.data_type),
                )
                .await?;
        }

        agents.insert_discovered_columns(agent_id, &new_columns).await?;

        let generator = IncrementalGenerator::new(
            self.services.generator_llm.clone(),
            self.services.gt_store.clone(),
        );
        let queries_generated = match generator
            .generate_for_new_schemas(agent_id, &agent.agent_name, &agent.db_url, &new_columns)
            .await
        {
            Ok(count) => {
                agents.mark_changes_generated(agent_id, count as i32).await?;
                self.services.gt_catalog.invalidate(&agent.agent_name).await;
                count
            }
            Err(e) => {
                warn!("Incremental generation failed for agent {agent_id}: {e:#}");
                0
            }
        };

        let change_count = (new_tables.len() + new_columns.len()) as i32;
        agents.bump_schema_metadata(agent_id, change_count).await?;
        if queries_generated > 0 {
            agents.add_gt_queries(agent_id, queries_generated as i32).await?;
        }

        info!(
            "Schema scan for agent {agent_id}: {} new tables, {} new columns, {} queries generated",
            new_tables.len(),
            new_columns.len(),
            queries_generated
        );

        Ok(ScanSummary {
            has_changes: true,
            new_tables: new_tables.len(),
            new_columns: new_columns.len(),
            queries_generated,
        })
    }

    // =========================================================================
    // Data-quality validation
    // =========================================================================

    /// Sample-based validation: flags empty tables and columns whose sample
    /// values are entirely NULL. Informational, never authoritative.
    pub async fn run_database_validation(
        &self,
        agent_id: i64,
        db_url: &str,
        columns: &[ColumnInfo],
    ) -> Result<()> {
        info!("Starting database validation for agent {agent_id}");

        let samples = sample_database(db_url, columns, 5).await;
        let mut issues: Vec<DataQualityIssue> = Vec::new();

        let mut tables: BTreeMap<(String, String), Vec<&ColumnInfo>> = BTreeMap::new();
        for col in columns {
            tables
                .entry((col.schema_name.clone(), col.table_name.clone()))
                .or_default()
                .push(col);
        }

        for ((schema, table), _cols) in &tables {
            let key = format!("{schema}.{table}");
            match samples.get(&key) {
                None => issues.push(DataQualityIssue {
                    schema_name: Some(schema.clone()),
                    table_name: Some(table.clone()),
                    column_name: None,
                    issue_type: "unsampleable_table".into(),
                    severity: "warning".into(),
                    message: Some(format!("Table {key} could not be sampled")),
                    details: None,
                    affected_rows: None,
                    total_rows: None,
                    percentage: None,
                }),
                Some(sample) if sample.rows.is_empty() => issues.push(DataQualityIssue {
                    schema_name: Some(schema.clone()),
                    table_name: Some(table.clone()),
                    column_name: None,
                    issue_type: "empty_table".into(),
                    severity: "info".into(),
                    message: Some(format!("Table {key} returned no sample rows")),
                    details: None,
                    affected_rows: Some(0),
                    total_rows: Some(0),
                    percentage: None,
                }),
                Some(sample) => {
                    for (idx, column) in sample.columns.iter().enumerate() {
                        let all_null = sample
                            .rows
                            .iter()
                            .all(|row| row.get(idx).map(|v| v.is_null()).unwrap_or(true));
                        if all_null {
                            issues.push(DataQualityIssue {
                                schema_name: Some(schema.clone()),
                                table_name: Some(table.clone()),
                                column_name: Some(column.clone()),
                                issue_type: "all_null_sample".into(),
                                severity: "warning".into(),
                                message: Some(format!(
                                    "Column {key}.{column} is NULL in every sampled row"
                                )),
                                details: Some(json!({ "sampled_rows": sample.rows.len() })),
                                affected_rows: Some(sample.rows.len() as i64),
                                total_rows: Some(sample.rows.len() as i64),
                                percentage: Some(100.0),
                            });
                        }
                    }
                }
            }
        }

        let counts = issues.iter().fold((0, 0, 0), |acc, i| match i.severity.as_str() {
            "critical" => (acc.0 + 1, acc.1, acc.2),
            "warning" => (acc.0, acc.1 + 1, acc.2),
            _ => (acc.0, acc.1, acc.2 + 1),
        });

        self.services
            .agents
            .replace_data_quality_issues(agent_id, &issues)
            .await?;

        info!(
            "Validation complete for agent {agent_id}: {} critical, {} warnings, {} info",
            counts.0, counts.1, counts.2
        );
        Ok(())
    }

    /// Manual revalidation trigger.
    pub async fn revalidate(&self, agent_id: i64) -> Result<(), PlatformError> {
        let agent = self
            .services
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("agent {agent_id}")))?;

        let columns = self.services.agents.discovered_columns(agent_id).await?;
        let manager = AgentManager::new(self.services.clone());
        tokio::spawn(async move {
            if let Err(e) = manager
                .run_database_validation(agent_id, &agent.db_url, &columns)
                .await
            {
                error!("Revalidation failed for agent {agent_id}: {e:#}");
            }
        });
        Ok(())
    }
}
