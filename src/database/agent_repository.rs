//! Agent registry repository
//!
//! CRUD over `platform.agents` plus the discovery metadata that hangs off an
//! agent: discovered columns, query-log configuration, schema-change log and
//! data-quality issues. Monitoring rows key on `agent_name` (denormalized as
//! `agent_type`), so deletion removes those first and lets the registry
//! cascade handle the rest.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::discovery::ColumnInfo;

/// One row of `platform.agents`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentRow {
    pub agent_id: i64,
    pub agent_name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub db_url: String,
    pub agent_url: Option<String>,
    pub poll_interval_s: i32,
    pub status: String,
    pub last_error: Option<String>,
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub gt_status: String,
    pub gt_error: Option<String>,
    pub gt_generated_at: Option<DateTime<Utc>>,
    pub gt_query_count: i32,
    pub gt_retry_count: i32,
    pub gt_last_retry_at: Option<DateTime<Utc>>,
    pub schema_version: i32,
    pub last_schema_scan_at: Option<DateTime<Utc>>,
    pub schema_change_count: i32,
    pub health_status: String,
    pub health_detail: Option<String>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for registering a new agent
#[derive(Debug, Clone)]
pub struct NewAgentFields {
    pub agent_name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub db_url: String,
    pub agent_url: Option<String>,
    pub poll_interval_s: i32,
    pub api_key_hash: String,
    pub api_key_prefix: String,
}

/// One row of `platform.query_log_config`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueryLogConfigRow {
    pub agent_id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub query_text_column: String,
    pub sql_column: String,
    pub timestamp_column: String,
    pub status_column: Option<String>,
    pub error_column: Option<String>,
    pub id_column: Option<String>,
    pub last_seen_timestamp: Option<DateTime<Utc>>,
    pub last_seen_id: Option<i64>,
}

/// One row of `platform.schema_changes`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchemaChangeRow {
    pub change_id: i64,
    pub change_type: String,
    pub schema_name: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub data_type: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub gt_generated: bool,
    pub gt_query_count: Option<i32>,
}

/// A data-quality finding to persist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityIssue {
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub issue_type: String,
    pub severity: String,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
    pub affected_rows: Option<i64>,
    pub total_rows: Option<i64>,
    pub percentage: Option<f64>,
}

const AGENT_COLUMNS: &str = r#"
    agent_id, agent_name, display_name, description, db_url, agent_url,
    poll_interval_s, status, last_error, last_polled_at,
    api_key_hash, api_key_prefix,
    gt_status, gt_error, gt_generated_at, gt_query_count, gt_retry_count, gt_last_retry_at,
    schema_version, last_schema_scan_at, schema_change_count,
    health_status, health_detail, last_health_check_at,
    created_at, updated_at
"#;

/// Repository over the agent registry
#[derive(Clone, Debug)]
pub struct AgentRepository {
    pool: PgPool,
}

impl AgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // Registry CRUD
    // =========================================================================

    /// Insert a new agent with status `pending`.
    pub async fn register(&self, fields: &NewAgentFields) -> Result<AgentRow> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            r#"
            INSERT INTO platform.agents
                (agent_name, display_name, description, db_url, agent_url,
                 poll_interval_s, status, api_key_hash, api_key_prefix)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(&fields.agent_name)
        .bind(
            fields
                .display_name
                .clone()
                .unwrap_or_else(|| fields.agent_name.clone()),
        )
        .bind(&fields.description)
        .bind(&fields.db_url)
        .bind(&fields.agent_url)
        .bind(fields.poll_interval_s)
        .bind(&fields.api_key_hash)
        .bind(&fields.api_key_prefix)
        .fetch_one(&self.pool)
        .await
        .context("failed to register agent")?;

        info!("Registered agent '{}' (id={})", row.agent_name, row.agent_id);
        Ok(row)
    }

    pub async fn all(&self) -> Result<Vec<AgentRow>> {
        sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM platform.agents ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to list agents")
    }

    pub async fn get(&self, agent_id: i64) -> Result<Option<AgentRow>> {
        sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM platform.agents WHERE agent_id = $1"
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to get agent")
    }

    /// Lookup by name, case-insensitively.
    pub async fn get_by_name(&self, agent_name: &str) -> Result<Option<AgentRow>> {
        sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM platform.agents WHERE LOWER(agent_name) = LOWER($1)"
        ))
        .bind(agent_name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to get agent by name")
    }

    /// Lookup by hashed API key. Used by the SDK ingest endpoint.
    pub async fn get_by_api_key_hash(&self, key_hash: &str) -> Result<Option<AgentRow>> {
        sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM platform.agents WHERE api_key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .context("failed to get agent by api key")
    }

    /// Atomically replace the stored key hash + prefix. The old key is
    /// unusable the moment this commits.
    pub async fn replace_api_key(&self, agent_id: i64, hash: &str, prefix: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.agents
            SET api_key_hash = $1, api_key_prefix = $2, updated_at = NOW()
            WHERE agent_id = $3
            "#,
        )
        .bind(hash)
        .bind(prefix)
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .context("failed to rotate api key")?;
        Ok(())
    }

    pub async fn update_status(
        &self,
        agent_id: i64,
        status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.agents
            SET status = $1, last_error = $2, updated_at = NOW()
            WHERE agent_id = $3
            "#,
        )
        .bind(status)
        .bind(error)
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .context("failed to update agent status")?;
        Ok(())
    }

    /// Delete an agent and all its monitoring data. Monitoring rows key on
    /// agent_name and carry FKs queries ← {evaluations, errors, drift}, so
    /// the order here matters.
    pub async fn delete(&self, agent_id: i64) -> Result<bool> {
        let Some(agent) = self.get(agent_id).await? else {
            return Ok(false);
        };
        let name = &agent.agent_name;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM monitoring.errors WHERE query_id IN \
             (SELECT query_id FROM monitoring.queries WHERE agent_type = $1)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM monitoring.drift_monitoring WHERE query_id IN \
             (SELECT query_id FROM monitoring.queries WHERE agent_type = $1)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM monitoring.evaluations WHERE agent_type = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM monitoring.queries WHERE agent_type = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM monitoring.baseline WHERE agent_type = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        // Registry delete cascades to discovered_schemas, query_log_config,
        // schema_changes and data_quality_issues.
        let deleted = sqlx::query("DELETE FROM platform.agents WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await.context("failed to delete agent")?;
        info!("Agent '{}' (id={}) fully removed", name, agent_id);
        Ok(deleted > 0)
    }

    pub async fn touch_last_polled(&self, agent_id: i64) -> Result<()> {
        sqlx::query("UPDATE platform.agents SET last_polled_at = NOW() WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .context("failed to update last_polled_at")?;
        Ok(())
    }

    // =========================================================================
    // Discovered schemas
    // =========================================================================

    /// Wipe and re-insert the discovery snapshot for one agent.
    pub async fn replace_discovered_schemas(
        &self,
        agent_id: i64,
        columns: &[ColumnInfo],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM platform.discovered_schemas WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        for col in columns {
            sqlx::query(
                r#"
                INSERT INTO platform.discovered_schemas
                    (agent_id, schema_name, table_name, column_name, data_type, is_nullable)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (agent_id, schema_name, table_name, column_name) DO NOTHING
                "#,
            )
            .bind(agent_id)
            .bind(&col.schema_name)
            .bind(&col.table_name)
            .bind(&col.column_name)
            .bind(&col.data_type)
            .bind(col.is_nullable)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit()
            .await
            .context("failed to replace discovered schemas")?;
        info!("Stored {} discovered columns for agent {}", columns.len(), agent_id);
        Ok(())
    }

    /// Insert newly detected columns without touching the existing snapshot.
    pub async fn insert_discovered_columns(
        &self,
        agent_id: i64,
        columns: &[ColumnInfo],
    ) -> Result<()> {
        for col in columns {
            sqlx::query(
                r#"
                INSERT INTO platform.discovered_schemas
                    (agent_id, schema_name, table_name, column_name, data_type, is_nullable)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (agent_id, schema_name, table_name, column_name) DO NOTHING
                "#,
            )
            .bind(agent_id)
            .bind(&col.schema_name)
            .bind(&col.table_name)
            .bind(&col.column_name)
            .bind(&col.data_type)
            .bind(col.is_nullable)
            .execute(&self.pool)
            .await
            .context("failed to insert discovered column")?;
        }
        Ok(())
    }

    pub async fn discovered_columns(&self, agent_id: i64) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query_as::<_, (String, String, String, Option<String>, bool)>(
            r#"
            SELECT schema_name, table_name, column_name, data_type, is_nullable
            FROM platform.discovered_schemas
            WHERE agent_id = $1
            ORDER BY schema_name, table_name, column_name
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load discovered columns")?;

        Ok(rows
            .into_iter()
            .map(
                |(schema_name, table_name, column_name, data_type, is_nullable)| ColumnInfo {
                    schema_name,
                    table_name,
                    column_name,
                    data_type: data_type.unwrap_or_else(|| "unknown".to_string()),
                    is_nullable,
                },
            )
            .collect())
    }

    /// `{qualified_table -> {column -> data_type}}`, with unqualified table
    /// names added when the table name is unique across schemas.
    pub async fn schema_info(
        &self,
        agent_id: i64,
    ) -> Result<std::collections::HashMap<String, std::collections::HashMap<String, String>>> {
        use std::collections::{HashMap, HashSet};

        let columns = self.discovered_columns(agent_id).await?;

        let mut info: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut schemas_per_table: HashMap<String, HashSet<String>> = HashMap::new();

        for col in &columns {
            let qualified = format!("{}.{}", col.schema_name, col.table_name);
            info.entry(qualified)
                .or_default()
                .insert(col.column_name.clone(), col.data_type.clone());
            schemas_per_table
                .entry(col.table_name.clone())
                .or_default()
                .insert(col.schema_name.clone());
        }

        for col in &columns {
            if schemas_per_table[&col.table_name].len() == 1 {
                info.entry(col.table_name.clone())
                    .or_default()
                    .insert(col.column_name.clone(), col.data_type.clone());
            }
        }

        Ok(info)
    }

    // =========================================================================
    // Query-log configuration + watermark
    // =========================================================================

    pub async fn upsert_query_log_config(&self, config: &QueryLogConfigRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform.query_log_config
                (agent_id, schema_name, table_name,
                 query_text_column, sql_column, timestamp_column,
                 status_column, error_column, id_column, last_seen_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (agent_id) DO UPDATE SET
                schema_name = EXCLUDED.schema_name,
                table_name = EXCLUDED.table_name,
                query_text_column = EXCLUDED.query_text_column,
                sql_column = EXCLUDED.sql_column,
                timestamp_column = EXCLUDED.timestamp_column,
                status_column = EXCLUDED.status_column,
                error_column = EXCLUDED.error_column,
                id_column = EXCLUDED.id_column,
                last_seen_timestamp = NOW()
            "#,
        )
        .bind(config.agent_id)
        .bind(&config.schema_name)
        .bind(&config.table_name)
        .bind(&config.query_text_column)
        .bind(&config.sql_column)
        .bind(&config.timestamp_column)
        .bind(&config.status_column)
        .bind(&config.error_column)
        .bind(&config.id_column)
        .execute(&self.pool)
        .await
        .context("failed to upsert query log config")?;
        Ok(())
    }

    pub async fn query_log_config(&self, agent_id: i64) -> Result<Option<QueryLogConfigRow>> {
        sqlx::query_as::<_, QueryLogConfigRow>(
            r#"
            SELECT agent_id, schema_name, table_name,
                   query_text_column, sql_column, timestamp_column,
                   status_column, error_column, id_column,
                   last_seen_timestamp, last_seen_id
            FROM platform.query_log_config
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load query log config")
    }

    /// Advance the watermark. Monotonic: an older timestamp is ignored.
    pub async fn advance_watermark(
        &self,
        agent_id: i64,
        ts: DateTime<Utc>,
        last_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.query_log_config
            SET last_seen_timestamp = GREATEST(COALESCE(last_seen_timestamp, $2), $2),
                last_seen_id = COALESCE($3, last_seen_id)
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .bind(ts)
        .bind(last_id)
        .execute(&self.pool)
        .await
        .context("failed to advance watermark")?;
        Ok(())
    }

    // =========================================================================
    // Ground-truth lifecycle
    // =========================================================================

    pub async fn set_gt_in_progress(&self, agent_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE platform.agents SET gt_status = 'in_progress', updated_at = NOW() \
             WHERE agent_id = $1",
        )
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .context("failed to mark gt in_progress")?;
        Ok(())
    }

    pub async fn set_gt_success(&self, agent_id: i64, query_count: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.agents
            SET gt_status = 'success', gt_error = NULL,
                gt_generated_at = NOW(), gt_query_count = $2, updated_at = NOW()
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .bind(query_count)
        .execute(&self.pool)
        .await
        .context("failed to mark gt success")?;
        Ok(())
    }

    pub async fn set_gt_failed(
        &self,
        agent_id: i64,
        error: &str,
        retry_count: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.agents
            SET gt_status = 'failed', gt_error = $2,
                gt_retry_count = COALESCE($3, gt_retry_count), updated_at = NOW()
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .bind(error)
        .bind(retry_count)
        .execute(&self.pool)
        .await
        .context("failed to mark gt failed")?;
        Ok(())
    }

    pub async fn bump_gt_retry(&self, agent_id: i64, retry_count: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.agents
            SET gt_retry_count = $2, gt_last_retry_at = NOW()
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .bind(retry_count)
        .execute(&self.pool)
        .await
        .context("failed to bump gt retry count")?;
        Ok(())
    }

    pub async fn reset_gt_retry(&self, agent_id: i64) -> Result<()> {
        sqlx::query("UPDATE platform.agents SET gt_retry_count = 0 WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .context("failed to reset gt retry count")?;
        Ok(())
    }

    /// Add to the running gt query count (incremental generation).
    pub async fn add_gt_queries(&self, agent_id: i64, added: i32) -> Result<()> {
        sqlx::query(
            "UPDATE platform.agents SET gt_query_count = gt_query_count + $2, updated_at = NOW() \
             WHERE agent_id = $1",
        )
        .bind(agent_id)
        .bind(added)
        .execute(&self.pool)
        .await
        .context("failed to add gt queries")?;
        Ok(())
    }

    // =========================================================================
    // Schema monitoring
    // =========================================================================

    pub async fn record_schema_change(
        &self,
        agent_id: i64,
        change_type: &str,
        schema_name: &str,
        table_name: &str,
        column_name: Option<&str>,
        data_type: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform.schema_changes
                (agent_id, change_type, schema_name, table_name, column_name, data_type, gt_generated)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE)
            "#,
        )
        .bind(agent_id)
        .bind(change_type)
        .bind(schema_name)
        .bind(table_name)
        .bind(column_name)
        .bind(data_type)
        .execute(&self.pool)
        .await
        .context("failed to record schema change")?;
        Ok(())
    }

    pub async fn mark_changes_generated(&self, agent_id: i64, query_count: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.schema_changes
            SET gt_generated = TRUE, gt_query_count = $2
            WHERE agent_id = $1 AND gt_generated = FALSE
            "#,
        )
        .bind(agent_id)
        .bind(query_count)
        .execute(&self.pool)
        .await
        .context("failed to mark schema changes generated")?;
        Ok(())
    }

    /// Bump schema version + change count after a scan that found changes.
    pub async fn bump_schema_metadata(&self, agent_id: i64, change_count: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.agents
            SET last_schema_scan_at = NOW(),
                schema_version = schema_version + 1,
                schema_change_count = schema_change_count + $2,
                updated_at = NOW()
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .bind(change_count)
        .execute(&self.pool)
        .await
        .context("failed to bump schema metadata")?;
        Ok(())
    }

    pub async fn touch_scan_timestamp(&self, agent_id: i64) -> Result<()> {
        sqlx::query("UPDATE platform.agents SET last_schema_scan_at = NOW() WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .context("failed to touch scan timestamp")?;
        Ok(())
    }

    pub async fn schema_change_history(
        &self,
        agent_id: i64,
        limit: i64,
    ) -> Result<Vec<SchemaChangeRow>> {
        sqlx::query_as::<_, SchemaChangeRow>(
            r#"
            SELECT change_id, change_type, schema_name, table_name, column_name,
                   data_type, detected_at, gt_generated, gt_query_count
            FROM platform.schema_changes
            WHERE agent_id = $1
            ORDER BY detected_at DESC
            LIMIT $2
            "#,
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load schema change history")
    }

    // =========================================================================
    // Health + data quality
    // =========================================================================

    pub async fn update_health(
        &self,
        agent_id: i64,
        health_status: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform.agents
            SET health_status = $1, health_detail = $2, last_health_check_at = NOW()
            WHERE agent_id = $3
            "#,
        )
        .bind(health_status)
        .bind(detail)
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .context("failed to update health status")?;
        Ok(())
    }

    pub async fn replace_data_quality_issues(
        &self,
        agent_id: i64,
        issues: &[DataQualityIssue],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM platform.data_quality_issues WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        for issue in issues {
            sqlx::query(
                r#"
                INSERT INTO platform.data_quality_issues
                    (agent_id, schema_name, table_name, column_name,
                     issue_type, severity, message, details,
                     affected_rows, total_rows, percentage)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(agent_id)
            .bind(&issue.schema_name)
            .bind(&issue.table_name)
            .bind(&issue.column_name)
            .bind(&issue.issue_type)
            .bind(&issue.severity)
            .bind(&issue.message)
            .bind(&issue.details)
            .bind(issue.affected_rows)
            .bind(issue.total_rows)
            .bind(issue.percentage)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit()
            .await
            .context("failed to store data quality issues")?;
        Ok(())
    }
}
