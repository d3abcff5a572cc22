//! Monitoring repository
//!
//! All derived telemetry rows are written here: raw queries, evaluations,
//! classified errors, drift records and drift baselines. Every write is an
//! idempotent upsert keyed by `query_id` (or the error triple), which is
//! what makes the at-least-once pipeline safe.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::debug;

/// Fields for persisting one raw telemetry event
#[derive(Debug, Clone)]
pub struct NewQueryFields {
    pub query_id: String,
    pub query_text: String,
    pub agent_type: String,
    pub generated_sql: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<f64>,
}

/// One row of `monitoring.queries`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueryRow {
    pub query_id: String,
    pub query_text: String,
    pub agent_type: String,
    pub generated_sql: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Upsert payload for `monitoring.evaluations`
#[derive(Debug, Clone)]
pub struct EvaluationUpsert {
    pub query_id: String,
    pub query_text: String,
    pub agent_type: String,
    pub complexity: Option<String>,
    pub generated_sql: Option<String>,
    pub ground_truth_sql: Option<String>,
    pub structural_score: f64,
    pub semantic_score: f64,
    pub llm_score: f64,
    pub final_score: f64,
    pub result: String,
    pub confidence: f64,
    pub reasoning: String,
    pub evaluation_data: serde_json::Value,
}

/// Fields for one classified error
#[derive(Debug, Clone)]
pub struct NewErrorFields {
    pub query_id: String,
    pub evaluation_id: Option<i64>,
    pub error_category: String,
    pub error_subcategory: String,
    pub error_message: String,
    pub severity: String,
    pub suggested_fix: Option<String>,
}

/// Upsert payload for `monitoring.drift_monitoring`
#[derive(Debug, Clone)]
pub struct DriftRow {
    pub query_id: String,
    pub query_embedding: Option<Vec<f32>>,
    pub drift_score: f64,
    pub drift_classification: String,
    pub similarity_to_baseline: f64,
    pub is_anomaly: bool,
}

/// A loaded baseline
#[derive(Debug, Clone)]
pub struct BaselineRecord {
    pub agent_type: String,
    pub centroid: Vec<f32>,
    pub num_queries: i32,
    pub version: i32,
}

/// Repository over the monitoring schema
#[derive(Clone, Debug)]
pub struct MonitoringRepository {
    pool: PgPool,
}

impl MonitoringRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // Raw telemetry
    // =========================================================================

    /// Insert a telemetry event. Re-inserting the same `query_id` is a no-op.
    pub async fn insert_query(&self, fields: &NewQueryFields) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitoring.queries
                (query_id, query_text, agent_type, generated_sql, status,
                 error_message, execution_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (query_id) DO NOTHING
            "#,
        )
        .bind(&fields.query_id)
        .bind(&fields.query_text)
        .bind(&fields.agent_type)
        .bind(&fields.generated_sql)
        .bind(&fields.status)
        .bind(&fields.error_message)
        .bind(fields.execution_time_ms)
        .execute(&self.pool)
        .await
        .context("failed to insert telemetry event")?;
        Ok(())
    }

    pub async fn get_query(&self, query_id: &str) -> Result<Option<QueryRow>> {
        sqlx::query_as::<_, QueryRow>(
            r#"
            SELECT query_id, query_text, agent_type, generated_sql, status,
                   error_message, execution_time_ms, created_at
            FROM monitoring.queries
            WHERE query_id = $1
            "#,
        )
        .bind(query_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load query")
    }

    /// True when the agent has any telemetry within the last N minutes.
    pub async fn has_recent_telemetry(
        &self,
        agent_type: &str,
        threshold_minutes: i64,
    ) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM monitoring.queries
                WHERE agent_type = $1
                  AND created_at > NOW() - make_interval(mins => $2)
            )
            "#,
        )
        .bind(agent_type)
        .bind(threshold_minutes as i32)
        .fetch_one(&self.pool)
        .await
        .context("failed to probe recent telemetry")?;
        Ok(exists.0)
    }

    // =========================================================================
    // Evaluations
    // =========================================================================

    /// Upsert the evaluation for one query; returns the evaluation_id.
    pub async fn upsert_evaluation(&self, eval: &EvaluationUpsert) -> Result<i64> {
        let (evaluation_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO monitoring.evaluations (
                query_id, query_text, agent_type, complexity,
                generated_sql, ground_truth_sql,
                structural_score, semantic_score, llm_score,
                final_score, result, confidence,
                reasoning, evaluation_data, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())
            ON CONFLICT (query_id) DO UPDATE SET
                query_text = EXCLUDED.query_text,
                agent_type = EXCLUDED.agent_type,
                complexity = EXCLUDED.complexity,
                generated_sql = EXCLUDED.generated_sql,
                ground_truth_sql = EXCLUDED.ground_truth_sql,
                structural_score = EXCLUDED.structural_score,
                semantic_score = EXCLUDED.semantic_score,
                llm_score = EXCLUDED.llm_score,
                final_score = EXCLUDED.final_score,
                result = EXCLUDED.result,
                confidence = EXCLUDED.confidence,
                reasoning = EXCLUDED.reasoning,
                evaluation_data = EXCLUDED.evaluation_data,
                created_at = EXCLUDED.created_at
            RETURNING evaluation_id
            "#,
        )
        .bind(&eval.query_id)
        .bind(&eval.query_text)
        .bind(&eval.agent_type)
        .bind(&eval.complexity)
        .bind(&eval.generated_sql)
        .bind(&eval.ground_truth_sql)
        .bind(eval.structural_score)
        .bind(eval.semantic_score)
        .bind(eval.llm_score)
        .bind(eval.final_score)
        .bind(&eval.result)
        .bind(eval.confidence)
        .bind(&eval.reasoning)
        .bind(&eval.evaluation_data)
        .fetch_one(&self.pool)
        .await
        .context("failed to upsert evaluation")?;

        debug!("Stored evaluation for {} (id={})", eval.query_id, evaluation_id);
        Ok(evaluation_id)
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Upsert a classified error; duplicates bump the frequency counter.
    pub async fn upsert_error(&self, fields: &NewErrorFields) -> Result<i64> {
        let (error_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO monitoring.errors
                (query_id, evaluation_id, error_category, error_subcategory,
                 error_message, severity, suggested_fix)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (query_id, error_category, error_subcategory) DO UPDATE SET
                frequency_count = errors.frequency_count + 1,
                error_message = EXCLUDED.error_message,
                last_seen = NOW()
            RETURNING error_id
            "#,
        )
        .bind(&fields.query_id)
        .bind(fields.evaluation_id)
        .bind(&fields.error_category)
        .bind(&fields.error_subcategory)
        .bind(&fields.error_message)
        .bind(&fields.severity)
        .bind(&fields.suggested_fix)
        .fetch_one(&self.pool)
        .await
        .context("failed to upsert error")?;
        Ok(error_id)
    }

    // =========================================================================
    // Drift
    // =========================================================================

    pub async fn upsert_drift(&self, row: &DriftRow) -> Result<()> {
        let embedding = row.query_embedding.clone().map(Vector::from);
        sqlx::query(
            r#"
            INSERT INTO monitoring.drift_monitoring
                (query_id, query_embedding, drift_score, drift_classification,
                 similarity_to_baseline, is_anomaly)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (query_id) DO UPDATE SET
                query_embedding = EXCLUDED.query_embedding,
                drift_score = EXCLUDED.drift_score,
                drift_classification = EXCLUDED.drift_classification,
                similarity_to_baseline = EXCLUDED.similarity_to_baseline,
                is_anomaly = EXCLUDED.is_anomaly
            "#,
        )
        .bind(&row.query_id)
        .bind(embedding)
        .bind(row.drift_score)
        .bind(&row.drift_classification)
        .bind(row.similarity_to_baseline)
        .bind(row.is_anomaly)
        .execute(&self.pool)
        .await
        .context("failed to upsert drift record")?;
        Ok(())
    }

    // =========================================================================
    // Baselines
    // =========================================================================

    /// Replace the baseline for an agent, bumping the version.
    pub async fn upsert_baseline(
        &self,
        agent_type: &str,
        centroid: &[f32],
        num_queries: i32,
    ) -> Result<i32> {
        let dimension = centroid.len() as i32;
        let (version,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO monitoring.baseline
                (agent_type, centroid_embedding, embedding_dimension, num_queries, version)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (agent_type) DO UPDATE SET
                centroid_embedding = EXCLUDED.centroid_embedding,
                embedding_dimension = EXCLUDED.embedding_dimension,
                num_queries = EXCLUDED.num_queries,
                version = baseline.version + 1,
                created_at = NOW()
            RETURNING version
            "#,
        )
        .bind(agent_type)
        .bind(Vector::from(centroid.to_vec()))
        .bind(dimension)
        .bind(num_queries)
        .fetch_one(&self.pool)
        .await
        .context("failed to upsert baseline")?;
        Ok(version)
    }

    /// Load the latest baseline for an agent, if any.
    pub async fn latest_baseline(&self, agent_type: &str) -> Result<Option<BaselineRecord>> {
        let row: Option<(String, Vector, i32, i32)> = sqlx::query_as(
            r#"
            SELECT agent_type, centroid_embedding, num_queries, version
            FROM monitoring.baseline
            WHERE agent_type = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(agent_type)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load baseline")?;

        Ok(row.map(|(agent_type, centroid, num_queries, version)| BaselineRecord {
            agent_type,
            centroid: centroid.to_vec(),
            num_queries,
            version,
        }))
    }
}
