//! Idempotent schema setup
//!
//! Run once at startup; failure here aborts the process. Two schemas:
//! `platform` (agent registry + discovery metadata) and `monitoring`
//! (telemetry and derived rows). Vector columns are created at the
//! configured embedding dimension - changing the dimension against an
//! existing database requires baseline regeneration, which the drift
//! detector's dimension guard enforces at read time.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

/// Create extensions, schemas, tables and indexes.
pub async fn run(pool: &PgPool, embedding_dimension: usize) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
        .context("failed to install pgvector extension")?;

    for schema in ["platform", "monitoring"] {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(pool)
            .await
            .with_context(|| format!("failed to create schema {schema}"))?;
    }

    let statements = table_statements(embedding_dimension);
    for stmt in statements {
        sqlx::query(stmt.trim())
            .execute(pool)
            .await
            .with_context(|| format!("migration statement failed:\n{stmt}"))?;
    }

    info!("Database migrations complete (vector dimension {embedding_dimension})");
    Ok(())
}

fn table_statements(dim: usize) -> Vec<String> {
    let mut stmts: Vec<String> = vec![
        r#"
        CREATE TABLE IF NOT EXISTS platform.agents (
            agent_id BIGSERIAL PRIMARY KEY,
            agent_name TEXT NOT NULL UNIQUE,
            display_name TEXT,
            description TEXT,
            db_url TEXT NOT NULL,
            agent_url TEXT,
            poll_interval_s INTEGER NOT NULL DEFAULT 30,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT,
            last_polled_at TIMESTAMPTZ,
            api_key_hash TEXT NOT NULL,
            api_key_prefix TEXT NOT NULL,
            gt_status TEXT NOT NULL DEFAULT 'pending',
            gt_error TEXT,
            gt_generated_at TIMESTAMPTZ,
            gt_query_count INTEGER NOT NULL DEFAULT 0,
            gt_retry_count INTEGER NOT NULL DEFAULT 0,
            gt_last_retry_at TIMESTAMPTZ,
            schema_version INTEGER NOT NULL DEFAULT 0,
            last_schema_scan_at TIMESTAMPTZ,
            schema_change_count INTEGER NOT NULL DEFAULT 0,
            health_status TEXT NOT NULL DEFAULT 'unknown',
            health_detail TEXT,
            last_health_check_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS platform.discovered_schemas (
            discovery_id BIGSERIAL PRIMARY KEY,
            agent_id BIGINT NOT NULL REFERENCES platform.agents(agent_id) ON DELETE CASCADE,
            schema_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            data_type TEXT,
            is_nullable BOOLEAN NOT NULL DEFAULT TRUE,
            discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (agent_id, schema_name, table_name, column_name)
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS platform.query_log_config (
            config_id BIGSERIAL PRIMARY KEY,
            agent_id BIGINT NOT NULL UNIQUE REFERENCES platform.agents(agent_id) ON DELETE CASCADE,
            schema_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            query_text_column TEXT NOT NULL,
            sql_column TEXT NOT NULL,
            timestamp_column TEXT NOT NULL,
            status_column TEXT,
            error_column TEXT,
            id_column TEXT,
            last_seen_timestamp TIMESTAMPTZ,
            last_seen_id BIGINT
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS platform.schema_changes (
            change_id BIGSERIAL PRIMARY KEY,
            agent_id BIGINT NOT NULL REFERENCES platform.agents(agent_id) ON DELETE CASCADE,
            change_type TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            column_name TEXT,
            data_type TEXT,
            detected_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            gt_generated BOOLEAN NOT NULL DEFAULT FALSE,
            gt_query_count INTEGER
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS platform.data_quality_issues (
            issue_id BIGSERIAL PRIMARY KEY,
            agent_id BIGINT NOT NULL REFERENCES platform.agents(agent_id) ON DELETE CASCADE,
            schema_name TEXT,
            table_name TEXT,
            column_name TEXT,
            issue_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            message TEXT,
            details JSONB,
            affected_rows BIGINT,
            total_rows BIGINT,
            percentage DOUBLE PRECISION,
            detected_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS monitoring.queries (
            query_id TEXT PRIMARY KEY,
            query_text TEXT NOT NULL,
            agent_type TEXT NOT NULL,
            generated_sql TEXT,
            status TEXT NOT NULL,
            error_message TEXT,
            execution_time_ms DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS monitoring.evaluations (
            evaluation_id BIGSERIAL PRIMARY KEY,
            query_id TEXT NOT NULL UNIQUE REFERENCES monitoring.queries(query_id),
            query_text TEXT NOT NULL,
            agent_type TEXT NOT NULL,
            complexity TEXT,
            generated_sql TEXT,
            ground_truth_sql TEXT,
            structural_score DOUBLE PRECISION,
            semantic_score DOUBLE PRECISION,
            llm_score DOUBLE PRECISION,
            final_score DOUBLE PRECISION,
            result TEXT NOT NULL,
            confidence DOUBLE PRECISION,
            reasoning TEXT,
            evaluation_data JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS monitoring.errors (
            error_id BIGSERIAL PRIMARY KEY,
            evaluation_id BIGINT REFERENCES monitoring.evaluations(evaluation_id),
            query_id TEXT NOT NULL REFERENCES monitoring.queries(query_id),
            error_category TEXT NOT NULL,
            error_subcategory TEXT NOT NULL DEFAULT '',
            error_message TEXT,
            severity TEXT NOT NULL,
            suggested_fix TEXT,
            frequency_count INTEGER NOT NULL DEFAULT 1,
            first_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (query_id, error_category, error_subcategory)
        )
        "#
        .to_string(),
        format!(
            r#"
        CREATE TABLE IF NOT EXISTS monitoring.drift_monitoring (
            drift_id BIGSERIAL PRIMARY KEY,
            query_id TEXT NOT NULL UNIQUE REFERENCES monitoring.queries(query_id),
            query_embedding VECTOR({dim}),
            drift_score DOUBLE PRECISION NOT NULL DEFAULT 0,
            drift_classification TEXT NOT NULL,
            similarity_to_baseline DOUBLE PRECISION NOT NULL DEFAULT 0,
            is_anomaly BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        ),
        format!(
            r#"
        CREATE TABLE IF NOT EXISTS monitoring.baseline (
            baseline_id BIGSERIAL PRIMARY KEY,
            agent_type TEXT NOT NULL UNIQUE,
            centroid_embedding VECTOR({dim}),
            embedding_dimension INTEGER NOT NULL DEFAULT {dim},
            num_queries INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        ),
    ];

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_queries_agent ON monitoring.queries(agent_type)",
        "CREATE INDEX IF NOT EXISTS idx_queries_created ON monitoring.queries(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_eval_result ON monitoring.evaluations(result)",
        "CREATE INDEX IF NOT EXISTS idx_eval_agent ON monitoring.evaluations(agent_type)",
        "CREATE INDEX IF NOT EXISTS idx_errors_category ON monitoring.errors(error_category)",
        "CREATE INDEX IF NOT EXISTS idx_drift_score ON monitoring.drift_monitoring(drift_score)",
        "CREATE INDEX IF NOT EXISTS idx_schema_changes_agent ON platform.schema_changes(agent_id)",
    ];
    stmts.extend(indexes.iter().map(|s| s.to_string()));
    stmts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_dimension_interpolated() {
        let stmts = table_statements(384);
        let drift = stmts.iter().find(|s| s.contains("drift_monitoring")).unwrap();
        assert!(drift.contains("VECTOR(384)"));
        let baseline = stmts.iter().find(|s| s.contains("monitoring.baseline")).unwrap();
        assert!(baseline.contains("VECTOR(384)"));
    }

    #[test]
    fn test_upsert_targets_have_unique_constraints() {
        let stmts = table_statements(1024);
        let evals = stmts.iter().find(|s| s.contains("monitoring.evaluations")).unwrap();
        assert!(evals.contains("UNIQUE"));
        let errors = stmts.iter().find(|s| s.contains("monitoring.errors")).unwrap();
        assert!(errors.contains("UNIQUE (query_id, error_category, error_subcategory)"));
    }
}
