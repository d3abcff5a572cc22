//! Read-side aggregations for the dashboard API
//!
//! Pure SELECTs over the monitoring schema; no writes. Shapes mirror what
//! the dashboard consumes, so handlers mostly pass these through.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::collections::BTreeMap;

/// Overall evaluation metrics
#[derive(Debug, Clone, Serialize)]
pub struct OverallMetrics {
    pub total_evaluations: i64,
    pub passed: i64,
    pub failed: i64,
    pub accuracy: f64,
    pub avg_score: f64,
}

/// Per-agent slice of the metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AgentMetrics {
    pub total: i64,
    pub passed: i64,
    pub accuracy: f64,
    pub avg_score: f64,
}

/// One day of the evaluation trend
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub day: NaiveDate,
    pub total: i64,
    pub passed: i64,
    pub avg_score: f64,
}

/// One row of the history endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub query_id: String,
    pub query_text: String,
    pub agent_type: String,
    pub status: String,
    pub generated_sql: Option<String>,
    pub created_at: DateTime<Utc>,
    pub result: Option<String>,
    pub final_score: Option<f64>,
    pub drift_classification: Option<String>,
    pub error_category: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MetricsRepository {
    pool: PgPool,
}

fn pct(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 1000.0).round() / 10.0
    }
}

impl MetricsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Evaluation metrics
    // =========================================================================

    pub async fn overall_metrics(&self, agent_type: Option<&str>) -> Result<OverallMetrics> {
        let (total, passed, avg_score): (i64, i64, Option<f64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN result = 'PASS' THEN 1 ELSE 0 END), 0),
                   AVG(final_score)
            FROM monitoring.evaluations
            WHERE ($1::text IS NULL OR agent_type = $1)
            "#,
        )
        .bind(agent_type)
        .fetch_one(&self.pool)
        .await
        .context("failed to compute overall metrics")?;

        Ok(OverallMetrics {
            total_evaluations: total,
            passed,
            failed: total - passed,
            accuracy: pct(passed, total),
            avg_score: ((avg_score.unwrap_or(0.0)) * 1000.0).round() / 1000.0,
        })
    }

    pub async fn per_agent_metrics(&self) -> Result<BTreeMap<String, AgentMetrics>> {
        let rows: Vec<(String, i64, i64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT agent_type, COUNT(*),
                   COALESCE(SUM(CASE WHEN result = 'PASS' THEN 1 ELSE 0 END), 0),
                   AVG(final_score)
            FROM monitoring.evaluations
            GROUP BY agent_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to compute per-agent metrics")?;

        Ok(rows
            .into_iter()
            .map(|(agent, total, passed, avg)| {
                (
                    agent,
                    AgentMetrics {
                        total,
                        passed,
                        accuracy: pct(passed, total),
                        avg_score: ((avg.unwrap_or(0.0)) * 1000.0).round() / 1000.0,
                    },
                )
            })
            .collect())
    }

    /// Daily evaluation trend for the last 7 days.
    pub async fn evaluation_trend(&self, agent_type: Option<&str>) -> Result<Vec<TrendPoint>> {
        let rows: Vec<(NaiveDate, i64, i64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT created_at::date AS day, COUNT(*),
                   COALESCE(SUM(CASE WHEN result = 'PASS' THEN 1 ELSE 0 END), 0),
                   AVG(final_score)
            FROM monitoring.evaluations
            WHERE created_at > NOW() - INTERVAL '7 days'
              AND ($1::text IS NULL OR agent_type = $1)
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(agent_type)
        .fetch_all(&self.pool)
        .await
        .context("failed to compute evaluation trend")?;

        Ok(rows
            .into_iter()
            .map(|(day, total, passed, avg)| TrendPoint {
                day,
                total,
                passed,
                avg_score: ((avg.unwrap_or(0.0)) * 1000.0).round() / 1000.0,
            })
            .collect())
    }

    // =========================================================================
    // Drift
    // =========================================================================

    pub async fn drift_summary(&self, agent_type: Option<&str>) -> Result<serde_json::Value> {
        let distribution: Vec<(String, i64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT LOWER(d.drift_classification), COUNT(*), AVG(d.drift_score)
            FROM monitoring.drift_monitoring d
            JOIN monitoring.queries q ON q.query_id = d.query_id
            WHERE ($1::text IS NULL OR q.agent_type = $1)
            GROUP BY LOWER(d.drift_classification)
            ORDER BY LOWER(d.drift_classification)
            "#,
        )
        .bind(agent_type)
        .fetch_all(&self.pool)
        .await
        .context("failed to compute drift distribution")?;

        let (anomalies,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM monitoring.drift_monitoring d
            JOIN monitoring.queries q ON q.query_id = d.query_id
            WHERE d.is_anomaly = TRUE
              AND ($1::text IS NULL OR q.agent_type = $1)
            "#,
        )
        .bind(agent_type)
        .fetch_one(&self.pool)
        .await?;

        let high_samples: Vec<(String, f64, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT d.query_id, d.drift_score, d.drift_classification,
                   q.query_text, q.generated_sql
            FROM monitoring.drift_monitoring d
            JOIN monitoring.queries q ON q.query_id = d.query_id
            WHERE LOWER(d.drift_classification) = 'high'
              AND ($1::text IS NULL OR q.agent_type = $1)
            ORDER BY d.drift_score DESC
            LIMIT 5
            "#,
        )
        .bind(agent_type)
        .fetch_all(&self.pool)
        .await?;

        let daily_trend: Vec<(NaiveDate, i64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT d.created_at::date AS day, COUNT(*), AVG(d.drift_score)
            FROM monitoring.drift_monitoring d
            JOIN monitoring.queries q ON q.query_id = d.query_id
            WHERE d.created_at > NOW() - INTERVAL '7 days'
              AND ($1::text IS NULL OR q.agent_type = $1)
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(agent_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(json!({
            "distribution": distribution.into_iter().map(|(class, count, avg)| {
                (class, json!({
                    "count": count,
                    "avg_drift_score": ((avg.unwrap_or(0.0)) * 1000.0).round() / 1000.0,
                }))
            }).collect::<BTreeMap<_, _>>(),
            "total_anomalies": anomalies,
            "high_drift_samples": high_samples.into_iter().map(|(id, score, class, text, sql)| json!({
                "query_id": id,
                "drift_score": (score * 1000.0).round() / 1000.0,
                "classification": class,
                "query_text": text,
                "generated_sql": sql,
            })).collect::<Vec<_>>(),
            "daily_trend": daily_trend.into_iter().map(|(day, count, avg)| json!({
                "day": day,
                "count": count,
                "avg_drift_score": ((avg.unwrap_or(0.0)) * 1000.0).round() / 1000.0,
            })).collect::<Vec<_>>(),
        }))
    }

    // =========================================================================
    // Errors
    // =========================================================================

    pub async fn error_summary(
        &self,
        category: Option<&str>,
        agent_type: Option<&str>,
        limit: i64,
    ) -> Result<serde_json::Value> {
        let categories: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT e.error_category, e.severity, COUNT(*)
            FROM monitoring.errors e
            JOIN monitoring.queries q ON q.query_id = e.query_id
            WHERE ($1::text IS NULL OR q.agent_type = $1)
            GROUP BY e.error_category, e.severity
            ORDER BY e.error_category, e.severity
            "#,
        )
        .bind(agent_type)
        .fetch_all(&self.pool)
        .await
        .context("failed to compute error summary")?;

        let mut by_category: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let mut total: i64 = 0;
        for (cat, severity, count) in categories {
            total += count;
            let entry = by_category
                .entry(cat)
                .or_insert_with(|| json!({"count": 0, "severities": {}}));
            entry["count"] = json!(entry["count"].as_i64().unwrap_or(0) + count);
            entry["severities"][severity] = json!(count);
        }

        let recent: Vec<(String, String, Option<String>, String, i32, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT e.query_id, e.error_category, e.error_message, e.severity,
                       e.frequency_count, e.first_seen
                FROM monitoring.errors e
                JOIN monitoring.queries q ON q.query_id = e.query_id
                WHERE ($1::text IS NULL OR e.error_category = $1)
                  AND ($2::text IS NULL OR q.agent_type = $2)
                ORDER BY e.last_seen DESC
                LIMIT $3
                "#,
            )
            .bind(category)
            .bind(agent_type)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(json!({
            "total_errors": total,
            "categories": by_category,
            "recent_errors": recent.into_iter().map(|(id, cat, msg, sev, freq, seen)| json!({
                "query_id": id,
                "category": cat,
                "message": msg,
                "severity": sev,
                "frequency_count": freq,
                "first_seen": seen,
            })).collect::<Vec<_>>(),
        }))
    }

    /// Every error in one category, with suggested fixes, newest first.
    pub async fn errors_by_category(&self, category: &str) -> Result<Vec<serde_json::Value>> {
        let rows: Vec<(String, Option<String>, String, Option<String>, i32, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT query_id, error_message, severity, suggested_fix,
                       frequency_count, first_seen
                FROM monitoring.errors
                WHERE error_category = $1
                ORDER BY first_seen DESC
                "#,
            )
            .bind(category)
            .fetch_all(&self.pool)
            .await
            .context("failed to load errors by category")?;

        Ok(rows
            .into_iter()
            .map(|(id, msg, sev, fix, freq, seen)| {
                json!({
                    "query_id": id,
                    "message": msg,
                    "severity": sev,
                    "suggested_fix": fix,
                    "frequency_count": freq,
                    "first_seen": seen,
                })
            })
            .collect())
    }

    // =========================================================================
    // History + run detail
    // =========================================================================

    /// Deduplicated join of queries × evaluations × drift × errors.
    pub async fn history(
        &self,
        agent_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>> {
        type Row = (
            String,
            String,
            String,
            String,
            Option<String>,
            DateTime<Utc>,
            Option<String>,
            Option<f64>,
            Option<String>,
            Option<String>,
        );
        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT q.query_id, q.query_text, q.agent_type, q.status, q.generated_sql,
                   q.created_at, e.result, e.final_score, d.drift_classification,
                   (SELECT er.error_category FROM monitoring.errors er
                    WHERE er.query_id = q.query_id
                    ORDER BY er.last_seen DESC LIMIT 1)
            FROM monitoring.queries q
            LEFT JOIN monitoring.evaluations e ON e.query_id = q.query_id
            LEFT JOIN monitoring.drift_monitoring d ON d.query_id = q.query_id
            WHERE ($1::text IS NULL OR q.agent_type = $1)
            ORDER BY q.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(agent_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load history")?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    query_id,
                    query_text,
                    agent_type,
                    status,
                    generated_sql,
                    created_at,
                    result,
                    final_score,
                    drift_classification,
                    error_category,
                )| HistoryEntry {
                    query_id,
                    query_text,
                    agent_type,
                    status,
                    generated_sql,
                    created_at,
                    result,
                    final_score,
                    drift_classification,
                    error_category,
                },
            )
            .collect())
    }

    /// The complete record for one query, evaluation_data included.
    pub async fn run_detail(&self, query_id: &str) -> Result<Option<serde_json::Value>> {
        type Row = (
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            DateTime<Utc>,
            Option<String>,
            Option<f64>,
            Option<f64>,
            Option<String>,
            Option<serde_json::Value>,
            Option<String>,
            Option<f64>,
            Option<bool>,
        );
        let row: Option<Row> = sqlx::query_as(
            r#"
            SELECT q.query_id, q.query_text, q.agent_type, q.status,
                   q.generated_sql, q.error_message, q.created_at,
                   e.result, e.final_score, e.confidence, e.reasoning, e.evaluation_data,
                   d.drift_classification, d.drift_score, d.is_anomaly
            FROM monitoring.queries q
            LEFT JOIN monitoring.evaluations e ON e.query_id = q.query_id
            LEFT JOIN monitoring.drift_monitoring d ON d.query_id = q.query_id
            WHERE q.query_id = $1
            "#,
        )
        .bind(query_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load run detail")?;

        let Some(row) = row else { return Ok(None) };
        let errors: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT error_category, error_subcategory, error_message, severity
            FROM monitoring.errors
            WHERE query_id = $1
            ORDER BY last_seen DESC
            "#,
        )
        .bind(query_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(json!({
            "query_id": row.0,
            "query_text": row.1,
            "agent_type": row.2,
            "status": row.3,
            "generated_sql": row.4,
            "error_message": row.5,
            "created_at": row.6,
            "evaluation": {
                "result": row.7,
                "final_score": row.8,
                "confidence": row.9,
                "reasoning": row.10,
                "evaluation_data": row.11,
            },
            "drift": {
                "classification": row.12,
                "drift_score": row.13,
                "is_anomaly": row.14,
            },
            "errors": errors.into_iter().map(|(cat, sub, msg, sev)| json!({
                "category": cat,
                "subcategory": sub,
                "message": msg,
                "severity": sev,
            })).collect::<Vec<_>>(),
        })))
    }

    /// Recent alert-worthy events derived from the monitoring tables.
    pub async fn recent_alerts(&self, limit: i64) -> Result<serde_json::Value> {
        let high_drift: Vec<(String, f64, DateTime<Utc>, String)> = sqlx::query_as(
            r#"
            SELECT d.query_id, d.drift_score, d.created_at, q.agent_type
            FROM monitoring.drift_monitoring d
            JOIN monitoring.queries q ON q.query_id = d.query_id
            WHERE LOWER(d.drift_classification) = 'high'
            ORDER BY d.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load drift alerts")?;

        let critical_errors: Vec<(String, String, Option<String>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT query_id, error_category, error_message, last_seen
                FROM monitoring.errors
                WHERE severity = 'critical'
                ORDER BY last_seen DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(json!({
            "high_drift": high_drift.into_iter().map(|(id, score, at, agent)| json!({
                "query_id": id,
                "drift_score": (score * 1000.0).round() / 1000.0,
                "agent_type": agent,
                "detected_at": at,
            })).collect::<Vec<_>>(),
            "critical_errors": critical_errors.into_iter().map(|(id, cat, msg, at)| json!({
                "query_id": id,
                "category": cat,
                "message": msg,
                "last_seen": at,
            })).collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct() {
        assert_eq!(pct(0, 0), 0.0);
        assert_eq!(pct(1, 2), 50.0);
        assert_eq!(pct(1, 3), 33.3);
    }
}
