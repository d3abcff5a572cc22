//! Read-only SQL execution against agent databases
//!
//! Every execution opens a fresh connection, applies a statement timeout,
//! caps the fetched row count, and normalizes cells into [`SqlValue`].
//! Only SELECT / WITH statements are accepted.

use std::time::{Duration, Instant};

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tracing::warn;

use super::{sqlite_path, AgentDbKind, SqlValue};

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "GRANT", "REVOKE",
];

/// Outcome of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub row_count: usize,
    pub error: Option<String>,
    pub execution_time_ms: f64,
}

impl ExecutionResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
            execution_time_ms: 0.0,
        }
    }
}

/// Safe SQL executor with timeout and row cap
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    timeout: Duration,
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(timeout: Duration, max_rows: usize) -> Self {
        Self { timeout, max_rows }
    }

    /// Execute one read-only statement against the agent DB at `db_url`.
    pub async fn execute(&self, sql: &str, db_url: &str) -> ExecutionResult {
        if !is_read_only(sql) {
            return ExecutionResult::failed(
                "query contains unsafe operations (only SELECT allowed)",
            );
        }

        let kind = match AgentDbKind::from_url(db_url) {
            Ok(kind) => kind,
            Err(e) => return ExecutionResult::failed(e.to_string()),
        };

        let run = async {
            match kind {
                AgentDbKind::Postgres => self.execute_postgres(sql, db_url).await,
                AgentDbKind::MySql => self.execute_mysql(sql, db_url).await,
                AgentDbKind::Sqlite => self.execute_sqlite(sql, db_url).await,
                AgentDbKind::MongoDb => {
                    anyhow::bail!("query execution is not supported for document stores")
                }
            }
        };

        match tokio::time::timeout(self.timeout + Duration::from_secs(1), run).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Query execution failed: {e}");
                ExecutionResult::failed(e.to_string())
            }
            Err(_) => ExecutionResult::failed(format!(
                "query timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }

    async fn execute_postgres(&self, sql: &str, db_url: &str) -> Result<ExecutionResult> {
        let start = Instant::now();
        let mut conn = PgConnection::connect(db_url).await?;

        sqlx::query(&format!(
            "SET statement_timeout = {}",
            self.timeout.as_millis()
        ))
        .execute(&mut conn)
        .await?;

        let rows: Vec<PgRow> = sqlx::query(sql).fetch_all(&mut conn).await?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let data: Vec<Vec<SqlValue>> = rows
            .iter()
            .take(self.max_rows)
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| decode_pg_value(row, i))
                    .collect()
            })
            .collect();

        let row_count = data.len();
        Ok(ExecutionResult {
            success: true,
            columns,
            rows: data,
            row_count,
            error: None,
            execution_time_ms: elapsed,
        })
    }

    async fn execute_mysql(&self, sql: &str, db_url: &str) -> Result<ExecutionResult> {
        let start = Instant::now();
        let mut conn = MySqlConnection::connect(db_url).await?;

        sqlx::query(&format!(
            "SET SESSION max_execution_time = {}",
            self.timeout.as_millis()
        ))
        .execute(&mut conn)
        .await
        .ok();

        let rows: Vec<MySqlRow> = sqlx::query(sql).fetch_all(&mut conn).await?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let data: Vec<Vec<SqlValue>> = rows
            .iter()
            .take(self.max_rows)
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| decode_mysql_value(row, i))
                    .collect()
            })
            .collect();

        let row_count = data.len();
        Ok(ExecutionResult {
            success: true,
            columns,
            rows: data,
            row_count,
            error: None,
            execution_time_ms: elapsed,
        })
    }

    async fn execute_sqlite(&self, sql: &str, db_url: &str) -> Result<ExecutionResult> {
        let start = Instant::now();
        let path = sqlite_path(db_url);
        let mut conn = SqliteConnection::connect(&format!("sqlite://{path}?mode=ro")).await?;

        let rows: Vec<SqliteRow> = sqlx::query(sql).fetch_all(&mut conn).await?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let data: Vec<Vec<SqlValue>> = rows
            .iter()
            .take(self.max_rows)
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| decode_sqlite_value(row, i))
                    .collect()
            })
            .collect();

        let row_count = data.len();
        Ok(ExecutionResult {
            success: true,
            columns,
            rows: data,
            row_count,
            error: None,
            execution_time_ms: elapsed,
        })
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 10_000)
    }
}

/// Only SELECT and WITH (CTE) statements may touch agent databases.
pub fn is_read_only(sql: &str) -> bool {
    let upper = sql.trim().to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return false;
    }
    !WRITE_KEYWORDS
        .iter()
        .any(|kw| upper.split(|c: char| !c.is_ascii_alphanumeric()).any(|tok| tok == *kw))
}

fn decode_pg_value(row: &PgRow, idx: usize) -> SqlValue {
    let raw = match row.try_get_raw(idx) {
        Ok(raw) => raw,
        Err(_) => return SqlValue::Null,
    };
    if raw.is_null() {
        return SqlValue::Null;
    }
    let type_name = raw.type_info().name().to_uppercase();

    match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(idx).map(SqlValue::Bool),
        "INT2" => row.try_get::<i16, _>(idx).map(|v| SqlValue::Int(v as i64)),
        "INT4" => row.try_get::<i32, _>(idx).map(|v| SqlValue::Int(v as i64)),
        "INT8" => row.try_get::<i64, _>(idx).map(SqlValue::Int),
        "FLOAT4" => row.try_get::<f32, _>(idx).map(|v| SqlValue::Float(v as f64)),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(SqlValue::Float),
        "NUMERIC" => row
            .try_get::<Decimal, _>(idx)
            .map(|d| SqlValue::Float(d.to_f64().unwrap_or(0.0))),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(SqlValue::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(SqlValue::from_utc),
        "DATE" => row.try_get::<chrono::NaiveDate, _>(idx).map(SqlValue::Date),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(idx)
            .map(|u| SqlValue::Text(u.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<serde_json::Value, _>(idx)
            .map(|v| SqlValue::Text(v.to_string())),
        _ => row.try_get::<String, _>(idx).map(SqlValue::Text),
    }
    .unwrap_or(SqlValue::Null)
}

fn decode_mysql_value(row: &MySqlRow, idx: usize) -> SqlValue {
    let raw = match row.try_get_raw(idx) {
        Ok(raw) => raw,
        Err(_) => return SqlValue::Null,
    };
    if raw.is_null() {
        return SqlValue::Null;
    }
    let type_name = raw.type_info().name().to_uppercase();

    match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(SqlValue::Bool),
        "TINYINT" => row.try_get::<i8, _>(idx).map(|v| SqlValue::Int(v as i64)),
        "SMALLINT" => row.try_get::<i16, _>(idx).map(|v| SqlValue::Int(v as i64)),
        "INT" | "MEDIUMINT" => row.try_get::<i32, _>(idx).map(|v| SqlValue::Int(v as i64)),
        "BIGINT" => row.try_get::<i64, _>(idx).map(SqlValue::Int),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "INT UNSIGNED" | "BIGINT UNSIGNED" => row
            .try_get::<u64, _>(idx)
            .map(|v| SqlValue::Int(v as i64)),
        "FLOAT" => row.try_get::<f32, _>(idx).map(|v| SqlValue::Float(v as f64)),
        "DOUBLE" => row.try_get::<f64, _>(idx).map(SqlValue::Float),
        "DECIMAL" => row
            .try_get::<Decimal, _>(idx)
            .map(|d| SqlValue::Float(d.to_f64().unwrap_or(0.0))),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(SqlValue::Timestamp),
        "DATE" => row.try_get::<chrono::NaiveDate, _>(idx).map(SqlValue::Date),
        _ => row.try_get::<String, _>(idx).map(SqlValue::Text),
    }
    .unwrap_or(SqlValue::Null)
}

fn decode_sqlite_value(row: &SqliteRow, idx: usize) -> SqlValue {
    let raw = match row.try_get_raw(idx) {
        Ok(raw) => raw,
        Err(_) => return SqlValue::Null,
    };
    if raw.is_null() {
        return SqlValue::Null;
    }
    let type_name = raw.type_info().name().to_uppercase();

    match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(SqlValue::Bool),
        "INTEGER" => row.try_get::<i64, _>(idx).map(SqlValue::Int),
        "REAL" => row.try_get::<f64, _>(idx).map(SqlValue::Float),
        "DATETIME" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(SqlValue::Timestamp),
        "DATE" => row.try_get::<chrono::NaiveDate, _>(idx).map(SqlValue::Date),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(|b| SqlValue::Text(hex::encode(b))),
        _ => row.try_get::<String, _>(idx).map(SqlValue::Text),
    }
    .unwrap_or(SqlValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_read_only() {
        assert!(is_read_only("SELECT * FROM products"));
        assert!(is_read_only("  with t as (select 1) select * from t"));
    }

    #[test]
    fn test_writes_rejected() {
        assert!(!is_read_only("DELETE FROM products"));
        assert!(!is_read_only("SELECT 1; DROP TABLE products"));
        assert!(!is_read_only("INSERT INTO t VALUES (1)"));
        assert!(!is_read_only("WITH t AS (SELECT 1) UPDATE x SET y = 1"));
    }

    #[test]
    fn test_keyword_must_be_a_token() {
        // Column/table names containing a keyword substring are fine
        assert!(is_read_only("SELECT created_at FROM updates_log"));
        assert!(is_read_only("SELECT inserted_count FROM stats"));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_fails_cleanly() {
        let exec = QueryExecutor::default();
        let result = exec.execute("SELECT 1", "redis://localhost").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unsupported"));
    }

    #[tokio::test]
    async fn test_mongo_execution_rejected() {
        let exec = QueryExecutor::default();
        let result = exec.execute("SELECT 1", "mongodb://localhost/db").await;
        assert!(!result.success);
    }
}
