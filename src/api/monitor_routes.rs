//! Telemetry ingest + monitoring actions
//!
//! - POST /api/v1/monitor/ingest/sdk   - authenticated SDK ingest (X-API-Key)
//! - POST /api/v1/baseline/update      - rebuild a drift baseline
//! - POST /api/v1/execute-sql          - run a read-only statement on an agent DB
//! - GET  /api/v1/monitor/runs/:id     - full per-query record

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use super::ApiState;
use crate::agentdb::{executor::is_read_only, QueryExecutor};
use crate::auth::hash_api_key;
use crate::database::NewQueryFields;
use crate::error::PlatformError;
use crate::pipeline::{self, TelemetryEvent};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub query_text: String,
    /// Ignored: the authoritative agent name comes from the API key
    #[serde(default)]
    pub agent_type: Option<String>,
    pub status: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub query_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BaselineUpdateRequest {
    pub agent_type: String,
    pub queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteSqlRequest {
    pub sql: String,
    pub agent_type: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// SDK ingest: authenticate by API key, persist the raw event
/// synchronously, enqueue the background pipeline, respond immediately.
async fn ingest_sdk(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, PlatformError> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PlatformError::Unauthorized("missing X-API-Key header".into()))?;

    let agent = state
        .services
        .agents
        .get_by_api_key_hash(&hash_api_key(api_key))
        .await?
        .ok_or_else(|| PlatformError::Unauthorized("invalid API key".into()))?;

    let query_id = format!(
        "INGEST-{}-{}",
        agent.agent_name.to_uppercase(),
        &Uuid::new_v4().simple().to_string()[..8]
    );

    // Synchronous insert: a failure here is the only 500 this endpoint
    // can produce.
    state
        .services
        .monitoring
        .insert_query(&NewQueryFields {
            query_id: query_id.clone(),
            query_text: request.query_text.clone(),
            agent_type: agent.agent_name.clone(),
            generated_sql: request.sql.clone(),
            status: request.status.clone(),
            error_message: request.error.clone(),
            execution_time_ms: request.execution_time_ms,
        })
        .await
        .map_err(PlatformError::Internal)?;

    pipeline::spawn(
        state.services.clone(),
        TelemetryEvent {
            query_id: query_id.clone(),
            query_text: request.query_text,
            agent_type: agent.agent_name,
            status: request.status,
            generated_sql: request.sql,
            error_message: request.error,
        },
    );

    Ok(Json(IngestResponse {
        status: "ingested",
        query_id,
    }))
}

/// Rebuild the drift baseline for one agent from the supplied queries.
async fn update_baseline(
    State(state): State<ApiState>,
    Json(request): Json<BaselineUpdateRequest>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    if request.queries.is_empty() {
        return Err(PlatformError::BadRequest(
            "queries must not be empty".into(),
        ));
    }
    let agent = state
        .services
        .agents
        .get_by_name(&request.agent_type)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("agent '{}'", request.agent_type)))?;

    let version = state
        .services
        .drift_detector()
        .create_baseline(&agent.agent_name, &request.queries)
        .await
        .map_err(PlatformError::Internal)?;

    Ok(Json(json!({
        "status": "ok",
        "agent_type": agent.agent_name,
        "num_queries": request.queries.len(),
        "version": version,
    })))
}

/// Run a read-only statement against an agent's database and return the
/// normalized rows (first 100).
async fn execute_sql(
    State(state): State<ApiState>,
    Json(request): Json<ExecuteSqlRequest>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    if !is_read_only(&request.sql) {
        return Err(PlatformError::BadRequest(
            "only SELECT/CTE statements are allowed".into(),
        ));
    }
    let agent = state
        .services
        .agents
        .get_by_name(&request.agent_type)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("agent '{}'", request.agent_type)))?;

    let executor = QueryExecutor::new(Duration::from_secs(10), 100);
    let result = executor.execute(&request.sql, &agent.db_url).await;

    Ok(Json(json!({
        "success": result.success,
        "columns": result.columns,
        "rows": result.rows,
        "row_count": result.row_count,
        "execution_time_ms": result.execution_time_ms,
        "error": result.error,
    })))
}

/// Full record for one query, including the evaluation_data sub-structure.
async fn run_detail(
    State(state): State<ApiState>,
    Path(query_id): Path<String>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    state
        .services
        .metrics
        .run_detail(&query_id)
        .await
        .map_err(PlatformError::Internal)?
        .map(Json)
        .ok_or_else(|| PlatformError::NotFound(format!("query {query_id}")))
}

/// Build the monitoring router. The ingest route authenticates itself via
/// API key; the rest are operator endpoints.
pub fn create_monitor_router() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/monitor/ingest/sdk", post(ingest_sdk))
        .route("/api/v1/baseline/update", post(update_baseline))
        .route("/api/v1/execute-sql", post(execute_sql))
        .route("/api/v1/monitor/runs/:query_id", get(run_detail))
}
