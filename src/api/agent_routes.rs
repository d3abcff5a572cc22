//! REST API routes for agent lifecycle
//!
//! - POST   /api/v1/agents/register                  - register + one-time API key
//! - GET    /api/v1/agents                           - list registry
//! - GET    /api/v1/agents/summary                   - registry overview
//! - GET    /api/v1/agents/health                    - health states
//! - GET    /api/v1/agents/:id                       - one agent
//! - DELETE /api/v1/agents/:id                       - delete + monitoring cleanup
//! - POST   /api/v1/agents/:id/refresh               - re-run discovery
//! - POST   /api/v1/agents/:id/retry-ground-truth    - restart generation
//! - POST   /api/v1/agents/:id/scan-schema-changes   - manual schema scan
//! - POST   /api/v1/agents/:id/revalidate            - re-run data validation
//! - POST   /api/v1/agents/:id/regenerate-key        - rotate API key (one-time return)
//! - GET    /api/v1/agents/:id/schema-changes        - schema change history

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ApiState;
use crate::agents::manager::{AgentManager, RegisterAgentInput, ScanSummary};
use crate::database::AgentRow;
use crate::error::PlatformError;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_name: String,
    pub db_url: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub agent_url: Option<String>,
    pub poll_interval_s: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct RegisterAgentResponse {
    pub agent: serde_json::Value,
    pub sdk_snippet: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
}

fn sdk_snippet(agent_name: &str, api_key: &str) -> String {
    format!(
        r#"let telemetry = SentinelClient::new("{api_key}");
telemetry.ingest(TelemetryEvent {{
    query_text: "...",
    status: "success",
    sql: Some("SELECT ..."),
    execution_time_ms: Some(42),
    ..Default::default()
}}).await?; // agent: {agent_name}"#
    )
}

// ============================================================================
// Handlers
// ============================================================================

async fn register_agent(
    State(state): State<ApiState>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<RegisterAgentResponse>), PlatformError> {
    let manager = AgentManager::new(state.services.clone());
    let (row, api_key) = manager
        .register(RegisterAgentInput {
            agent_name: request.agent_name,
            db_url: request.db_url,
            display_name: request.display_name,
            description: request.description,
            agent_url: request.agent_url,
            poll_interval_s: request.poll_interval_s,
        })
        .await?;

    // The raw key rides along exactly once
    let mut agent = serde_json::to_value(&row).unwrap_or_default();
    if let Some(map) = agent.as_object_mut() {
        map.insert("api_key".to_string(), json!(api_key));
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterAgentResponse {
            sdk_snippet: sdk_snippet(&row.agent_name, &api_key),
            agent,
        }),
    ))
}

async fn list_agents(State(state): State<ApiState>) -> Result<Json<Vec<AgentRow>>, PlatformError> {
    Ok(Json(state.services.agents.all().await?))
}

async fn get_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<AgentRow>, PlatformError> {
    state
        .services
        .agents
        .get(agent_id)
        .await?
        .map(Json)
        .ok_or_else(|| PlatformError::NotFound(format!("agent {agent_id}")))
}

async fn delete_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<TriggerResponse>, PlatformError> {
    let deleted = state.services.agents.delete(agent_id).await?;
    if !deleted {
        return Err(PlatformError::NotFound(format!("agent {agent_id}")));
    }
    Ok(Json(TriggerResponse {
        success: true,
        message: "agent and monitoring data removed".into(),
    }))
}

async fn refresh_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<TriggerResponse>, PlatformError> {
    AgentManager::new(state.services.clone())
        .refresh(agent_id)
        .await?;
    Ok(Json(TriggerResponse {
        success: true,
        message: "discovery restarted".into(),
    }))
}

async fn retry_ground_truth(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<TriggerResponse>, PlatformError> {
    let message = AgentManager::new(state.services.clone())
        .retry_ground_truth(agent_id)
        .await?;
    Ok(Json(TriggerResponse {
        success: true,
        message,
    }))
}

async fn scan_schema_changes(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<ScanSummary>, PlatformError> {
    let summary = AgentManager::new(state.services.clone())
        .scan_schema_changes(agent_id)
        .await
        .map_err(PlatformError::Internal)?;
    Ok(Json(summary))
}

async fn revalidate_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<TriggerResponse>, PlatformError> {
    AgentManager::new(state.services.clone())
        .revalidate(agent_id)
        .await?;
    Ok(Json(TriggerResponse {
        success: true,
        message: "validation restarted".into(),
    }))
}

async fn regenerate_key(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let api_key = AgentManager::new(state.services.clone())
        .regenerate_api_key(agent_id)
        .await?;
    Ok(Json(json!({ "api_key": api_key })))
}

async fn schema_change_history(
    State(state): State<ApiState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    state
        .services
        .agents
        .get(agent_id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("agent {agent_id}")))?;
    let changes = state.services.agents.schema_change_history(agent_id, 50).await?;
    Ok(Json(json!({ "count": changes.len(), "changes": changes })))
}

async fn agents_summary(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let agents = state.services.agents.all().await?;
    let total = agents.len();
    let active = agents.iter().filter(|a| a.status == "active").count();
    let errored = agents.iter().filter(|a| a.status == "error").count();
    let gt_ready = agents.iter().filter(|a| a.gt_status == "success").count();

    Ok(Json(json!({
        "total": total,
        "active": active,
        "errored": errored,
        "gt_ready": gt_ready,
        "agents": agents.iter().map(|a| json!({
            "agent_id": a.agent_id,
            "agent_name": a.agent_name,
            "status": a.status,
            "gt_status": a.gt_status,
            "gt_query_count": a.gt_query_count,
            "schema_version": a.schema_version,
            "last_polled_at": a.last_polled_at,
        })).collect::<Vec<_>>(),
    })))
}

async fn agents_health(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let agents = state.services.agents.all().await?;
    Ok(Json(json!({
        "agents": agents.iter().map(|a| json!({
            "agent_id": a.agent_id,
            "agent_name": a.agent_name,
            "health_status": a.health_status,
            "health_detail": a.health_detail,
            "last_health_check_at": a.last_health_check_at,
        })).collect::<Vec<_>>(),
    })))
}

/// Build the agent lifecycle router.
pub fn create_agent_router() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/agents/register", post(register_agent))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/agents/summary", get(agents_summary))
        .route("/api/v1/agents/health", get(agents_health))
        .route("/api/v1/agents/:id", get(get_agent).delete(delete_agent))
        .route("/api/v1/agents/:id/refresh", post(refresh_agent))
        .route(
            "/api/v1/agents/:id/retry-ground-truth",
            post(retry_ground_truth),
        )
        .route(
            "/api/v1/agents/:id/scan-schema-changes",
            post(scan_schema_changes),
        )
        .route("/api/v1/agents/:id/revalidate", post(revalidate_agent))
        .route("/api/v1/agents/:id/regenerate-key", post(regenerate_key))
        .route(
            "/api/v1/agents/:id/schema-changes",
            get(schema_change_history),
        )
}
