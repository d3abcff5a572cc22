//! Read-side aggregation endpoints
//!
//! - GET /api/v1/metrics?agent_type=
//! - GET /api/v1/drift?agent_type=
//! - GET /api/v1/errors?category=&agent_type=&limit=
//! - GET /api/v1/errors/:category
//! - GET /api/v1/history?agent_type=&limit=
//! - GET /api/v1/alerts

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::ApiState;
use crate::error::PlatformError;

#[derive(Debug, Deserialize)]
pub struct AgentFilter {
    pub agent_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorsFilter {
    pub category: Option<String>,
    pub agent_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryFilter {
    pub agent_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

async fn get_metrics(
    State(state): State<ApiState>,
    Query(filter): Query<AgentFilter>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let metrics = &state.services.metrics;
    let agent_type = filter.agent_type.as_deref();

    let overall = metrics.overall_metrics(agent_type).await?;
    let per_agent = metrics.per_agent_metrics().await?;
    let trend = metrics.evaluation_trend(agent_type).await?;

    Ok(Json(json!({
        "overall": overall,
        "per_agent": per_agent,
        "trend_7d": trend,
    })))
}

async fn get_drift(
    State(state): State<ApiState>,
    Query(filter): Query<AgentFilter>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let summary = state
        .services
        .metrics
        .drift_summary(filter.agent_type.as_deref())
        .await?;
    Ok(Json(summary))
}

async fn get_errors(
    State(state): State<ApiState>,
    Query(filter): Query<ErrorsFilter>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let summary = state
        .services
        .metrics
        .error_summary(
            filter.category.as_deref(),
            filter.agent_type.as_deref(),
            filter.limit.clamp(1, 500),
        )
        .await?;
    Ok(Json(summary))
}

async fn get_errors_by_category(
    State(state): State<ApiState>,
    axum::extract::Path(category): axum::extract::Path<String>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let errors = state.services.metrics.errors_by_category(&category).await?;
    Ok(Json(json!({
        "category": category,
        "count": errors.len(),
        "errors": errors,
    })))
}

async fn get_history(
    State(state): State<ApiState>,
    Query(filter): Query<HistoryFilter>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let entries = state
        .services
        .metrics
        .history(filter.agent_type.as_deref(), filter.limit.clamp(1, 1000))
        .await?;
    Ok(Json(json!({ "count": entries.len(), "history": entries })))
}

async fn get_alerts(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let alerts = state.services.metrics.recent_alerts(20).await?;
    Ok(Json(alerts))
}

/// Build the aggregation router.
pub fn create_metrics_router() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/metrics", get(get_metrics))
        .route("/api/v1/drift", get(get_drift))
        .route("/api/v1/errors", get(get_errors))
        .route("/api/v1/errors/:category", get(get_errors_by_category))
        .route("/api/v1/history", get(get_history))
        .route("/api/v1/alerts", get(get_alerts))
}
