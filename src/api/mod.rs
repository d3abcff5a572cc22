//! REST API routers
//!
//! Routers are composed here and mounted by the web binary. Authentication
//! is bimodal: operator endpoints take an Azure AD bearer token (when
//! enabled), the SDK ingest endpoint authenticates by `X-API-Key`.

pub mod agent_routes;
pub mod auth_layer;
pub mod metrics_routes;
pub mod monitor_routes;

pub use agent_routes::create_agent_router;
pub use metrics_routes::create_metrics_router;
pub use monitor_routes::create_monitor_router;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use crate::auth::AzureAdValidator;
use crate::context::Services;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub services: Arc<Services>,
    pub auth: Option<Arc<AzureAdValidator>>,
}

impl ApiState {
    pub fn new(services: Arc<Services>) -> Self {
        let auth = if services.settings.auth_enabled {
            match (
                services.settings.azure_ad_tenant_id.as_deref(),
                services.settings.azure_ad_audience.as_deref(),
            ) {
                (Some(tenant), Some(audience)) => {
                    Some(Arc::new(AzureAdValidator::new(tenant, audience)))
                }
                _ => None,
            }
        } else {
            None
        };
        Self { services, auth }
    }
}

/// Liveness probe: process up + platform DB reachable.
async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let database_connected = crate::database::ping(&state.services.pool).await.is_ok();
    Json(serde_json::json!({
        "status": if database_connected { "ok" } else { "degraded" },
        "database_connected": database_connected,
    }))
}

/// Router for the unauthenticated liveness endpoint.
pub fn create_health_router() -> Router<ApiState> {
    Router::new().route("/health", get(health))
}
