//! Platform database access
//!
//! One bounded Postgres pool for the platform's own metadata; repositories
//! wrap it per aggregate. External agent databases never go through here
//! (see [`crate::agentdb`]).

pub mod agent_repository;
pub mod metrics_repository;
pub mod migrations;
pub mod monitoring_repository;

pub use agent_repository::{AgentRepository, AgentRow, NewAgentFields, QueryLogConfigRow};
pub use metrics_repository::MetricsRepository;
pub use monitoring_repository::{
    DriftRow, EvaluationUpsert, MonitoringRepository, NewErrorFields, NewQueryFields,
};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::Settings;

/// Connect the platform pool (min 1 / max 20 connections).
pub async fn connect_pool(settings: &Settings) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&settings.database_url())
        .await
        .context("failed to connect to platform database")?;

    tracing::info!(
        "Platform database pool ready ({}:{}/{})",
        settings.db_host,
        settings.db_port,
        settings.db_name
    );
    Ok(pool)
}

/// Liveness probe used by `GET /health`.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("platform database ping failed")?;
    Ok(())
}
