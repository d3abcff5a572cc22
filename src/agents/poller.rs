//! Telemetry poller over external agent databases
//!
//! A 5-second cycle dispatches each active agent whose poll interval has
//! elapsed: read new rows from its configured query-log table above the
//! watermark (ascending, capped at 100), feed each through the same
//! background pipeline as SDK ingest, then advance the watermark to the
//! newest processed timestamp. One agent's failure marks that agent as
//! errored and never stops the cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::agentdb::{QueryExecutor, SqlValue};
use crate::context::Services;
use crate::database::{AgentRow, NewQueryFields, QueryLogConfigRow};
use crate::pipeline::{self, TelemetryEvent};

const CYCLE_INTERVAL: Duration = Duration::from_secs(5);
const FETCH_LIMIT: usize = 100;

/// Spawn the poller loop. Clears the stop flag's effect by checking it
/// between cycles; joins cleanly once it is set.
pub fn spawn(services: Arc<Services>, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("DB poller started");
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = poll_cycle(&services).await {
                error!("Poller cycle error: {e:#}");
            }
            tokio::time::sleep(CYCLE_INTERVAL).await;
        }
        info!("DB poller stopped");
    })
}

/// One cycle over every registered agent.
pub async fn poll_cycle(services: &Arc<Services>) -> Result<()> {
    let agents = services.agents.all().await?;
    let now = Utc::now();

    for agent in agents {
        if agent.status != "active" {
            continue;
        }

        let due = match agent.last_polled_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= agent.poll_interval_s as i64,
        };
        if !due {
            continue;
        }

        match poll_agent(services, &agent).await {
            Ok(()) => {
                services.agents.touch_last_polled(agent.agent_id).await?;
            }
            Err(e) => {
                error!("Poll failed for agent '{}': {e:#}", agent.agent_name);
                services
                    .agents
                    .update_status(agent.agent_id, "error", Some(&e.to_string()))
                    .await
                    .ok();
            }
        }
    }

    Ok(())
}

/// Fetch and dispatch new query-log rows for one agent.
pub async fn poll_agent(services: &Arc<Services>, agent: &AgentRow) -> Result<()> {
    let Some(config) = services.agents.query_log_config(agent.agent_id).await? else {
        return Ok(()); // SDK-only agent
    };

    let sql = build_fetch_sql(&config);
    let executor = QueryExecutor::new(Duration::from_secs(10), FETCH_LIMIT);
    let result = executor.execute(&sql, &agent.db_url).await;
    if !result.success {
        bail!(
            "failed to fetch from agent '{}' query log: {}",
            agent.agent_name,
            result.error.unwrap_or_default()
        );
    }
    if result.rows.is_empty() {
        return Ok(());
    }

    info!(
        "Poller: {} new rows from agent '{}'",
        result.rows.len(),
        agent.agent_name
    );

    let has_status = config.status_column.is_some();
    let has_error = config.error_column.is_some();

    let mut new_watermark = config.last_seen_timestamp;
    for row in &result.rows {
        let ts = row.first().and_then(value_as_timestamp);
        let query_text = row.get(1).map(value_as_text).unwrap_or_default();
        let generated_sql = row.get(2).map(value_as_text).filter(|s| !s.is_empty());
        let status = if has_status {
            row.get(3)
                .map(value_as_text)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "success".to_string())
        } else {
            "success".to_string()
        };
        let error_idx = if has_status { 4 } else { 3 };
        let error_message = if has_error {
            row.get(error_idx).map(value_as_text).filter(|s| !s.is_empty())
        } else {
            None
        };

        let query_id = format!(
            "POLL-{}-{}",
            agent.agent_name.to_uppercase(),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        services
            .monitoring
            .insert_query(&NewQueryFields {
                query_id: query_id.clone(),
                query_text: query_text.clone(),
                agent_type: agent.agent_name.clone(),
                generated_sql: generated_sql.clone(),
                status: status.clone(),
                error_message: error_message.clone(),
                execution_time_ms: None,
            })
            .await?;

        pipeline::spawn(
            services.clone(),
            TelemetryEvent {
                query_id,
                query_text,
                agent_type: agent.agent_name.clone(),
                status,
                generated_sql,
                error_message,
            },
        );

        if let Some(ts) = ts {
            let newer = new_watermark.map(|w| ts > w).unwrap_or(true);
            if newer {
                new_watermark = Some(ts);
            }
        }
    }

    // Watermark only moves once every fetched row has been dispatched
    if let Some(ts) = new_watermark {
        if Some(ts) != config.last_seen_timestamp {
            services
                .agents
                .advance_watermark(agent.agent_id, ts, None)
                .await?;
        }
    }

    Ok(())
}

/// SELECT over the configured query-log columns, above the watermark,
/// oldest first. The watermark is rendered as a UTC literal because the
/// statement runs against a foreign database through the plain executor.
pub fn build_fetch_sql(config: &QueryLogConfigRow) -> String {
    let mut select_cols = vec![
        config.timestamp_column.clone(),
        config.query_text_column.clone(),
        config.sql_column.clone(),
    ];
    if let Some(status) = &config.status_column {
        select_cols.push(status.clone());
    }
    if let Some(error) = &config.error_column {
        select_cols.push(error.clone());
    }

    let where_clause = match config.last_seen_timestamp {
        Some(ts) => format!(
            "{} > '{}'",
            config.timestamp_column,
            ts.format("%Y-%m-%d %H:%M:%S%.6f+00")
        ),
        None => "TRUE".to_string(),
    };

    format!(
        "SELECT {} FROM {}.{} WHERE {} ORDER BY {} ASC LIMIT {}",
        select_cols.join(", "),
        config.schema_name,
        config.table_name,
        where_clause,
        config.timestamp_column,
        FETCH_LIMIT
    )
}

fn value_as_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Null => String::new(),
        other => other
            .iso_form()
            .unwrap_or_else(|| serde_json::to_string(other).unwrap_or_default()),
    }
}

fn value_as_timestamp(value: &SqlValue) -> Option<DateTime<Utc>> {
    match value {
        SqlValue::Timestamp(ts) => Some(ts.and_utc()),
        SqlValue::Date(d) => Some(d.and_hms_opt(0, 0, 0)?.and_utc()),
        SqlValue::Text(s) => {
            let trimmed = s.trim();
            DateTime::parse_from_rfc3339(trimmed)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()
                        .map(|dt| dt.and_utc())
                })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(watermark: Option<DateTime<Utc>>) -> QueryLogConfigRow {
        QueryLogConfigRow {
            agent_id: 1,
            schema_name: "public".into(),
            table_name: "agent_queries".into(),
            query_text_column: "query_text".into(),
            sql_column: "generated_sql".into(),
            timestamp_column: "created_at".into(),
            status_column: Some("status".into()),
            error_column: Some("error".into()),
            id_column: Some("id".into()),
            last_seen_timestamp: watermark,
            last_seen_id: None,
        }
    }

    #[test]
    fn test_fetch_sql_without_watermark() {
        let sql = build_fetch_sql(&config(None));
        assert!(sql.contains("WHERE TRUE"));
        assert!(sql.contains("ORDER BY created_at ASC"));
        assert!(sql.contains("LIMIT 100"));
        assert!(sql.starts_with(
            "SELECT created_at, query_text, generated_sql, status, error FROM public.agent_queries"
        ));
    }

    #[test]
    fn test_fetch_sql_with_watermark() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let sql = build_fetch_sql(&config(Some(ts)));
        assert!(sql.contains("created_at > '2026-03-01 12:30:00.000000+00'"));
    }

    #[test]
    fn test_fetch_sql_without_optional_columns() {
        let mut cfg = config(None);
        cfg.status_column = None;
        cfg.error_column = None;
        let sql = build_fetch_sql(&cfg);
        assert!(sql.starts_with("SELECT created_at, query_text, generated_sql FROM"));
    }

    #[test]
    fn test_timestamp_parsing_variants() {
        let naive = SqlValue::Text("2026-03-01 08:00:00".into());
        assert!(value_as_timestamp(&naive).is_some());

        let rfc = SqlValue::Text("2026-03-01T08:00:00Z".into());
        assert!(value_as_timestamp(&rfc).is_some());

        assert!(value_as_timestamp(&SqlValue::Int(5)).is_none());
    }
}
