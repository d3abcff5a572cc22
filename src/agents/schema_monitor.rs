//! Periodic schema-scan scheduler
//!
//! Every 10 hours, each agent's live schema is re-discovered and diffed
//! against the stored snapshot; changes trigger scoped incremental
//! ground-truth generation (see [`super::manager::AgentManager::scan_schema_changes`]).
//! Agents are scanned sequentially within one run, so per-agent scans never
//! overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use super::manager::AgentManager;
use crate::context::Services;

const SCAN_INTERVAL: Duration = Duration::from_secs(10 * 60 * 60);

/// Spawn the schema-scan loop.
pub fn spawn(services: Arc<Services>, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Schema monitor started (interval {}h)",
            SCAN_INTERVAL.as_secs() / 3600
        );
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = scan_all(&services).await {
                error!("Schema scan run error: {e:#}");
            }

            // Sleep in short slices so shutdown stays responsive
            let mut remaining = SCAN_INTERVAL;
            while remaining > Duration::ZERO && !stop.load(Ordering::Relaxed) {
                let slice = remaining.min(Duration::from_secs(5));
                tokio::time::sleep(slice).await;
                remaining = remaining.saturating_sub(slice);
            }
        }
        info!("Schema monitor stopped");
    })
}

/// Scan every registered agent once, sequentially.
pub async fn scan_all(services: &Arc<Services>) -> Result<()> {
    let agents = services.agents.all().await?;
    let manager = AgentManager::new(services.clone());

    for agent in agents {
        if agent.status != "active" {
            continue;
        }
        match manager.scan_schema_changes(agent.agent_id).await {
            Ok(summary) if summary.has_changes => info!(
                "Agent '{}': {} new tables, {} new columns, {} queries generated",
                agent.agent_name, summary.new_tables, summary.new_columns, summary.queries_generated
            ),
            Ok(_) => {}
            Err(e) => error!("Schema scan failed for agent '{}': {e:#}", agent.agent_name),
        }
    }

    Ok(())
}
