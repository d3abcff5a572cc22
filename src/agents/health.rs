//! Agent health checker
//!
//! Pings each active agent's `/health` endpoint and cross-checks telemetry
//! freshness. States: healthy, unhealthy (unreachable), sdk_issue (up but
//! silent), unknown (no agent_url). Alerts fire on state transitions only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use url::Url;

use crate::context::Services;

/// Spawn the health-check loop.
pub fn spawn(services: Arc<Services>, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(services.settings.health_check_interval_s.max(1));
    tokio::spawn(async move {
        info!("Health checker started (interval {}s)", interval.as_secs());
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = check_cycle(&services).await {
                error!("Health check cycle error: {e:#}");
            }
            tokio::time::sleep(interval).await;
        }
        info!("Health checker stopped");
    })
}

/// One pass over all active agents.
pub async fn check_cycle(services: &Arc<Services>) -> Result<()> {
    let agents = services.agents.all().await?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    for agent in agents.into_iter().filter(|a| a.status == "active") {
        let prev_status = agent.health_status.clone();

        let Some(agent_url) = agent.agent_url.as_deref() else {
            services
                .agents
                .update_health(agent.agent_id, "unknown", Some("No agent_url configured"))
                .await?;
            continue;
        };

        if !ping_health(&http, agent_url).await {
            let detail = "Health check failed - agent unreachable";
            services
                .agents
                .update_health(agent.agent_id, "unhealthy", Some(detail))
                .await?;
            if prev_status != "unhealthy" {
                warn!("Agent '{}' is now UNHEALTHY", agent.agent_name);
                services
                    .alerts
                    .alert_agent_unhealthy(&agent.agent_name, detail)
                    .await;
            }
            continue;
        }

        let has_telemetry = services
            .monitoring
            .has_recent_telemetry(
                &agent.agent_name,
                services.settings.telemetry_gap_threshold_m,
            )
            .await
            // Assume OK on probe failure to avoid false positives
            .unwrap_or(true);

        if has_telemetry {
            services
                .agents
                .update_health(agent.agent_id, "healthy", None)
                .await?;
            if prev_status != "healthy" {
                info!("Agent '{}' is now HEALTHY", agent.agent_name);
            }
        } else {
            let detail = format!(
                "Agent is up but no telemetry in last {} minutes",
                services.settings.telemetry_gap_threshold_m
            );
            services
                .agents
                .update_health(agent.agent_id, "sdk_issue", Some(&detail))
                .await?;
            if prev_status != "sdk_issue" {
                warn!("Agent '{}' has SDK ISSUE - no telemetry", agent.agent_name);
            }
        }
    }

    Ok(())
}

/// GET `<base>/health`. The configured agent_url may carry a path (e.g. a
/// query endpoint), so only scheme + authority are kept.
async fn ping_health(http: &reqwest::Client, agent_url: &str) -> bool {
    let Some(base) = health_base_url(agent_url) else {
        return false;
    };
    match http.get(format!("{base}/health")).send().await {
        Ok(response) => response.status().as_u16() < 400,
        Err(_) => false,
    }
}

/// Strip any path/query from the configured URL.
pub fn health_base_url(agent_url: &str) -> Option<String> {
    let parsed = Url::parse(agent_url).ok()?;
    let host = parsed.host_str()?;
    let base = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_strips_path() {
        assert_eq!(
            health_base_url("http://localhost:8001/query").unwrap(),
            "http://localhost:8001"
        );
        assert_eq!(
            health_base_url("https://agents.example.com/api/v2/ask?x=1").unwrap(),
            "https://agents.example.com"
        );
    }

    #[test]
    fn test_base_url_rejects_garbage() {
        assert!(health_base_url("not a url").is_none());
    }
}
