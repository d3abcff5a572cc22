//! Alert fan-out: SES email, SNS topic, Slack webhook
//!
//! Every channel is independently optional; with nothing configured the
//! service short-circuits silently. High drift alerts fire per event,
//! health alerts per transition (callers own that policy).

use aws_config::Region;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use aws_sdk_sns::Client as SnsClient;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use crate::config::Settings;

/// Alert kinds the platform emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighDrift,
    CriticalError,
    AccuracyDrop,
    SystemDown,
    ErrorSpike,
}

impl AlertKind {
    fn label(&self) -> &'static str {
        match self {
            AlertKind::HighDrift => "high_drift",
            AlertKind::CriticalError => "critical_error",
            AlertKind::AccuracyDrop => "accuracy_drop",
            AlertKind::SystemDown => "system_down",
            AlertKind::ErrorSpike => "error_spike",
        }
    }
}

/// Alert channels built from settings
pub struct AlertService {
    ses: Option<SesClient>,
    sns: Option<SnsClient>,
    http: reqwest::Client,
    sender_email: Option<String>,
    recipients: Vec<String>,
    sns_topic_arn: Option<String>,
    slack_webhook_url: Option<String>,
}

impl AlertService {
    pub async fn new(settings: &Settings) -> Self {
        let email_enabled =
            settings.alert_email_enabled && settings.alert_ses_sender_email.is_some();
        let needs_aws = email_enabled || settings.alert_sns_topic_arn.is_some();

        let (ses, sns) = if needs_aws {
            let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(Region::new(settings.aws_region.clone()))
                .load()
                .await;
            (
                email_enabled.then(|| SesClient::new(&config)),
                settings
                    .alert_sns_topic_arn
                    .as_ref()
                    .map(|_| SnsClient::new(&config)),
            )
        } else {
            (None, None)
        };

        if ses.is_none() && sns.is_none() && settings.alert_slack_webhook_url.is_none() {
            info!("Alerting disabled: no channel configured");
        }

        Self {
            ses,
            sns,
            http: reqwest::Client::new(),
            sender_email: settings.alert_ses_sender_email.clone(),
            recipients: settings.alert_recipients(),
            sns_topic_arn: settings.alert_sns_topic_arn.clone(),
            slack_webhook_url: settings.alert_slack_webhook_url.clone(),
        }
    }

    /// A service with no channels, for tests and disabled deployments.
    pub fn disabled() -> Self {
        Self {
            ses: None,
            sns: None,
            http: reqwest::Client::new(),
            sender_email: None,
            recipients: Vec::new(),
            sns_topic_arn: None,
            slack_webhook_url: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ses.is_some() || self.sns.is_some() || self.slack_webhook_url.is_some()
    }

    /// Send one alert to every configured channel.
    pub async fn send_alert(
        &self,
        kind: AlertKind,
        title: &str,
        details: BTreeMap<String, String>,
        severity: &str,
    ) {
        if !self.is_enabled() {
            debug!("Alerts disabled, skipping {title}");
            return;
        }

        let subject = format!("[{}] agent-sentinel - {title}", severity.to_uppercase());
        let body = render_text_body(kind, title, &details, severity);

        if let (Some(ses), Some(sender)) = (&self.ses, &self.sender_email) {
            if self.recipients.is_empty() {
                debug!("No recipient emails configured");
            } else if let Err(e) = self
                .send_email(ses, sender, &subject, &body)
                .await
            {
                error!("Failed to send alert email: {e}");
            }
        }

        if let (Some(sns), Some(topic_arn)) = (&self.sns, &self.sns_topic_arn) {
            let truncated: String = subject.chars().take(100).collect();
            if let Err(e) = sns
                .publish()
                .topic_arn(topic_arn)
                .subject(truncated)
                .message(&body)
                .send()
                .await
            {
                error!("Failed to publish alert to SNS: {e}");
            }
        }

        if let Some(webhook) = &self.slack_webhook_url {
            let payload = serde_json::json!({ "text": format!("*{subject}*\n```{body}```") });
            if let Err(e) = self.http.post(webhook).json(&payload).send().await {
                error!("Failed to post alert to Slack: {e}");
            }
        }

        info!("Alert dispatched: {} ({severity})", kind.label());
    }

    async fn send_email(
        &self,
        ses: &SesClient,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let content = EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(Content::builder().data(subject).charset("UTF-8").build()?)
                    .body(
                        Body::builder()
                            .text(Content::builder().data(body).charset("UTF-8").build()?)
                            .build(),
                    )
                    .build(),
            )
            .build();

        ses.send_email()
            .from_email_address(sender)
            .destination(
                Destination::builder()
                    .set_to_addresses(Some(self.recipients.clone()))
                    .build(),
            )
            .content(content)
            .send()
            .await?;
        Ok(())
    }

    // =========================================================================
    // Per-kind helpers
    // =========================================================================

    pub async fn alert_high_drift(
        &self,
        query_id: &str,
        query_text: &str,
        drift_score: f64,
        agent_type: &str,
    ) {
        let mut details = BTreeMap::new();
        details.insert("Query ID".to_string(), query_id.to_string());
        details.insert("Query".to_string(), truncate(query_text, 100));
        details.insert("Drift Score".to_string(), format!("{drift_score:.3}"));
        details.insert("Agent".to_string(), agent_type.to_string());
        self.send_alert(AlertKind::HighDrift, "High Query Drift Detected", details, "high")
            .await;
    }

    pub async fn alert_critical_error(
        &self,
        query_id: &str,
        error_category: &str,
        error_message: &str,
        agent_type: &str,
    ) {
        let mut details = BTreeMap::new();
        details.insert("Query ID".to_string(), query_id.to_string());
        details.insert("Category".to_string(), error_category.to_string());
        details.insert("Error".to_string(), truncate(error_message, 200));
        details.insert("Agent".to_string(), agent_type.to_string());
        self.send_alert(
            AlertKind::CriticalError,
            &format!("Critical Error: {error_category}"),
            details,
            "critical",
        )
        .await;
    }

    pub async fn alert_agent_unhealthy(&self, agent_name: &str, detail: &str) {
        let mut details = BTreeMap::new();
        details.insert("Agent".to_string(), agent_name.to_string());
        details.insert("Detail".to_string(), detail.to_string());
        self.send_alert(
            AlertKind::SystemDown,
            &format!("Agent Unhealthy: {agent_name}"),
            details,
            "high",
        )
        .await;
    }
}

fn render_text_body(
    kind: AlertKind,
    title: &str,
    details: &BTreeMap<String, String>,
    severity: &str,
) -> String {
    let detail_lines: String = details
        .iter()
        .map(|(k, v)| format!("  - {k}: {v}\n"))
        .collect();
    format!(
        "{title}\n{underline}\n\nAlert Type: {kind}\nSeverity: {severity}\nTimestamp: {ts}\n\nDetails:\n{detail_lines}\n---\nThis is an automated alert from agent-sentinel.\n",
        underline = "=".repeat(title.len()),
        kind = kind.label(),
        severity = severity.to_uppercase(),
        ts = Utc::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_service() {
        assert!(!AlertService::disabled().is_enabled());
    }

    #[test]
    fn test_body_contains_details() {
        let mut details = BTreeMap::new();
        details.insert("Agent".to_string(), "demand".to_string());
        details.insert("Drift Score".to_string(), "0.812".to_string());
        let body = render_text_body(AlertKind::HighDrift, "High Query Drift Detected", &details, "high");
        assert!(body.contains("Alert Type: high_drift"));
        assert!(body.contains("Severity: HIGH"));
        assert!(body.contains("- Agent: demand"));
        assert!(body.contains("- Drift Score: 0.812"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789...");
    }
}
