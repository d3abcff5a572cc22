//! The per-event background pipeline
//!
//! One spawned task per telemetry event: drift detection, then evaluation,
//! then error classification. Stages are sequential for one event and
//! independent across events. A stage failure is logged with the query_id
//! and later stages still run; nothing here ever reaches the ingest
//! response.

use std::sync::Arc;
use tracing::{error, info};

use crate::context::Services;
use crate::evaluation::EvaluationRequest;
use crate::monitoring::{DriftClass, ErrorClassifier};

/// One event flowing through the pipeline
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub query_id: String,
    pub query_text: String,
    pub agent_type: String,
    pub status: String,
    pub generated_sql: Option<String>,
    pub error_message: Option<String>,
}

impl TelemetryEvent {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Spawn the pipeline for one event.
pub fn spawn(services: Arc<Services>, event: TelemetryEvent) {
    tokio::spawn(async move {
        run(services, event).await;
    });
}

/// Run the three stages for one event.
pub async fn run(services: Arc<Services>, event: TelemetryEvent) {
    // Stage 1: drift. Error events carry no usable query semantics.
    let mut drift_score = None;
    if !event.is_error() {
        match services
            .drift_detector()
            .detect(&event.query_id, &event.query_text, &event.agent_type)
            .await
        {
            Ok(outcome) => {
                if outcome.classification == DriftClass::High {
                    services
                        .alerts
                        .alert_high_drift(
                            &event.query_id,
                            &event.query_text,
                            outcome.drift_score,
                            &event.agent_type,
                        )
                        .await;
                }
                drift_score = Some(outcome.drift_score);
            }
            Err(e) => error!("Drift detection failed for {}: {e}", event.query_id),
        }
    }

    // Stage 2: evaluation, only for successful events that produced SQL.
    if !event.is_error() {
        if let Some(sql) = event.generated_sql.clone().filter(|s| !s.trim().is_empty()) {
            match services.evaluator_for(&event.agent_type).await {
                Ok(evaluator) => {
                    let request = EvaluationRequest {
                        query_id: event.query_id.clone(),
                        query_text: event.query_text.clone(),
                        generated_sql: sql,
                        ground_truth_sql: None,
                        complexity: None,
                        existing_drift_score: drift_score,
                    };
                    match evaluator.evaluate(request).await {
                        Ok(record) => info!(
                            "Pipeline evaluated {}: {} (score {:.2})",
                            event.query_id, record.final_result, record.final_score
                        ),
                        Err(e) => error!("Evaluation failed for {}: {e}", event.query_id),
                    }
                }
                Err(e) => error!(
                    "Could not build evaluator for {}: {e}",
                    event.query_id
                ),
            }
        }
    }

    // Stage 3: error classification for agent-reported failures.
    if event.is_error() {
        if let Some(message) = event.error_message.as_deref().filter(|m| !m.is_empty()) {
            let classifier = ErrorClassifier::new(services.monitoring.clone());
            match classifier.classify(message, &event.query_id, None).await {
                Ok(classification) => {
                    if classification.severity == "critical" {
                        services
                            .alerts
                            .alert_critical_error(
                                &event.query_id,
                                &classification.error_category,
                                message,
                                &event.agent_type,
                            )
                            .await;
                    }
                }
                Err(e) => error!(
                    "Error classification failed for {}: {e}",
                    event.query_id
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_detection() {
        let event = TelemetryEvent {
            query_id: "INGEST-DEMAND-deadbeef".into(),
            query_text: "how many products".into(),
            agent_type: "demand".into(),
            status: "error".into(),
            generated_sql: None,
            error_message: Some("boom".into()),
        };
        assert!(event.is_error());

        let ok = TelemetryEvent {
            status: "success".into(),
            ..event
        };
        assert!(!ok.is_error());
    }
}
