//! Reference-free heuristic evaluation
//!
//! When no ground truth matches, the evaluator falls back to three weighted
//! layers (structural 0.45, intent 0.30, pattern 0.25). Drift quality is
//! monitoring-only: it never enters the weighted sum, but a very low value
//! vetoes the whole evaluation (junk or off-domain queries must not pass).

pub mod intent;
pub mod llm_intent;
pub mod pattern;

pub use intent::IntentLayer;
pub use llm_intent::{IntentAnalysis, LlmIntentEvaluator};

use serde::Serialize;
use tracing::{info, warn};

use super::Verdict;

/// Layer weights for the heuristic path
const STRUCTURAL_WEIGHT: f64 = 0.45;
const INTENT_WEIGHT: f64 = 0.30;
const PATTERN_WEIGHT: f64 = 0.25;

/// Drift quality below this forces FAIL regardless of the other layers
const DRIFT_VETO_THRESHOLD: f64 = 0.1;

/// Per-layer scores of one heuristic evaluation
#[derive(Debug, Clone, Serialize)]
pub struct HeuristicComponents {
    pub structural: f64,
    pub intent: f64,
    pub pattern: f64,
    pub drift_quality: f64,
}

/// Outcome of the heuristic path
#[derive(Debug, Clone, Serialize)]
pub struct HeuristicOutcome {
    pub final_score: f64,
    pub final_result: Verdict,
    pub confidence: f64,
    pub components: HeuristicComponents,
    pub drift_vetoed: bool,
}

/// Orchestrates the heuristic layers
pub struct HeuristicManager {
    intent_layer: IntentLayer,
    threshold: f64,
}

impl HeuristicManager {
    pub fn new(intent_layer: IntentLayer, threshold: f64) -> Self {
        Self {
            intent_layer,
            threshold,
        }
    }

    /// Run the layers. `structural_score` comes from the structural
    /// validator; `drift_quality` is `1 - drift_score` for this event,
    /// reused when the pipeline already computed it.
    pub fn evaluate(
        &self,
        query_text: &str,
        sql: &str,
        structural_score: f64,
        drift_quality: f64,
    ) -> HeuristicOutcome {
        info!("Starting heuristic evaluation for query: {:.50}", query_text);

        let intent_score = self.intent_layer.evaluate(query_text, sql);
        let pattern_score = pattern::evaluate(sql);

        let weighted = structural_score * STRUCTURAL_WEIGHT
            + intent_score * INTENT_WEIGHT
            + pattern_score * PATTERN_WEIGHT;

        let (final_score, final_result, confidence, drift_vetoed) =
            if drift_quality < DRIFT_VETO_THRESHOLD {
                warn!("Drift veto triggered: quality {drift_quality:.2} is too low");
                (0.0, Verdict::Fail, 0.0, true)
            } else {
                let verdict = if weighted >= self.threshold {
                    Verdict::Pass
                } else {
                    Verdict::Fail
                };
                (weighted, verdict, weighted, false)
            };

        info!(
            "Heuristic evaluation complete: {final_result:?}, score {final_score:.2}, confidence {confidence:.2}"
        );

        HeuristicOutcome {
            final_score,
            final_result,
            confidence,
            components: HeuristicComponents {
                structural: structural_score,
                intent: intent_score,
                pattern: pattern_score,
                drift_quality,
            },
            drift_vetoed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manager() -> HeuristicManager {
        HeuristicManager::new(IntentLayer::new(&HashMap::new()), 0.7)
    }

    #[test]
    fn test_good_query_passes() {
        let outcome = manager().evaluate(
            "How many products are in stock?",
            "SELECT COUNT(*) AS in_stock FROM products WHERE stock_levels > 0",
            1.0,
            0.95,
        );
        assert_eq!(outcome.final_result, Verdict::Pass);
        assert!(!outcome.drift_vetoed);
        assert!(outcome.final_score >= 0.7);
    }

    #[test]
    fn test_drift_veto_forces_fail() {
        let outcome = manager().evaluate(
            "asdf qwer",
            "SELECT * FROM products",
            1.0,
            0.05,
        );
        assert_eq!(outcome.final_result, Verdict::Fail);
        assert_eq!(outcome.final_score, 0.0);
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.drift_vetoed);
    }

    #[test]
    fn test_drift_outside_veto_is_monitoring_only() {
        let mgr = manager();
        let high_quality = mgr.evaluate("list products", "SELECT name FROM products", 1.0, 0.9);
        let low_quality = mgr.evaluate("list products", "SELECT name FROM products", 1.0, 0.2);
        // Same weighted sum - drift quality does not enter the score
        assert_eq!(high_quality.final_score, low_quality.final_score);
    }

    #[test]
    fn test_weights_sum_as_specified() {
        let outcome = manager().evaluate("list products", "SELECT name FROM products", 1.0, 1.0);
        let expected = 1.0 * STRUCTURAL_WEIGHT
            + outcome.components.intent * INTENT_WEIGHT
            + outcome.components.pattern * PATTERN_WEIGHT;
        assert!((outcome.final_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_structural_zero_drags_score_down() {
        let outcome = manager().evaluate(
            "list products",
            "SELECT name FROM products",
            0.0,
            0.9,
        );
        assert_eq!(outcome.final_result, Verdict::Fail);
    }
}
