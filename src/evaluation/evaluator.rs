//! The two-path evaluator
//!
//! Path selection is data-driven, not exception-driven: the outcome is a
//! tagged enum the persistence layer serializes uniformly.
//!
//! - Structural failure with a classifiable error short-circuits to a FAIL
//!   evaluation plus an error-classifier row.
//! - A ground-truth match (cosine ≥ 0.95) runs semantic similarity, the
//!   LLM judge and result validation, combined with fixed weights.
//! - No match runs the reference-free heuristic layers, optionally with
//!   LLM output validation attached as evidence.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::gt_lookup::{GroundTruthCatalog, GroundTruthMatch, MATCH_THRESHOLD};
use super::layers::{
    HeuristicManager, HeuristicOutcome, IntentAnalysis, IntentLayer, LlmIntentEvaluator,
};
use super::llm_judge::{JudgeVerdict, LlmJudge};
use super::output::result_validator::MatchConfidence;
use super::output::{LlmOutputJudge, OutputScores, ResultValidation, ResultValidator};
use super::semantic_checker::{SemanticChecker, SemanticReport};
use super::structural::{StructuralReport, StructuralValidator};
use super::Verdict;
use crate::database::{EvaluationUpsert, MonitoringRepository};
use crate::llm::strip_code_fences;
use crate::monitoring::{DriftDetector, ErrorClassifier};

/// Weights when result validation participated
const W_STRUCTURAL: f64 = 0.40;
const W_SEMANTIC: f64 = 0.15;
const W_LLM: f64 = 0.15;
const W_RESULT: f64 = 0.30;

/// Legacy weights without result validation
const W_STRUCTURAL_LEGACY: f64 = 0.60;
const W_SEMANTIC_LEGACY: f64 = 0.10;
const W_LLM_LEGACY: f64 = 0.30;

/// One evaluation request
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub query_id: String,
    pub query_text: String,
    pub generated_sql: String,
    /// Caller-supplied reference (skips the semantic lookup)
    pub ground_truth_sql: Option<String>,
    pub complexity: Option<String>,
    /// Drift score already computed for this event by the pipeline
    pub existing_drift_score: Option<f64>,
}

/// Per-path detail, serialized into `evaluation_data`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    StructuralFail {
        structural: StructuralReport,
    },
    GroundTruth {
        structural: StructuralReport,
        semantic: SemanticReport,
        llm_judge: JudgeVerdict,
        result_validation: Option<ResultValidation>,
        match_similarity: Option<f32>,
    },
    Heuristic {
        structural: StructuralReport,
        heuristic: HeuristicOutcome,
        intent_analysis: Option<IntentAnalysis>,
        output_validation: Option<OutputScores>,
    },
}

/// The persisted shape of one evaluation
#[derive(Debug, Clone)]
pub struct EvaluationRecord {
    pub query_id: String,
    pub query_text: String,
    pub agent_type: String,
    pub generated_sql: String,
    pub ground_truth_sql: Option<String>,
    pub complexity: Option<String>,
    pub structural_score: f64,
    pub semantic_score: f64,
    pub llm_score: f64,
    pub final_score: f64,
    pub final_result: Verdict,
    pub confidence: f64,
    pub reasoning: String,
    pub outcome: EvaluationOutcome,
    pub evaluation_id: Option<i64>,
}

impl EvaluationRecord {
    fn to_upsert(&self) -> EvaluationUpsert {
        let scores = json!({
            "structural": self.structural_score,
            "semantic": self.semantic_score,
            "llm": self.llm_score,
            "final": self.final_score,
            "confidence": self.confidence,
        });
        let mut evaluation_data = serde_json::to_value(&self.outcome).unwrap_or(json!({}));
        if let Some(map) = evaluation_data.as_object_mut() {
            map.insert("scores".to_string(), scores);
        }

        EvaluationUpsert {
            query_id: self.query_id.clone(),
            query_text: self.query_text.clone(),
            agent_type: self.agent_type.clone(),
            complexity: self.complexity.clone(),
            generated_sql: Some(self.generated_sql.clone()),
            ground_truth_sql: self.ground_truth_sql.clone(),
            structural_score: self.structural_score,
            semantic_score: self.semantic_score,
            llm_score: self.llm_score,
            final_score: self.final_score,
            result: self.final_result.as_str().to_string(),
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
            evaluation_data,
        }
    }
}

/// Weighted final score for the ground-truth path.
///
/// Result validation participates only when it actually produced a positive
/// signal; otherwise the legacy three-way weighting applies. PASS iff the
/// final score clears the threshold; confidence is the mean of the judge's
/// confidence and the final score.
pub fn calculate_final_score(
    structural: f64,
    semantic: f64,
    llm_score: f64,
    llm_confidence: f64,
    result_validation: Option<f64>,
    threshold: f64,
) -> (f64, Verdict, f64) {
    let final_score = match result_validation {
        Some(result) if result > 0.0 => {
            W_STRUCTURAL * structural + W_SEMANTIC * semantic + W_LLM * llm_score + W_RESULT * result
        }
        _ => {
            W_STRUCTURAL_LEGACY * structural
                + W_SEMANTIC_LEGACY * semantic
                + W_LLM_LEGACY * llm_score
        }
    };

    let verdict = if final_score >= threshold {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    let confidence = (llm_confidence + final_score) / 2.0;
    (final_score, verdict, confidence)
}

/// Evaluator for one agent
pub struct Evaluator {
    agent_type: String,
    agent_db_url: Option<String>,
    structural: StructuralValidator,
    semantic: SemanticChecker,
    judge: LlmJudge,
    result_validator: ResultValidator,
    output_judge: LlmOutputJudge,
    intent_evaluator: LlmIntentEvaluator,
    heuristics: HeuristicManager,
    catalog: Arc<GroundTruthCatalog>,
    drift: DriftDetector,
    classifier: ErrorClassifier,
    monitoring: MonitoringRepository,
    threshold: f64,
}

impl Evaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_type: String,
        agent_db_url: Option<String>,
        schema_info: std::collections::HashMap<String, std::collections::HashMap<String, String>>,
        judge_llm: Arc<dyn crate::llm::LlmClient>,
        catalog: Arc<GroundTruthCatalog>,
        drift: DriftDetector,
        monitoring: MonitoringRepository,
        threshold: f64,
    ) -> Self {
        let semantic = SemanticChecker::new(&schema_info);
        let intent_layer = IntentLayer::new(&schema_info);
        let structural = StructuralValidator::new(schema_info, agent_db_url.clone());

        info!("Initialized evaluator for {agent_type} agent");

        Self {
            agent_type,
            agent_db_url,
            structural,
            semantic,
            judge: LlmJudge::new(judge_llm.clone()),
            result_validator: ResultValidator::default(),
            output_judge: LlmOutputJudge::new(judge_llm.clone()),
            intent_evaluator: LlmIntentEvaluator::new(judge_llm),
            heuristics: HeuristicManager::new(intent_layer, threshold),
            catalog,
            drift,
            classifier: ErrorClassifier::new(monitoring.clone()),
            monitoring,
            threshold,
        }
    }

    /// Evaluate one event and persist the result. Always returns a record;
    /// internal component failures degrade rather than error out.
    pub async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluationRecord> {
        info!(
            "Evaluating query {}: {:.50}",
            request.query_id, request.query_text
        );

        let query_text = request.query_text.trim().to_string();
        let cleaned_sql = strip_code_fences(&request.generated_sql);

        // Stage 1: structural validation gates everything
        let structural = self.structural.validate(&cleaned_sql).await;

        if structural.requires_classification {
            warn!(
                "Structural validation failed with classifiable error: {:?}",
                structural.error_type
            );
            let error_message = structural.errors.join("; ");
            let mut record = self.structural_fail_record(&request, &query_text, &cleaned_sql, structural);
            let evaluation_id = self.monitoring.upsert_evaluation(&record.to_upsert()).await?;
            record.evaluation_id = Some(evaluation_id);

            if let Err(e) = self
                .classifier
                .classify(&error_message, &request.query_id, Some(evaluation_id))
                .await
            {
                warn!("Error classification failed for {}: {e}", request.query_id);
            }
            return Ok(record);
        }

        if structural.score == 0.0 {
            let mut record = self.structural_fail_record(&request, &query_text, &cleaned_sql, structural);
            let evaluation_id = self.monitoring.upsert_evaluation(&record.to_upsert()).await?;
            record.evaluation_id = Some(evaluation_id);
            return Ok(record);
        }

        // Stage 2: ground-truth lookup
        let gt_match = match &request.ground_truth_sql {
            Some(sql) => Some(GroundTruthMatch {
                natural_language: query_text.clone(),
                sql: sql.clone(),
                complexity: request.complexity.clone(),
                expected_output: None,
                similarity: 1.0,
            }),
            None => self.lookup_ground_truth(&query_text).await,
        };

        let mut record = match gt_match {
            Some(gt) => {
                self.evaluate_with_ground_truth(&request, &query_text, &cleaned_sql, structural, gt)
                    .await
            }
            None => {
                info!(
                    "Query {}: no ground truth, using heuristic evaluation",
                    request.query_id
                );
                self.evaluate_heuristic(&request, &query_text, &cleaned_sql, structural)
                    .await
            }
        };

        let evaluation_id = self.monitoring.upsert_evaluation(&record.to_upsert()).await?;
        record.evaluation_id = Some(evaluation_id);

        info!(
            "Query {} evaluation complete: {} (score {:.2})",
            record.query_id, record.final_result, record.final_score
        );
        Ok(record)
    }

    async fn lookup_ground_truth(&self, query_text: &str) -> Option<GroundTruthMatch> {
        let index = self.catalog.index_for(&self.agent_type).await?;
        match index.find_match(query_text, MATCH_THRESHOLD).await {
            Ok(found) => {
                if found.is_none() {
                    warn!("No ground truth found for: {query_text}");
                }
                found
            }
            Err(e) => {
                warn!("Semantic matcher failed: {e}");
                None
            }
        }
    }

    /// Path A: semantic similarity + LLM judge + result validation.
    async fn evaluate_with_ground_truth(
        &self,
        request: &EvaluationRequest,
        query_text: &str,
        cleaned_sql: &str,
        structural: StructuralReport,
        gt: GroundTruthMatch,
    ) -> EvaluationRecord {
        let semantic = self.semantic.check_equivalence(cleaned_sql, &gt.sql);

        let judge = self
            .judge
            .evaluate(query_text, cleaned_sql, &gt.sql, &self.agent_type)
            .await;
        let llm_score = judge.score();

        let result_validation = match &self.agent_db_url {
            Some(db_url) => {
                let validation = match &gt.expected_output {
                    Some(expected) => {
                        self.result_validator
                            .validate_with_expected_output(cleaned_sql, expected, db_url)
                            .await
                    }
                    None => {
                        let confidence =
                            MatchConfidence::from_semantic_score(semantic.similarity_score);
                        self.result_validator
                            .validate_with_reference_sql(cleaned_sql, &gt.sql, db_url, confidence)
                            .await
                    }
                };
                info!("Result validation complete: score {:.2}", validation.score);
                Some(validation)
            }
            None => {
                warn!("No agent DB URL available - skipping result validation");
                None
            }
        };

        let (final_score, final_result, confidence) = calculate_final_score(
            structural.score,
            semantic.similarity_score,
            llm_score,
            judge.confidence,
            result_validation.as_ref().map(|v| v.score),
            self.threshold,
        );

        EvaluationRecord {
            query_id: request.query_id.clone(),
            query_text: query_text.to_string(),
            agent_type: self.agent_type.clone(),
            generated_sql: cleaned_sql.to_string(),
            ground_truth_sql: Some(gt.sql.clone()),
            complexity: gt.complexity.clone().or_else(|| request.complexity.clone()),
            structural_score: structural.score,
            semantic_score: semantic.similarity_score,
            llm_score,
            final_score,
            final_result,
            confidence,
            reasoning: judge.reasoning.clone(),
            outcome: EvaluationOutcome::GroundTruth {
                structural,
                semantic,
                llm_judge: judge,
                result_validation,
                match_similarity: Some(gt.similarity),
            },
            evaluation_id: None,
        }
    }

    /// Path B: reference-free heuristics, with optional output validation.
    async fn evaluate_heuristic(
        &self,
        request: &EvaluationRequest,
        query_text: &str,
        cleaned_sql: &str,
        structural: StructuralReport,
    ) -> EvaluationRecord {
        let drift_quality = match request.existing_drift_score {
            Some(score) => (1.0 - score).max(0.0),
            None => match self
                .drift
                .detect(&request.query_id, query_text, &self.agent_type)
                .await
            {
                Ok(outcome) => (1.0 - outcome.drift_score).max(0.0),
                Err(e) => {
                    warn!("Drift calculation failed in heuristic path: {e}");
                    0.5
                }
            },
        };

        let heuristic =
            self.heuristics
                .evaluate(query_text, cleaned_sql, structural.score, drift_quality);

        // Contextual intent analysis rides along as evidence; the weighted
        // sum stays keyword-based so scores remain deterministic.
        let intent_analysis = if heuristic.drift_vetoed {
            None
        } else {
            Some(self.intent_evaluator.evaluate(query_text, cleaned_sql).await)
        };

        let output_validation = match &self.agent_db_url {
            Some(db_url) => {
                info!("Adding LLM output validation (no ground truth)");
                Some(
                    self.output_judge
                        .validate(query_text, cleaned_sql, db_url)
                        .await,
                )
            }
            None => {
                warn!("No agent DB URL available - skipping LLM output validation");
                None
            }
        };

        EvaluationRecord {
            query_id: request.query_id.clone(),
            query_text: query_text.to_string(),
            agent_type: self.agent_type.clone(),
            generated_sql: cleaned_sql.to_string(),
            ground_truth_sql: None,
            complexity: request.complexity.clone(),
            structural_score: heuristic.components.structural,
            semantic_score: 0.0,
            llm_score: 0.0,
            final_score: heuristic.final_score,
            final_result: heuristic.final_result,
            confidence: heuristic.confidence,
            reasoning: "Reference-free heuristic evaluation".to_string(),
            outcome: EvaluationOutcome::Heuristic {
                structural,
                heuristic,
                intent_analysis,
                output_validation,
            },
            evaluation_id: None,
        }
    }

    fn structural_fail_record(
        &self,
        request: &EvaluationRequest,
        query_text: &str,
        cleaned_sql: &str,
        structural: StructuralReport,
    ) -> EvaluationRecord {
        EvaluationRecord {
            query_id: request.query_id.clone(),
            query_text: query_text.to_string(),
            agent_type: self.agent_type.clone(),
            generated_sql: cleaned_sql.to_string(),
            ground_truth_sql: request.ground_truth_sql.clone(),
            complexity: request.complexity.clone(),
            structural_score: structural.score,
            semantic_score: 0.0,
            llm_score: 0.0,
            final_score: 0.0,
            final_result: Verdict::Fail,
            confidence: 0.0,
            reasoning: structural.errors.join("; "),
            outcome: EvaluationOutcome::StructuralFail { structural },
            evaluation_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_with_result_validation() {
        let (score, verdict, confidence) =
            calculate_final_score(1.0, 0.8, 1.0, 0.9, Some(1.0), 0.7);
        let expected = 0.40 * 1.0 + 0.15 * 0.8 + 0.15 * 1.0 + 0.30 * 1.0;
        assert!((score - expected).abs() < 1e-9);
        assert_eq!(verdict, Verdict::Pass);
        assert!((confidence - (0.9 + expected) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_legacy_weights_without_result_validation() {
        let (score, _, _) = calculate_final_score(1.0, 0.8, 1.0, 0.9, None, 0.7);
        let expected = 0.60 * 1.0 + 0.10 * 0.8 + 0.30 * 1.0;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_result_validation_falls_back_to_legacy() {
        let with_none = calculate_final_score(1.0, 0.5, 1.0, 0.9, None, 0.7).0;
        let with_zero = calculate_final_score(1.0, 0.5, 1.0, 0.9, Some(0.0), 0.7).0;
        assert_eq!(with_none, with_zero);
    }

    #[test]
    fn test_verdict_threshold() {
        let (_, fail, _) = calculate_final_score(0.5, 0.5, 0.0, 0.5, None, 0.7);
        assert_eq!(fail, Verdict::Fail);
        let (_, pass, _) = calculate_final_score(1.0, 1.0, 1.0, 1.0, Some(1.0), 0.7);
        assert_eq!(pass, Verdict::Pass);
    }

    #[test]
    fn test_happy_path_score_exceeds_095() {
        // Perfect structural + result validation with a passing judge
        let (score, verdict, _) = calculate_final_score(1.0, 1.0, 1.0, 0.95, Some(1.0), 0.7);
        assert!(score >= 0.95);
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn test_final_score_bounded_by_components() {
        // Property: with weights {0.40, 0.15, 0.15, 0.30} the final score
        // lies between the min and max component values.
        let components = [0.9, 0.4, 1.0, 0.7];
        let (score, _, _) = calculate_final_score(
            components[0],
            components[1],
            components[2],
            0.5,
            Some(components[3]),
            0.7,
        );
        let min = components.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = components.iter().cloned().fold(0.0, f64::max);
        assert!(score >= min && score <= max);
    }
}
