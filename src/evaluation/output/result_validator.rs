//! Result validation - the evaluator's strongest signal
//!
//! Two modes: compare the candidate's live output against a stored expected
//! output (preferred, one execution), or execute both candidate and
//! reference SQL and compare the two live result sets. Either way the
//! comparator produces the score.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use super::comparator::{self, ComparisonResult};
use crate::agentdb::{ExecutionResult, QueryExecutor};
use crate::ground_truth::ExpectedOutput;

/// Confidence that the matched ground truth is actually the right
/// reference, derived from the semantic similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

impl MatchConfidence {
    /// Semantic similarity → reference confidence.
    pub fn from_semantic_score(score: f64) -> Self {
        if score >= 0.90 {
            MatchConfidence::High
        } else if score >= 0.75 {
            MatchConfidence::Medium
        } else {
            MatchConfidence::Low
        }
    }

    fn factor(&self) -> f64 {
        match self {
            MatchConfidence::High => 1.0,
            MatchConfidence::Medium => 0.9,
            MatchConfidence::Low => 0.75,
        }
    }
}

/// Outcome of one result validation
#[derive(Debug, Clone, Serialize)]
pub struct ResultValidation {
    pub score: f64,
    pub confidence: f64,
    pub execution_success: bool,
    pub schema_match: bool,
    pub row_count_match: bool,
    pub content_match_rate: f64,
    pub generated_execution_time_ms: f64,
    pub gt_execution_time_ms: Option<f64>,
    pub error: Option<String>,
    pub comparison: Option<ComparisonResult>,
}

impl ResultValidation {
    fn execution_failed(error: String) -> Self {
        Self {
            score: 0.0,
            confidence: 1.0,
            execution_success: false,
            schema_match: false,
            row_count_match: false,
            content_match_rate: 0.0,
            generated_execution_time_ms: 0.0,
            gt_execution_time_ms: None,
            error: Some(error),
            comparison: None,
        }
    }
}

/// Executes candidate/reference SQL and compares outputs
pub struct ResultValidator {
    executor: QueryExecutor,
}

impl ResultValidator {
    pub fn new(timeout: Duration, max_rows: usize) -> Self {
        Self {
            executor: QueryExecutor::new(timeout, max_rows),
        }
    }

    /// Compare the candidate's live output against a stored expected output.
    pub async fn validate_with_expected_output(
        &self,
        generated_sql: &str,
        expected: &ExpectedOutput,
        db_url: &str,
    ) -> ResultValidation {
        info!("Result validation against stored expected output");
        let generated = self.executor.execute(generated_sql, db_url).await;
        if !generated.success {
            return ResultValidation::execution_failed(
                generated.error.unwrap_or_else(|| "execution failed".into()),
            );
        }

        // Stored outputs cap their sample rows; compare within that window
        // when the live result is larger but the totals agree.
        let live_rows: Vec<_> = if expected.row_count as usize == generated.row_count
            && generated.rows.len() > expected.sample_rows.len()
        {
            generated.rows[..expected.sample_rows.len()].to_vec()
        } else {
            generated.rows.clone()
        };

        let comparison = comparator::compare(
            &generated.columns,
            &live_rows,
            &expected.columns,
            &expected.sample_rows,
            generated_sql,
            "",
        );

        ResultValidation {
            score: comparison.score,
            confidence: 1.0,
            execution_success: true,
            schema_match: comparison.schema_match,
            row_count_match: comparison.row_count_match,
            content_match_rate: comparison.content_match_rate,
            generated_execution_time_ms: generated.execution_time_ms,
            gt_execution_time_ms: Some(expected.execution_time_ms),
            error: None,
            comparison: Some(comparison),
        }
    }

    /// Execute both statements and compare the live result sets.
    pub async fn validate_with_reference_sql(
        &self,
        generated_sql: &str,
        ground_truth_sql: &str,
        db_url: &str,
        match_confidence: MatchConfidence,
    ) -> ResultValidation {
        info!("Result validation by dual execution (confidence {match_confidence:?})");

        let generated = self.executor.execute(generated_sql, db_url).await;
        if !generated.success {
            return ResultValidation::execution_failed(
                generated.error.unwrap_or_else(|| "execution failed".into()),
            );
        }

        let reference = self.executor.execute(ground_truth_sql, db_url).await;
        if !reference.success {
            // A broken reference is not the candidate's fault
            warn!(
                "Reference SQL failed to execute: {}",
                reference.error.clone().unwrap_or_default()
            );
            return ResultValidation {
                score: 0.5,
                confidence: 0.2,
                execution_success: true,
                schema_match: false,
                row_count_match: false,
                content_match_rate: 0.0,
                generated_execution_time_ms: generated.execution_time_ms,
                gt_execution_time_ms: None,
                error: reference.error,
                comparison: None,
            };
        }

        let comparison = compare_executions(&generated, &reference, generated_sql, ground_truth_sql);

        ResultValidation {
            score: comparison.score * match_confidence.factor(),
            confidence: match_confidence.factor(),
            execution_success: true,
            schema_match: comparison.schema_match,
            row_count_match: comparison.row_count_match,
            content_match_rate: comparison.content_match_rate,
            generated_execution_time_ms: generated.execution_time_ms,
            gt_execution_time_ms: Some(reference.execution_time_ms),
            error: None,
            comparison: Some(comparison),
        }
    }
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 10_000)
    }
}

fn compare_executions(
    generated: &ExecutionResult,
    reference: &ExecutionResult,
    sql1: &str,
    sql2: &str,
) -> ComparisonResult {
    comparator::compare(
        &generated.columns,
        &generated.rows,
        &reference.columns,
        &reference.rows,
        sql1,
        sql2,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_confidence_bands() {
        assert_eq!(
            MatchConfidence::from_semantic_score(0.95),
            MatchConfidence::High
        );
        assert_eq!(
            MatchConfidence::from_semantic_score(0.80),
            MatchConfidence::Medium
        );
        assert_eq!(
            MatchConfidence::from_semantic_score(0.50),
            MatchConfidence::Low
        );
    }

    #[test]
    fn test_confidence_factor_discounts_score() {
        assert_eq!(MatchConfidence::High.factor(), 1.0);
        assert!(MatchConfidence::Medium.factor() < 1.0);
        assert!(MatchConfidence::Low.factor() < MatchConfidence::Medium.factor());
    }
}
