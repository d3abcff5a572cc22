//! Cross-module evaluation scenarios
//!
//! These exercise the decision logic end to end with deterministic inputs:
//! ground-truth matching, the weighted scoring paths, the drift veto, and
//! the structural-failure classification chain. Everything here runs
//! without a database or remote providers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use agent_sentinel::agentdb::SqlValue;
use agent_sentinel::auth::{generate_api_key, hash_api_key};
use agent_sentinel::evaluation::evaluator::calculate_final_score;
use agent_sentinel::evaluation::gt_lookup::MATCH_THRESHOLD;
use agent_sentinel::evaluation::layers::{HeuristicManager, IntentLayer};
use agent_sentinel::evaluation::output::comparator;
use agent_sentinel::evaluation::structural::{classify_explain_error, SqlErrorType};
use agent_sentinel::evaluation::{GroundTruthIndex, SemanticChecker, Verdict};
use agent_sentinel::ground_truth::{ExpectedOutput, GroundTruthArtifact, GroundTruthQuery};
use agent_sentinel::monitoring::error_classifier::classify_error;
use sentinel_matcher::{EmbedderError, TextEmbedder};

/// Deterministic embedder: fixed unit vectors per topic.
struct StubEmbedder;

#[async_trait]
impl TextEmbedder for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let lower = text.to_lowercase();
        Ok(if lower.contains("stock") {
            vec![1.0, 0.0, 0.0]
        } else if lower.contains("revenue") {
            vec![0.0, 1.0, 0.0]
        } else {
            // junk direction, far from both references
            vec![0.0, 0.0, 1.0]
        })
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_id(&self) -> &str {
        "stub"
    }
}

fn demand_artifact() -> GroundTruthArtifact {
    let mut artifact = GroundTruthArtifact::empty(1, "demand");
    artifact.queries.push(GroundTruthQuery {
        id: Some(1),
        natural_language: "How many products are in stock?".into(),
        sql: "SELECT COUNT(*) FROM products WHERE stock_levels > 0".into(),
        complexity: Some("simple".into()),
        expected_output: Some(ExpectedOutput {
            columns: vec!["count".into()],
            row_count: 1,
            sample_rows: vec![vec![SqlValue::Int(42)]],
            execution_time_ms: 5.0,
        }),
        generation_error: None,
        generated_at: None,
        incremental: None,
    });
    artifact.queries.push(GroundTruthQuery {
        id: Some(2),
        natural_language: "Total revenue per region".into(),
        sql: "SELECT region, SUM(revenue) FROM orders GROUP BY region".into(),
        complexity: Some("medium".into()),
        expected_output: None,
        generation_error: None,
        generated_at: None,
        incremental: None,
    });
    artifact.total_queries = 2;
    artifact
}

// ============================================================================
// Happy path with ground truth
// ============================================================================

#[tokio::test]
async fn happy_path_with_ground_truth_scores_pass() {
    // Lookup: a close paraphrase matches the stocked reference
    let index = GroundTruthIndex::build(demand_artifact(), Arc::new(StubEmbedder))
        .await
        .unwrap();
    let gt = index
        .find_match("how many products in stock?", MATCH_THRESHOLD)
        .await
        .unwrap()
        .expect("paraphrase should clear the 0.95 threshold");
    assert!(gt.sql.contains("stock_levels"));
    let expected = gt.expected_output.expect("reference carries expected output");

    // Candidate SQL is semantically equivalent to the reference (the WHERE
    // clause compares raw, so the spacing difference costs a little)
    let checker = SemanticChecker::default();
    let candidate = "SELECT COUNT(*) FROM products WHERE stock_levels>0";
    let semantic = checker.check_equivalence(candidate, &gt.sql);
    assert!(semantic.similarity_score >= 0.7, "got {}", semantic.similarity_score);

    // The live execution reproduces the stored output exactly
    let comparison = comparator::compare(
        &["count".to_string()],
        &[vec![SqlValue::Int(42)]],
        &expected.columns,
        &expected.sample_rows,
        candidate,
        "",
    );
    assert_eq!(comparison.score, 1.0);

    // Structural 1.0 + passing judge + perfect result validation
    let (final_score, verdict, confidence) = calculate_final_score(
        1.0,
        semantic.similarity_score,
        1.0,
        0.95,
        Some(comparison.score),
        0.7,
    );
    assert!(final_score >= 0.95, "got {final_score}");
    assert_eq!(verdict, Verdict::Pass);
    assert!(confidence > 0.9);
}

// ============================================================================
// Junk query vetoed by drift
// ============================================================================

#[tokio::test]
async fn junk_query_misses_ground_truth_and_gets_vetoed() {
    let index = GroundTruthIndex::build(demand_artifact(), Arc::new(StubEmbedder))
        .await
        .unwrap();
    let miss = index.find_match("asdf qwer", MATCH_THRESHOLD).await.unwrap();
    assert!(miss.is_none(), "junk must not match any reference");

    // Heuristic path with drift quality below the veto line
    let manager = HeuristicManager::new(IntentLayer::new(&HashMap::new()), 0.7);
    let outcome = manager.evaluate("asdf qwer", "SELECT * FROM products", 1.0, 0.05);

    assert_eq!(outcome.final_result, Verdict::Fail);
    assert_eq!(outcome.final_score, 0.0);
    assert_eq!(outcome.confidence, 0.0);
    assert!(outcome.drift_vetoed);
}

// ============================================================================
// Structural failure feeds the classifier
// ============================================================================

#[test]
fn undefined_table_classifies_as_context_retrieval() {
    let db_error = "ERROR: relation \"nonexistent\" does not exist";

    // EXPLAIN-stage mapping marks it classifiable
    let error_type = classify_explain_error(db_error);
    assert_eq!(error_type, SqlErrorType::UndefinedTable);
    assert!(error_type.is_classifiable());

    // The taxonomy rules land it in CONTEXT_RETRIEVAL at high severity
    let classification = classify_error(db_error);
    assert_eq!(classification.error_category, "CONTEXT_RETRIEVAL");
    assert!(matches!(
        classification.severity.as_str(),
        "medium" | "high" | "critical"
    ));
}

#[test]
fn permission_error_fails_without_classification() {
    let error_type = classify_explain_error("permission denied for relation orders");
    assert_eq!(error_type, SqlErrorType::Other);
    assert!(!error_type.is_classifiable());
}

// ============================================================================
// API-key rotation
// ============================================================================

#[test]
fn rotated_key_invalidates_the_old_hash() {
    let original = generate_api_key("demand");
    let rotated = generate_api_key("demand");

    // Exactly one hash is valid at any time: the stored hash is replaced
    // atomically, so the old key's hash no longer matches.
    assert_ne!(original.key_hash, rotated.key_hash);
    assert_eq!(hash_api_key(&rotated.full_key), rotated.key_hash);
    assert_ne!(hash_api_key(&original.full_key), rotated.key_hash);
}

// ============================================================================
// Scoring invariants
// ============================================================================

#[test]
fn final_score_respects_declared_weights() {
    let (with_result, _, _) = calculate_final_score(0.8, 0.6, 1.0, 0.9, Some(0.5), 0.7);
    let expected = 0.40 * 0.8 + 0.15 * 0.6 + 0.15 * 1.0 + 0.30 * 0.5;
    assert!((with_result - expected).abs() < 1e-9);

    let (without_result, _, _) = calculate_final_score(0.8, 0.6, 1.0, 0.9, None, 0.7);
    let expected_legacy = 0.60 * 0.8 + 0.10 * 0.6 + 0.30 * 1.0;
    assert!((without_result - expected_legacy).abs() < 1e-9);
}

#[test]
fn comparator_boundary_empty_results() {
    let columns = vec!["a".to_string()];
    let same = comparator::compare(&columns, &[], &columns, &[], "", "");
    assert_eq!(same.score, 1.0);

    let different = comparator::compare(&columns, &[], &["b".to_string()], &[], "", "");
    assert_eq!(different.score, 0.1);
}

#[tokio::test]
async fn matcher_round_trip_returns_the_member_itself() {
    let index = GroundTruthIndex::build(demand_artifact(), Arc::new(StubEmbedder))
        .await
        .unwrap();
    let hit = index
        .find_match("Total revenue per region", 0.999)
        .await
        .unwrap()
        .unwrap();
    assert!(hit.sql.contains("SUM(revenue)"));
    assert!(hit.similarity >= 0.999);
}
