//! Result-set comparison
//!
//! Compares two executions (or an execution against a stored expected
//! output) with ordering normalization and typed value equality. Scoring
//! ladder: ≥99% content match → 1.0, ≥95% → 0.95, ≥80% → 0.80, else the
//! raw rate; schema mismatch caps at 0.1, row-count mismatch at 0.3.

use serde::Serialize;
use std::collections::HashSet;

use crate::agentdb::SqlValue;

/// Numeric comparison tolerance
pub const EPSILON: f64 = 1e-4;

/// Outcome of one comparison
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub matched: bool,
    pub score: f64,
    pub schema_match: bool,
    pub row_count_match: bool,
    pub content_match_rate: f64,
    pub ordering_matters: bool,
}

/// Compare two result sets.
pub fn compare(
    columns1: &[String],
    rows1: &[Vec<SqlValue>],
    columns2: &[String],
    rows2: &[Vec<SqlValue>],
    sql1: &str,
    sql2: &str,
) -> ComparisonResult {
    let schema_match = schemas_equal(columns1, columns2);
    if !schema_match {
        return ComparisonResult {
            matched: false,
            score: 0.1,
            schema_match: false,
            row_count_match: false,
            content_match_rate: 0.0,
            ordering_matters: false,
        };
    }

    let row_count_match = rows1.len() == rows2.len();
    if !row_count_match {
        return ComparisonResult {
            matched: false,
            score: 0.3,
            schema_match: true,
            row_count_match: false,
            content_match_rate: 0.0,
            ordering_matters: false,
        };
    }

    let ordering_matters = has_outer_order_by(sql1) || has_outer_order_by(sql2);
    let content_match_rate = if ordering_matters {
        compare_ordered(rows1, rows2)
    } else {
        compare_unordered(rows1, rows2)
    };

    let (score, matched) = if content_match_rate >= 0.99 {
        (1.0, true)
    } else if content_match_rate >= 0.95 {
        (0.95, true)
    } else if content_match_rate >= 0.80 {
        (0.80, false)
    } else {
        (content_match_rate, false)
    };

    ComparisonResult {
        matched,
        score,
        schema_match: true,
        row_count_match: true,
        content_match_rate,
        ordering_matters,
    }
}

/// Column-name multiset equality, case- and whitespace-insensitive.
fn schemas_equal(cols1: &[String], cols2: &[String]) -> bool {
    let mut norm1: Vec<String> = cols1.iter().map(|c| c.trim().to_lowercase()).collect();
    let mut norm2: Vec<String> = cols2.iter().map(|c| c.trim().to_lowercase()).collect();
    norm1.sort();
    norm2.sort();
    norm1 == norm2
}

/// ORDER BY outside any subquery makes row order significant.
fn has_outer_order_by(sql: &str) -> bool {
    if sql.is_empty() {
        return false;
    }
    let upper = sql.to_uppercase();
    match upper.rfind(')') {
        None => upper.contains("ORDER BY"),
        Some(last_paren) => upper[last_paren..].contains("ORDER BY"),
    }
}

fn compare_ordered(rows1: &[Vec<SqlValue>], rows2: &[Vec<SqlValue>]) -> f64 {
    if rows1.is_empty() {
        return 1.0;
    }
    let matched = rows1
        .iter()
        .zip(rows2.iter())
        .filter(|(a, b)| rows_equal(a, b))
        .count();
    matched as f64 / rows1.len() as f64
}

fn compare_unordered(rows1: &[Vec<SqlValue>], rows2: &[Vec<SqlValue>]) -> f64 {
    if rows1.is_empty() {
        return 1.0;
    }

    let sortable = |rows: &[Vec<SqlValue>]| -> Vec<Vec<SqlValue>> {
        let mut sorted = rows.to_vec();
        sorted.sort_by_key(|row| row.iter().map(SqlValue::sort_key).collect::<Vec<_>>());
        sorted
    };

    let sorted1 = sortable(rows1);
    let sorted2 = sortable(rows2);

    let matched = sorted1
        .iter()
        .zip(sorted2.iter())
        .filter(|(a, b)| rows_equal(a, b))
        .count();
    let rate = matched as f64 / rows1.len() as f64;

    // Canonical sort can pair rows badly when values straddle type ranks;
    // set intersection is the floor for those cases.
    if rate < 1.0 {
        rate.max(compare_as_sets(rows1, rows2))
    } else {
        rate
    }
}

/// Jaccard over normalized row renderings, used when sorting mispairs rows.
fn compare_as_sets(rows1: &[Vec<SqlValue>], rows2: &[Vec<SqlValue>]) -> f64 {
    let normalize = |rows: &[Vec<SqlValue>]| -> HashSet<String> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .map(normalize_value)
                    .collect::<Vec<_>>()
                    .join("\u{1f}")
            })
            .collect()
    };

    let set1 = normalize(rows1);
    let set2 = normalize(rows2);
    if set1.is_empty() && set2.is_empty() {
        return 1.0;
    }
    let intersection = set1.intersection(&set2).count();
    let union = set1.union(&set2).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

fn normalize_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\u{0}null".to_string(),
        SqlValue::Bool(b) => format!("b:{b}"),
        SqlValue::Int(_) | SqlValue::Float(_) => {
            format!("n:{:.6}", value.as_f64().unwrap_or(0.0))
        }
        SqlValue::Text(s) => format!("s:{}", s.trim()),
        SqlValue::Timestamp(_) | SqlValue::Date(_) => {
            format!("t:{}", value.iso_form().unwrap_or_default())
        }
    }
}

fn rows_equal(row1: &[SqlValue], row2: &[SqlValue]) -> bool {
    row1.len() == row2.len()
        && row1
            .iter()
            .zip(row2.iter())
            .all(|(a, b)| values_equal(a, b))
}

/// Typed equality: numerics within epsilon, temporals by ISO form (also
/// against their string rendering), strings trimmed, NULL only equal to
/// NULL.
pub fn values_equal(v1: &SqlValue, v2: &SqlValue) -> bool {
    match (v1, v2) {
        (SqlValue::Null, SqlValue::Null) => true,
        (SqlValue::Null, _) | (_, SqlValue::Null) => false,
        (SqlValue::Bool(a), SqlValue::Bool(b)) => a == b,
        _ => {
            if let (Some(a), Some(b)) = (v1.as_f64(), v2.as_f64()) {
                return (a - b).abs() < EPSILON;
            }
            match (v1.iso_form(), v2.iso_form()) {
                (Some(a), Some(b)) => a == b,
                // Artifact JSON stores temporals as ISO strings
                (Some(iso), None) => matches!(v2, SqlValue::Text(s) if s.trim() == iso),
                (None, Some(iso)) => matches!(v1, SqlValue::Text(s) if s.trim() == iso),
                (None, None) => match (v1, v2) {
                    (SqlValue::Text(a), SqlValue::Text(b)) => a.trim() == b.trim(),
                    _ => false,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_results_score_one() {
        let columns = cols(&["count"]);
        let rows = vec![vec![SqlValue::Int(42)]];
        let result = compare(&columns, &rows, &columns, &rows, "SELECT 1", "SELECT 1");
        assert!(result.matched);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.content_match_rate, 1.0);
    }

    #[test]
    fn test_schema_mismatch_caps_at_point_one() {
        let result = compare(
            &cols(&["count"]),
            &[vec![SqlValue::Int(1)]],
            &cols(&["total"]),
            &[vec![SqlValue::Int(1)]],
            "",
            "",
        );
        assert!(!result.schema_match);
        assert_eq!(result.score, 0.1);
    }

    #[test]
    fn test_schema_match_is_case_and_order_insensitive() {
        let result = compare(
            &cols(&["Region", "Total "]),
            &[],
            &cols(&["total", "region"]),
            &[],
            "",
            "",
        );
        assert!(result.schema_match);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_row_count_mismatch_caps_at_point_three() {
        let columns = cols(&["x"]);
        let result = compare(
            &columns,
            &[vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
            &columns,
            &[vec![SqlValue::Int(1)]],
            "",
            "",
        );
        assert!(result.schema_match);
        assert!(!result.row_count_match);
        assert_eq!(result.score, 0.3);
    }

    #[test]
    fn test_both_empty_with_equal_columns_is_full_match() {
        let columns = cols(&["a", "b"]);
        let result = compare(&columns, &[], &columns, &[], "", "");
        assert!(result.matched);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_unordered_rows_match_after_sort() {
        let columns = cols(&["x"]);
        let a = vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]];
        let b = vec![vec![SqlValue::Int(2)], vec![SqlValue::Int(1)]];
        let result = compare(&columns, &a, &columns, &b, "SELECT x FROM t", "SELECT x FROM t");
        assert_eq!(result.score, 1.0);
        assert!(!result.ordering_matters);
    }

    #[test]
    fn test_outer_order_by_makes_order_significant() {
        let columns = cols(&["x"]);
        let a = vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]];
        let b = vec![vec![SqlValue::Int(2)], vec![SqlValue::Int(1)]];
        let result = compare(
            &columns,
            &a,
            &columns,
            &b,
            "SELECT x FROM t ORDER BY x",
            "SELECT x FROM t",
        );
        assert!(result.ordering_matters);
        assert!(result.score < 1.0);
    }

    #[test]
    fn test_order_by_inside_subquery_does_not_count() {
        assert!(!has_outer_order_by(
            "SELECT * FROM (SELECT x FROM t ORDER BY x) sub"
        ));
        assert!(has_outer_order_by(
            "SELECT * FROM (SELECT x FROM t) sub ORDER BY x"
        ));
    }

    #[test]
    fn test_numeric_epsilon() {
        assert!(values_equal(
            &SqlValue::Float(1.00001),
            &SqlValue::Float(1.000019)
        ));
        assert!(!values_equal(&SqlValue::Float(1.0), &SqlValue::Float(1.1)));
        assert!(values_equal(&SqlValue::Int(5), &SqlValue::Float(5.0)));
    }

    #[test]
    fn test_null_distinct_from_everything() {
        assert!(values_equal(&SqlValue::Null, &SqlValue::Null));
        assert!(!values_equal(&SqlValue::Null, &SqlValue::Int(0)));
        assert!(!values_equal(&SqlValue::Text("".into()), &SqlValue::Null));
    }

    #[test]
    fn test_temporal_vs_iso_string() {
        let date = SqlValue::Date(NaiveDate::from_ymd_opt(2021, 2, 1).unwrap());
        assert!(values_equal(&date, &SqlValue::Text("2021-02-01".into())));
        assert!(!values_equal(&date, &SqlValue::Text("2021-02-02".into())));
    }

    #[test]
    fn test_strings_trimmed() {
        assert!(values_equal(
            &SqlValue::Text(" haircare ".into()),
            &SqlValue::Text("haircare".into())
        ));
    }

    #[test]
    fn test_partial_content_match_scoring_ladder() {
        let columns = cols(&["x"]);
        // 100 rows, 96 matching -> rate 0.96 -> score 0.95
        let a: Vec<Vec<SqlValue>> = (0..100).map(|i| vec![SqlValue::Int(i)]).collect();
        let mut b = a.clone();
        for (i, row) in b.iter_mut().enumerate().take(4) {
            row[0] = SqlValue::Int(1000 + i as i64);
        }
        let result = compare(
            &columns,
            &a,
            &columns,
            &b,
            "SELECT x FROM t ORDER BY x",
            "",
        );
        assert!(result.content_match_rate >= 0.95 && result.content_match_rate < 0.99);
        assert_eq!(result.score, 0.95);
    }
}
