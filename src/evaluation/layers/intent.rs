//! Intent-matching layer
//!
//! Detects what the natural-language question asks for (schema-aware phrase
//! patterns plus keyword context) and what operations the SQL actually
//! performs, then scores requested vs. fulfilled with bonuses and penalties.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Data types that mark dimension columns (GROUP BY candidates)
const DIMENSION_TYPES: [&str; 4] = ["character varying", "varchar", "text", "character"];
/// Data types that mark measure columns (aggregation candidates)
const MEASURE_TYPES: [&str; 7] = [
    "integer",
    "numeric",
    "decimal",
    "real",
    "double precision",
    "bigint",
    "smallint",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Filtering,
    Summation,
    Aggregation,
    Maximization,
    Minimization,
    Grouping,
    Sorting,
    Limiting,
}

/// Schema-aware intent scorer
pub struct IntentLayer {
    dimension_columns: HashSet<String>,
    measure_columns: HashSet<String>,
}

impl IntentLayer {
    pub fn new(schema_info: &HashMap<String, HashMap<String, String>>) -> Self {
        let mut dimension_columns = HashSet::new();
        let mut measure_columns = HashSet::new();

        for columns in schema_info.values() {
            for (name, data_type) in columns {
                let ty = data_type.to_lowercase();
                if DIMENSION_TYPES.contains(&ty.as_str()) {
                    dimension_columns.insert(name.to_lowercase());
                } else if MEASURE_TYPES.contains(&ty.as_str()) {
                    measure_columns.insert(name.to_lowercase());
                }
            }
        }

        debug!(
            "IntentLayer schema-aware: {} dimensions, {} measures",
            dimension_columns.len(),
            measure_columns.len()
        );

        Self {
            dimension_columns,
            measure_columns,
        }
    }

    /// Score how well the SQL fulfils the question's intents, in [0, 1].
    pub fn evaluate(&self, user_query: &str, sql: &str) -> f64 {
        let query_lower = user_query.to_lowercase();
        let sql_upper = sql.to_uppercase();

        let requested = self.detect_query_intents(&query_lower);
        let fulfilled = analyze_sql_operations(&sql_upper);
        let score = calculate_intent_score(&requested, &fulfilled, &sql_upper);

        debug!("Intent analysis: requested={requested:?}, fulfilled={fulfilled:?}, score={score:.3}");
        score
    }

    fn detect_query_intents(&self, query_lower: &str) -> HashSet<Intent> {
        let mut intents = HashSet::new();

        if Regex::new(r"\b(list|show|get|find|select)\b.*\b(with|where|having)\b.*[<>=]")
            .unwrap()
            .is_match(query_lower)
        {
            intents.insert(Intent::Filtering);
        }
        if Regex::new(r"\b(breakdown|break down|group by|split by)\b")
            .unwrap()
            .is_match(query_lower)
        {
            intents.insert(Intent::Grouping);
        }
        if Regex::new(r"\b(top|highest|maximum|best)\b.*\b(by|in terms of)\b")
            .unwrap()
            .is_match(query_lower)
        {
            intents.insert(Intent::Maximization);
        }
        if Regex::new(r"\b(lowest|minimum|bottom|worst)\b.*\b(by|in terms of)\b")
            .unwrap()
            .is_match(query_lower)
        {
            intents.insert(Intent::Minimization);
        }
        if Regex::new(r"\b(top|first)\s+\d+").unwrap().is_match(query_lower) {
            intents.insert(Intent::Limiting);
        }

        if self.has_comparison_context(query_lower) {
            intents.insert(Intent::Filtering);
        }
        if self.has_grouping_context(query_lower) {
            intents.insert(Intent::Grouping);
        }

        if self.has_aggregation_context(query_lower) {
            if ["total", "sum", "count", "number of"]
                .iter()
                .any(|kw| query_lower.contains(kw))
            {
                intents.insert(Intent::Summation);
            } else if ["average", "mean", "avg"].iter().any(|kw| query_lower.contains(kw)) {
                intents.insert(Intent::Aggregation);
            } else if ["highest", "maximum", "max", "top", "most"]
                .iter()
                .any(|kw| query_lower.contains(kw))
            {
                intents.insert(Intent::Maximization);
            } else if ["lowest", "minimum", "min", "bottom", "least"]
                .iter()
                .any(|kw| query_lower.contains(kw))
            {
                intents.insert(Intent::Minimization);
            }
        }

        // Count questions imply summation even without a measure column
        if Regex::new(r"\b(count|number of|how many)\b").unwrap().is_match(query_lower) {
            intents.insert(Intent::Summation);
        }

        if ["sort", "order", "rank"].iter().any(|kw| query_lower.contains(kw)) {
            intents.insert(Intent::Sorting);
        }
        if Regex::new(r"\b(top|first|limit)\s+\d+").unwrap().is_match(query_lower) {
            intents.insert(Intent::Limiting);
        }

        intents
    }

    fn has_comparison_context(&self, query_lower: &str) -> bool {
        let patterns = [
            r"\b\w+\s*[<>=]+\s*\d+",
            r"\b(greater|less|equal|above|below|between)\s+(than|to)\b",
            r"\b(with|where|having)\b.*\b(greater|less|above|below|equal)\b",
        ];
        patterns
            .iter()
            .any(|p| Regex::new(p).unwrap().is_match(query_lower))
    }

    fn has_grouping_context(&self, query_lower: &str) -> bool {
        // "revenue per campaign" / "clicks by category"
        let words: Vec<&str> = query_lower.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            if (*word == "per" || *word == "by") && i > 0 && i + 1 < words.len() {
                let before = words[i - 1].trim_matches(|c: char| !c.is_alphanumeric());
                let after = words[i + 1].trim_matches(|c: char| !c.is_alphanumeric());
                if self.measure_columns.contains(before) && self.dimension_columns.contains(after) {
                    return true;
                }
            }
        }
        ["group by", "breakdown", "break down", "split by"]
            .iter()
            .any(|phrase| query_lower.contains(phrase))
    }

    fn has_aggregation_context(&self, query_lower: &str) -> bool {
        // A comparison against a measure reads as filtering, not aggregation
        if self.has_comparison_context(query_lower) {
            return false;
        }

        let agg_keywords = [
            "total", "sum", "average", "mean", "avg", "count", "max", "min", "highest", "lowest",
        ];
        for measure in &self.measure_columns {
            if let Some(idx) = query_lower.find(measure.as_str()) {
                let context_start = idx.saturating_sub(30);
                let context = &query_lower[context_start..idx];
                if agg_keywords.iter().any(|kw| context.contains(kw)) {
                    return true;
                }
            }
        }
        false
    }
}

/// What the SQL actually does
fn analyze_sql_operations(sql_upper: &str) -> HashSet<Intent> {
    let mut operations = HashSet::new();

    if sql_upper.contains("WHERE") {
        operations.insert(Intent::Filtering);
    }
    if Regex::new(r"\b(SUM|COUNT)\s*\(").unwrap().is_match(sql_upper) {
        operations.insert(Intent::Summation);
    }
    if Regex::new(r"\bAVG\s*\(").unwrap().is_match(sql_upper) {
        operations.insert(Intent::Aggregation);
    }
    if Regex::new(r"\bMAX\s*\(").unwrap().is_match(sql_upper) {
        operations.insert(Intent::Maximization);
    }
    if Regex::new(r"\bMIN\s*\(").unwrap().is_match(sql_upper) {
        operations.insert(Intent::Minimization);
    }
    if sql_upper.contains("GROUP BY") {
        operations.insert(Intent::Grouping);
    }
    if sql_upper.contains("ORDER BY") {
        operations.insert(Intent::Sorting);
        if sql_upper.contains("DESC") {
            operations.insert(Intent::Maximization);
        } else {
            operations.insert(Intent::Minimization);
        }
    }
    if Regex::new(r"\bLIMIT\s+\d+").unwrap().is_match(sql_upper) {
        operations.insert(Intent::Limiting);
    }

    operations
}

fn calculate_intent_score(
    requested: &HashSet<Intent>,
    fulfilled: &HashSet<Intent>,
    sql_upper: &str,
) -> f64 {
    // No detectable intent: a plain listing should stay plain
    if requested.is_empty() {
        let complex = sql_upper.contains("WHERE")
            || sql_upper.contains("GROUP BY")
            || sql_upper.contains("ORDER BY");
        return if complex { 0.8 } else { 1.0 };
    }

    let matched = requested.intersection(fulfilled).count();
    let missing = requested.difference(fulfilled).count();
    let unrequested = fulfilled.difference(requested).count();

    let base_score = matched as f64 / requested.len() as f64;

    let miss_penalty = missing as f64 * 0.20;
    let unrequested_penalty = unrequested as f64 * 0.05;

    let coverage_bonus = match matched {
        0 | 1 => 0.0,
        2 => 0.05,
        _ => 0.10,
    };

    let mut specificity_bonus = 0.0;
    if !sql_upper.contains("SELECT *") {
        specificity_bonus += 0.03;
    }
    if sql_upper.contains(" AS ") {
        specificity_bonus += 0.02;
    }

    let final_score =
        base_score + coverage_bonus + specificity_bonus - miss_penalty - unrequested_penalty;

    debug!(
        "Intent score breakdown: base={base_score:.2}, matched={matched}, missing={missing}, \
         unrequested={unrequested}, final={final_score:.2}"
    );

    final_score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> HashMap<String, HashMap<String, String>> {
        let mut columns: HashMap<String, String> = HashMap::new();
        columns.insert("revenue".into(), "numeric".into());
        columns.insert("clicks".into(), "integer".into());
        columns.insert("campaign".into(), "text".into());
        columns.insert("category".into(), "varchar".into());
        let mut info = HashMap::new();
        info.insert("campaigns".to_string(), columns);
        info
    }

    #[test]
    fn test_count_question_fulfilled_by_count() {
        let layer = IntentLayer::new(&schema());
        let score = layer.evaluate(
            "How many campaigns are there?",
            "SELECT COUNT(*) FROM campaigns",
        );
        assert!(score >= 0.9, "got {score}");
    }

    #[test]
    fn test_count_question_unfulfilled() {
        let layer = IntentLayer::new(&schema());
        let fulfilled = layer.evaluate("How many campaigns?", "SELECT COUNT(*) FROM campaigns");
        let unfulfilled = layer.evaluate("How many campaigns?", "SELECT name FROM campaigns");
        assert!(unfulfilled < fulfilled);
    }

    #[test]
    fn test_grouping_from_measure_per_dimension() {
        let layer = IntentLayer::new(&schema());
        let score = layer.evaluate(
            "revenue per campaign",
            "SELECT campaign, SUM(revenue) FROM campaigns GROUP BY campaign",
        );
        assert!(score >= 0.7, "got {score}");
    }

    #[test]
    fn test_plain_listing_perfect_for_simple_sql() {
        let layer = IntentLayer::new(&schema());
        assert_eq!(layer.evaluate("campaigns", "SELECT name FROM campaigns"), 1.0);
    }

    #[test]
    fn test_plain_listing_with_complex_sql() {
        let layer = IntentLayer::new(&schema());
        let score = layer.evaluate(
            "campaigns",
            "SELECT name FROM campaigns WHERE clicks > 5 ORDER BY name",
        );
        assert_eq!(score, 0.8);
    }

    #[test]
    fn test_comparison_implies_filtering() {
        let layer = IntentLayer::new(&schema());
        let good = layer.evaluate(
            "show campaigns with revenue greater than 1000",
            "SELECT campaign FROM campaigns WHERE revenue > 1000",
        );
        let bad = layer.evaluate(
            "show campaigns with revenue greater than 1000",
            "SELECT campaign FROM campaigns",
        );
        assert!(good > bad);
    }

    #[test]
    fn test_top_n_implies_limiting() {
        let layer = IntentLayer::new(&schema());
        let requested = layer.evaluate(
            "top 5 campaigns by revenue",
            "SELECT campaign FROM campaigns ORDER BY revenue DESC LIMIT 5",
        );
        assert!(requested >= 0.8, "got {requested}");
    }

    #[test]
    fn test_score_clamped() {
        let layer = IntentLayer::new(&schema());
        let score = layer.evaluate(
            "total revenue per category sorted top 3",
            "SELECT 1",
        );
        assert!((0.0..=1.0).contains(&score));
    }
}
