//! SQL pattern analysis layer
//!
//! Anti-patterns subtract from a 0.75 base, good practices add to it.
//! Produces granular scores that separate query styles without any schema
//! or ground-truth context.

use regex::Regex;
use tracing::debug;

const AGGREGATES: [&str; 5] = ["SUM(", "AVG(", "COUNT(", "MAX(", "MIN("];

/// Pattern layer: base 0.75 plus bonuses minus penalties, clamped to [0, 1].
pub fn evaluate(sql: &str) -> f64 {
    let sql_upper = sql.to_uppercase();

    let base_score: f64 = 0.75;
    let mut bonuses = 0.0;
    let mut penalties = 0.0;
    let mut issues: Vec<&str> = Vec::new();

    let select_star = Regex::new(r"SELECT\s+\*").unwrap().is_match(&sql_upper);
    let has_agg = AGGREGATES.iter().any(|a| sql_upper.contains(a));
    let has_group = sql_upper.contains("GROUP BY");

    // Penalties
    if select_star && has_agg && !has_group {
        penalties += 0.30;
        issues.push("aggregation with SELECT * and no GROUP BY");
    }
    if sql_upper.contains("LIMIT") && !sql_upper.contains("ORDER BY") {
        penalties += 0.15;
        issues.push("LIMIT used without ORDER BY");
    }
    if select_star && !sql_upper.contains("LIMIT") {
        penalties += 0.10;
        issues.push("SELECT * used without LIMIT");
    }
    if let Some(after_from) = sql_upper.split("FROM").nth(1) {
        let clause = after_from
            .split("WHERE")
            .next()
            .unwrap_or("")
            .split("GROUP")
            .next()
            .unwrap_or("");
        if clause.contains(',') && !sql_upper.contains("JOIN") && !sql_upper.contains("WHERE") {
            penalties += 0.20;
            issues.push("multiple tables without JOIN or WHERE condition");
        }
    }

    // Bonuses
    if !select_star && sql_upper.contains("SELECT") {
        bonuses += 0.05;
    }
    if Regex::new(r"\bAS\s+\w+").unwrap().is_match(&sql_upper) {
        bonuses += 0.04;
    }
    if sql_upper.contains("JOIN") {
        bonuses += 0.05;
    }
    if sql_upper.contains("WHERE") {
        bonuses += 0.04;
    }
    if has_group && has_agg {
        bonuses += 0.04;
    }
    if sql_upper.contains("ORDER BY") {
        bonuses += 0.03;
    }
    if sql_upper.contains("LIMIT") {
        bonuses += 0.02;
    }
    if sql_upper.matches("SELECT").count() > 1 {
        bonuses += 0.02;
    }
    if sql_upper.contains("HAVING") {
        bonuses += 0.02;
    }

    let final_score = (base_score + bonuses - penalties).clamp(0.0, 1.0);

    if !issues.is_empty() {
        debug!("Pattern issues: {issues:?}");
    }
    debug!(
        "Pattern score: base={base_score:.2}, bonuses={bonuses:.3}, penalties={penalties:.3}, final={final_score:.3}"
    );

    final_score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_aggregation_scores_high() {
        let sql = "SELECT region, SUM(sales) AS total FROM orders \
                   WHERE region IS NOT NULL GROUP BY region ORDER BY total DESC LIMIT 10";
        let score = evaluate(sql);
        assert!(score > 0.9, "got {score}");
    }

    #[test]
    fn test_select_star_without_limit_penalized() {
        let with = evaluate("SELECT * FROM products LIMIT 10");
        let without = evaluate("SELECT * FROM products");
        assert!(without < with);
    }

    #[test]
    fn test_limit_without_order_by_penalized() {
        let non_deterministic = evaluate("SELECT name FROM products LIMIT 5");
        let deterministic = evaluate("SELECT name FROM products ORDER BY name LIMIT 5");
        assert!(non_deterministic < deterministic);
    }

    #[test]
    fn test_aggregate_select_star_no_group_by() {
        let score = evaluate("SELECT *, COUNT(*) FROM orders");
        // -0.30 (agg + star, no group) and -0.10 (star without limit)
        assert!(score < 0.5, "got {score}");
    }

    #[test]
    fn test_comma_join_cartesian_risk() {
        let risky = evaluate("SELECT a.x, b.y FROM a, b");
        let joined = evaluate("SELECT a.x, b.y FROM a JOIN b ON a.id = b.id");
        assert!(risky < joined);
    }

    #[test]
    fn test_clamped_to_unit_interval() {
        let sql = "SELECT region, SUM(s) AS t, (SELECT MAX(x) FROM u) AS m FROM orders o \
                   JOIN u ON o.id = u.id WHERE s > 0 GROUP BY region \
                   HAVING SUM(s) > 10 ORDER BY t LIMIT 5";
        let score = evaluate(sql);
        assert!((0.0..=1.0).contains(&score));
    }
}
