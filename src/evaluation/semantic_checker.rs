//! Schema-aware SQL-to-SQL similarity
//!
//! Decomposes both statements into components, normalizes away aliases and
//! schema prefixes, and scores the overlap per component with fixed weights.
//! 'c.region' and 'region', or 'AVG(o.profit) AS avg_profit' and
//! 'AVG(profit)', are recognized as equivalent.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Extracted components of one SQL statement
#[derive(Debug, Clone, Default)]
pub struct SqlComponents {
    pub select: Vec<String>,
    pub from: Vec<String>,
    pub where_clause: Vec<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<String>,
    pub joins: Vec<String>,
}

/// Result of a semantic equivalence check
#[derive(Debug, Clone, Serialize)]
pub struct SemanticReport {
    pub similarity_score: f64,
    pub is_equivalent: bool,
    pub components_match: bool,
    pub generated_normalized: String,
    pub ground_truth_normalized: String,
}

/// Component weights: SELECT carries the most signal
const WEIGHTS: [(Component, f64); 6] = [
    (Component::Select, 0.4),
    (Component::From, 0.15),
    (Component::Where, 0.2),
    (Component::GroupBy, 0.1),
    (Component::OrderBy, 0.1),
    (Component::Joins, 0.05),
];

#[derive(Debug, Clone, Copy)]
enum Component {
    Select,
    From,
    Where,
    GroupBy,
    OrderBy,
    Joins,
}

/// Schema-aware SQL comparison
pub struct SemanticChecker {
    all_columns: HashSet<String>,
    all_tables: HashSet<String>,
}

impl SemanticChecker {
    /// Build from a `{table -> {column -> type}}` schema map; an empty map
    /// still works, just with less precise alias resolution.
    pub fn new(
        schema_info: &std::collections::HashMap<String, std::collections::HashMap<String, String>>,
    ) -> Self {
        let mut all_columns = HashSet::new();
        let mut all_tables = HashSet::new();
        for (table, columns) in schema_info {
            all_tables.insert(table.to_lowercase());
            for column in columns.keys() {
                all_columns.insert(column.to_lowercase());
            }
        }
        debug!(
            "SemanticChecker schema-aware: {} tables, {} columns",
            all_tables.len(),
            all_columns.len()
        );
        Self {
            all_columns,
            all_tables,
        }
    }

    /// Normalize whitespace, case and trailing semicolons.
    pub fn normalize_sql(&self, sql: &str) -> String {
        let collapsed = Regex::new(r"\s+").unwrap().replace_all(sql, " ");
        collapsed
            .to_lowercase()
            .trim()
            .trim_end_matches(';')
            .trim()
            .to_string()
    }

    /// Pull SELECT / FROM / WHERE / GROUP BY / ORDER BY / LIMIT / JOIN parts.
    pub fn extract_components(&self, sql: &str) -> SqlComponents {
        let normalized = self.normalize_sql(sql);
        let mut components = SqlComponents::default();

        let select_re = Regex::new(r"select\s+(.*?)\s+from").unwrap();
        if let Some(caps) = select_re.captures(&normalized) {
            components.select = caps[1].split(',').map(|s| s.trim().to_string()).collect();
        }

        let from_re = Regex::new(r"from\s+([\w\.]+)").unwrap();
        if let Some(caps) = from_re.captures(&normalized) {
            components.from = vec![caps[1].to_string()];
        }

        let where_re =
            Regex::new(r"where\s+(.*?)(?:\s+group\s+by|\s+order\s+by|\s+limit|$)").unwrap();
        if let Some(caps) = where_re.captures(&normalized) {
            components.where_clause = vec![caps[1].trim().to_string()];
        }

        let group_re =
            Regex::new(r"group\s+by\s+(.*?)(?:\s+having|\s+order\s+by|\s+limit|$)").unwrap();
        if let Some(caps) = group_re.captures(&normalized) {
            components.group_by = caps[1].split(',').map(|s| s.trim().to_string()).collect();
        }

        let order_re = Regex::new(r"order\s+by\s+(.*?)(?:\s+limit|$)").unwrap();
        if let Some(caps) = order_re.captures(&normalized) {
            components.order_by = caps[1].split(',').map(|s| s.trim().to_string()).collect();
        }

        let limit_re = Regex::new(r"limit\s+(\d+)").unwrap();
        if let Some(caps) = limit_re.captures(&normalized) {
            components.limit = Some(caps[1].to_string());
        }

        let join_re = Regex::new(r"(?:inner|left|right|full)?\s*join\s+([\w\.]+)").unwrap();
        components.joins = join_re
            .captures_iter(&normalized)
            .map(|caps| caps[1].to_string())
            .collect();

        components
    }

    /// Strip column aliases, table-alias suffixes, schema prefixes and
    /// alias prefixes inside function calls.
    fn normalize_ref(&self, item: &str) -> String {
        let mut item = item.trim().to_lowercase();

        // 'avg(profit) as avg_profit' -> 'avg(profit)'
        item = Regex::new(r"\s+as\s+\w+")
            .unwrap()
            .replace_all(&item, "")
            .to_string();

        // 'orders o' -> 'orders'
        item = Regex::new(r"^([\w\.]+)\s+\w+$")
            .unwrap()
            .replace(&item, "$1")
            .to_string();

        // 'sales.orders' -> 'orders'
        item = Regex::new(r"^\w+\.(\w+)$")
            .unwrap()
            .replace(&item, "$1")
            .to_string();

        // 'avg(o.profit)' -> 'avg(profit)'
        let func_re = Regex::new(r"(\w+)\(([^)]+)\)").unwrap();
        item = func_re
            .replace_all(&item, |caps: &regex::Captures| {
                let inner = Regex::new(r"\w+\.(\w+)")
                    .unwrap()
                    .replace_all(&caps[2], "$1")
                    .to_string();
                format!("{}({})", &caps[1], inner)
            })
            .to_string();

        // 'o.profit' -> 'profit' when profit is a known column (or schema
        // context is absent entirely)
        if item.contains('.') && !item.contains('(') {
            let parts: Vec<&str> = item.split('.').collect();
            if parts.len() == 2 {
                let candidate = parts[1].trim();
                if self.all_columns.contains(candidate) || self.all_columns.is_empty() {
                    item = candidate.to_string();
                }
            }
        }

        item.trim().to_string()
    }

    fn normalize_list(&self, items: &[String]) -> Vec<String> {
        items.iter().map(|i| self.normalize_ref(i)).collect()
    }

    /// Overlap coefficient: |A ∩ B| / min(|A|, |B|).
    fn list_similarity(a: &[String], b: &[String]) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let set_a: HashSet<String> = a.iter().map(|s| s.trim().to_lowercase()).collect();
        let set_b: HashSet<String> = b.iter().map(|s| s.trim().to_lowercase()).collect();
        let intersection = set_a.intersection(&set_b).count();
        let min_len = set_a.len().min(set_b.len());
        if min_len == 0 {
            0.0
        } else {
            intersection as f64 / min_len as f64
        }
    }

    /// Weighted component similarity of two SQL statements.
    pub fn calculate_similarity(&self, sql1: &str, sql2: &str) -> f64 {
        let norm1 = self.normalize_sql(sql1);
        let norm2 = self.normalize_sql(sql2);
        if norm1 == norm2 {
            return 1.0;
        }

        let c1 = self.extract_components(sql1);
        let c2 = self.extract_components(sql2);

        let mut total = 0.0;
        for (component, weight) in WEIGHTS {
            let score = match component {
                Component::Select => Self::list_similarity(
                    &self.normalize_list(&c1.select),
                    &self.normalize_list(&c2.select),
                ),
                Component::From => Self::list_similarity(
                    &self.normalize_list(&c1.from),
                    &self.normalize_list(&c2.from),
                ),
                // WHERE stays raw: alias stripping can break condition logic
                Component::Where => Self::list_similarity(&c1.where_clause, &c2.where_clause),
                Component::GroupBy => Self::list_similarity(
                    &self.normalize_list(&c1.group_by),
                    &self.normalize_list(&c2.group_by),
                ),
                Component::OrderBy => Self::list_similarity(
                    &self.normalize_list(&c1.order_by),
                    &self.normalize_list(&c2.order_by),
                ),
                Component::Joins => Self::list_similarity(
                    &self.normalize_list(&c1.joins),
                    &self.normalize_list(&c2.joins),
                ),
            };
            total += score * weight;
        }

        total
    }

    /// Full equivalence check with the report shape the evaluator persists.
    pub fn check_equivalence(&self, generated_sql: &str, ground_truth_sql: &str) -> SemanticReport {
        let similarity_score = self.calculate_similarity(generated_sql, ground_truth_sql);
        SemanticReport {
            similarity_score,
            is_equivalent: similarity_score >= 0.6,
            components_match: similarity_score >= 0.7,
            generated_normalized: self.normalize_sql(generated_sql),
            ground_truth_normalized: self.normalize_sql(ground_truth_sql),
        }
    }
}

impl Default for SemanticChecker {
    fn default() -> Self {
        Self::new(&std::collections::HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn checker_with_schema() -> SemanticChecker {
        let mut schema = HashMap::new();
        let mut orders: HashMap<String, String> = HashMap::new();
        orders.insert("region".into(), "text".into());
        orders.insert("profit".into(), "numeric".into());
        orders.insert("sales".into(), "numeric".into());
        schema.insert("orders".to_string(), orders);
        SemanticChecker::new(&schema)
    }

    #[test]
    fn test_identical_sql_scores_one() {
        let checker = SemanticChecker::default();
        let sql = "SELECT region, SUM(sales) FROM orders GROUP BY region";
        assert_eq!(checker.calculate_similarity(sql, sql), 1.0);
    }

    #[test]
    fn test_whitespace_and_case_normalized() {
        let checker = SemanticChecker::default();
        let a = "SELECT  region FROM orders;";
        let b = "select region\nfrom orders";
        assert_eq!(checker.calculate_similarity(a, b), 1.0);
    }

    #[test]
    fn test_alias_stripping() {
        let checker = checker_with_schema();
        let a = "SELECT o.region, AVG(o.profit) AS avg_profit FROM orders o GROUP BY o.region";
        let b = "SELECT region, AVG(profit) FROM orders GROUP BY region";
        let score = checker.calculate_similarity(a, b);
        assert!(score > 0.9, "expected near-equivalence, got {score}");
    }

    #[test]
    fn test_schema_prefix_stripping() {
        let checker = checker_with_schema();
        let a = "SELECT region FROM sales.orders";
        let b = "SELECT region FROM orders";
        let score = checker.calculate_similarity(a, b);
        assert!(score > 0.9, "expected near-equivalence, got {score}");
    }

    #[test]
    fn test_different_tables_score_low() {
        let checker = SemanticChecker::default();
        let a = "SELECT name FROM products";
        let b = "SELECT total FROM invoices WHERE total > 10";
        let score = checker.calculate_similarity(a, b);
        assert!(score < 0.5, "expected low similarity, got {score}");
    }

    #[test]
    fn test_component_extraction() {
        let checker = SemanticChecker::default();
        let sql = "SELECT a, b FROM t JOIN u ON t.id = u.id WHERE a > 1 \
                   GROUP BY a ORDER BY b DESC LIMIT 10";
        let c = checker.extract_components(sql);
        assert_eq!(c.select, vec!["a", "b"]);
        assert_eq!(c.from, vec!["t"]);
        assert_eq!(c.joins, vec!["u"]);
        assert_eq!(c.group_by, vec!["a"]);
        assert_eq!(c.order_by, vec!["b desc"]);
        assert_eq!(c.limit.as_deref(), Some("10"));
        assert!(!c.where_clause.is_empty());
    }

    #[test]
    fn test_equivalence_report_thresholds() {
        let checker = SemanticChecker::default();
        let report = checker.check_equivalence(
            "SELECT region FROM orders",
            "SELECT region FROM orders",
        );
        assert!(report.is_equivalent);
        assert!(report.components_match);
        assert_eq!(report.similarity_score, 1.0);
    }

    #[test]
    fn test_overlap_coefficient_empty_lists() {
        assert_eq!(SemanticChecker::list_similarity(&[], &[]), 1.0);
        assert_eq!(
            SemanticChecker::list_similarity(&["a".to_string()], &[]),
            0.0
        );
    }
}
