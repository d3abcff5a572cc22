//! Error classification
//!
//! Ordered keyword rules map an error string onto a fixed taxonomy with a
//! severity and a suggested fix. First matching rule wins; anything
//! unmatched lands in UNKNOWN. Rows upsert by (query_id, category,
//! subcategory) and duplicates bump the frequency counter.

use serde::Serialize;
use tracing::info;

use crate::database::{MonitoringRepository, NewErrorFields};

/// One classification outcome
#[derive(Debug, Clone, Serialize)]
pub struct ErrorClassification {
    pub error_category: String,
    pub error_subcategory: String,
    pub severity: String,
    pub suggested_fix: String,
}

struct Rule {
    keywords: &'static [&'static str],
    category: &'static str,
    subcategory: &'static str,
    severity: &'static str,
    suggested_fix: &'static str,
}

/// Ordered rule table. Narrower rules sit above broader ones so that, for
/// example, an undefined-column message never falls through to the generic
/// SQL bucket.
const RULES: &[Rule] = &[
    Rule {
        keywords: &["syntax error", "parse error", "unexpected token"],
        category: "SQL_GENERATION",
        subcategory: "syntax_error",
        severity: "high",
        suggested_fix: "Review the agent's SQL generation prompt and add failing examples",
    },
    Rule {
        keywords: &["column", "does not exist"],
        category: "CONTEXT_RETRIEVAL",
        subcategory: "missing_column",
        severity: "medium",
        suggested_fix: "Refresh the agent's schema context; the referenced column is not in the database",
    },
    Rule {
        keywords: &["unknown column", "no such column"],
        category: "CONTEXT_RETRIEVAL",
        subcategory: "missing_column",
        severity: "medium",
        suggested_fix: "Refresh the agent's schema context; the referenced column is not in the database",
    },
    Rule {
        keywords: &["relation", "does not exist"],
        category: "CONTEXT_RETRIEVAL",
        subcategory: "missing_table",
        severity: "high",
        suggested_fix: "Refresh the agent's schema context; the referenced table is not in the database",
    },
    Rule {
        keywords: &["no such table", "doesn't exist"],
        category: "CONTEXT_RETRIEVAL",
        subcategory: "missing_table",
        severity: "high",
        suggested_fix: "Refresh the agent's schema context; the referenced table is not in the database",
    },
    Rule {
        keywords: &["timeout", "timed out"],
        category: "INTEGRATION",
        subcategory: "timeout",
        severity: "high",
        suggested_fix: "Check database load and add statement timeouts or narrower filters",
    },
    Rule {
        keywords: &["connection", "refused"],
        category: "INTEGRATION",
        subcategory: "connection_failure",
        severity: "critical",
        suggested_fix: "Verify the agent database is reachable and credentials are valid",
    },
    Rule {
        keywords: &["connection", "closed"],
        category: "INTEGRATION",
        subcategory: "connection_failure",
        severity: "critical",
        suggested_fix: "Verify the agent database is reachable and credentials are valid",
    },
    Rule {
        keywords: &["permission denied", "access denied"],
        category: "INTEGRATION",
        subcategory: "permission_denied",
        severity: "high",
        suggested_fix: "Grant the monitoring role read access to the referenced objects",
    },
    Rule {
        keywords: &["authentication", "failed"],
        category: "INTEGRATION",
        subcategory: "auth_failure",
        severity: "critical",
        suggested_fix: "Rotate or correct the agent database credentials",
    },
    Rule {
        keywords: &["division by zero"],
        category: "DATA_ERROR",
        subcategory: "division_by_zero",
        severity: "medium",
        suggested_fix: "Guard denominators with NULLIF in generated SQL",
    },
    Rule {
        keywords: &["null value", "not-null"],
        category: "DATA_ERROR",
        subcategory: "unexpected_null",
        severity: "medium",
        suggested_fix: "Handle NULLs explicitly with COALESCE or IS NOT NULL filters",
    },
    Rule {
        keywords: &["out of range", "overflow"],
        category: "DATA_ERROR",
        subcategory: "value_out_of_range",
        severity: "medium",
        suggested_fix: "Cast to a wider numeric type in the generated SQL",
    },
    Rule {
        keywords: &["invalid input syntax", "cannot cast"],
        category: "DATA_ERROR",
        subcategory: "type_mismatch",
        severity: "medium",
        suggested_fix: "Align literal formats with the column types in the schema context",
    },
    Rule {
        keywords: &["could not answer", "unable to answer"],
        category: "AGENT_LOGIC",
        subcategory: "refused",
        severity: "low",
        suggested_fix: "Review the agent's refusal conditions against the question",
    },
    Rule {
        keywords: &["ambiguous"],
        category: "AGENT_LOGIC",
        subcategory: "ambiguous_request",
        severity: "low",
        suggested_fix: "Add clarification handling to the agent for ambiguous questions",
    },
    Rule {
        keywords: &["intent", "not recognized"],
        category: "AGENT_LOGIC",
        subcategory: "intent_mismatch",
        severity: "medium",
        suggested_fix: "Extend the agent's intent coverage for this question shape",
    },
];

/// Classify an error message against the rule table (pure, no storage).
pub fn classify_error(error_message: &str) -> ErrorClassification {
    let lower = error_message.to_lowercase();

    for rule in RULES {
        if rule.keywords.iter().all(|kw| lower.contains(kw)) {
            return ErrorClassification {
                error_category: rule.category.to_string(),
                error_subcategory: rule.subcategory.to_string(),
                severity: rule.severity.to_string(),
                suggested_fix: rule.suggested_fix.to_string(),
            };
        }
    }

    ErrorClassification {
        error_category: "UNKNOWN".to_string(),
        error_subcategory: "unclassified".to_string(),
        severity: "medium".to_string(),
        suggested_fix: "Inspect the raw error message; no classification rule matched".to_string(),
    }
}

/// Classifier with persistence
pub struct ErrorClassifier {
    repo: MonitoringRepository,
}

impl ErrorClassifier {
    pub fn new(repo: MonitoringRepository) -> Self {
        Self { repo }
    }

    /// Classify and upsert; returns the classification.
    pub async fn classify(
        &self,
        error_message: &str,
        query_id: &str,
        evaluation_id: Option<i64>,
    ) -> anyhow::Result<ErrorClassification> {
        let classification = classify_error(error_message);

        self.repo
            .upsert_error(&NewErrorFields {
                query_id: query_id.to_string(),
                evaluation_id,
                error_category: classification.error_category.clone(),
                error_subcategory: classification.error_subcategory.clone(),
                error_message: error_message.to_string(),
                severity: classification.severity.clone(),
                suggested_fix: Some(classification.suggested_fix.clone()),
            })
            .await?;

        info!(
            "Error classified as {} ({}) for {query_id}",
            classification.error_category, classification.severity
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error() {
        let c = classify_error("ERROR: syntax error at or near \"FORM\"");
        assert_eq!(c.error_category, "SQL_GENERATION");
        assert_eq!(c.severity, "high");
    }

    #[test]
    fn test_missing_table_is_context_retrieval() {
        let c = classify_error("ERROR: relation \"nonexistent\" does not exist");
        assert_eq!(c.error_category, "CONTEXT_RETRIEVAL");
        assert_eq!(c.error_subcategory, "missing_table");
        assert_eq!(c.severity, "high");
    }

    #[test]
    fn test_missing_column_before_generic_rules() {
        let c = classify_error("ERROR: column \"stock\" does not exist");
        assert_eq!(c.error_category, "CONTEXT_RETRIEVAL");
        assert_eq!(c.error_subcategory, "missing_column");
    }

    #[test]
    fn test_mysql_variants() {
        assert_eq!(
            classify_error("Table 'shop.products' doesn't exist").error_subcategory,
            "missing_table"
        );
        assert_eq!(
            classify_error("Unknown column 'x' in 'field list'").error_subcategory,
            "missing_column"
        );
    }

    #[test]
    fn test_integration_errors() {
        assert_eq!(
            classify_error("connection refused (os error 111)").error_category,
            "INTEGRATION"
        );
        assert_eq!(
            classify_error("query timed out after 10s").error_subcategory,
            "timeout"
        );
        assert_eq!(
            classify_error("permission denied for table orders").error_subcategory,
            "permission_denied"
        );
    }

    #[test]
    fn test_data_errors() {
        assert_eq!(
            classify_error("ERROR: division by zero").error_category,
            "DATA_ERROR"
        );
        assert_eq!(
            classify_error("numeric value out of range").error_subcategory,
            "value_out_of_range"
        );
    }

    #[test]
    fn test_agent_logic() {
        assert_eq!(
            classify_error("The agent could not answer the question").error_category,
            "AGENT_LOGIC"
        );
    }

    #[test]
    fn test_unknown_fallback() {
        let c = classify_error("something entirely unexpected happened");
        assert_eq!(c.error_category, "UNKNOWN");
        assert_eq!(c.severity, "medium");
    }

    #[test]
    fn test_severity_values_are_valid() {
        let valid = ["low", "medium", "high", "critical"];
        for rule in RULES {
            assert!(valid.contains(&rule.severity));
        }
    }
}
