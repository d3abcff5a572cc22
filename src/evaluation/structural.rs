//! Structural SQL validation
//!
//! Two stages: a real `EXPLAIN` against the agent database (syntax plus
//! resolution as the database itself sees it), then regex checks of table
//! and column references against the cached discovery snapshot. Scores are
//! coarse on purpose: 0.0 invalid, 0.5 syntax-ok-schema-mismatch, 1.0 clean.

use regex::Regex;
use serde::Serialize;
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::agentdb::{sqlite_path, AgentDbKind};

/// Error classes reported by the EXPLAIN stage. Only the first three feed
/// the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlErrorType {
    SyntaxError,
    UndefinedTable,
    UndefinedColumn,
    Other,
}

impl SqlErrorType {
    pub fn is_classifiable(&self) -> bool {
        !matches!(self, SqlErrorType::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlErrorType::SyntaxError => "SYNTAX_ERROR",
            SqlErrorType::UndefinedTable => "UNDEFINED_TABLE",
            SqlErrorType::UndefinedColumn => "UNDEFINED_COLUMN",
            SqlErrorType::Other => "OTHER",
        }
    }
}

/// Full validation report
#[derive(Debug, Clone, Serialize)]
pub struct StructuralReport {
    pub valid: bool,
    pub syntax_valid: bool,
    pub schema_valid: bool,
    pub errors: Vec<String>,
    pub score: f64,
    pub error_type: Option<SqlErrorType>,
    pub requires_classification: bool,
}

impl StructuralReport {
    fn clean() -> Self {
        Self {
            valid: true,
            syntax_valid: true,
            schema_valid: true,
            errors: Vec::new(),
            score: 1.0,
            error_type: None,
            requires_classification: false,
        }
    }
}

/// Per-agent structural validator with a cached schema snapshot
pub struct StructuralValidator {
    schema_info: HashMap<String, HashMap<String, String>>,
    db_url: Option<String>,
}

const ALIAS_STOPWORDS: [&str; 14] = [
    "where", "join", "inner", "left", "right", "full", "cross", "on", "group", "order", "limit",
    "having", "union", "select",
];

impl StructuralValidator {
    /// `schema_info` is `{table -> {column -> type}}` with both qualified
    /// and unambiguous unqualified table keys.
    pub fn new(
        schema_info: HashMap<String, HashMap<String, String>>,
        db_url: Option<String>,
    ) -> Self {
        Self { schema_info, db_url }
    }

    pub fn schema_info(&self) -> &HashMap<String, HashMap<String, String>> {
        &self.schema_info
    }

    /// Run both validation stages.
    pub async fn validate(&self, sql: &str) -> StructuralReport {
        // Stage 1: EXPLAIN against the real database
        if let Some(db_url) = &self.db_url {
            if let Err(message) = explain(sql, db_url).await {
                let error_type = classify_explain_error(&message);
                warn!("SQL validation failed ({:?}): {message}", error_type);
                return StructuralReport {
                    valid: false,
                    syntax_valid: false,
                    schema_valid: false,
                    errors: vec![message],
                    score: 0.0,
                    error_type: Some(error_type),
                    requires_classification: error_type.is_classifiable(),
                };
            }
        }

        // Stage 2: reference checks against the cached snapshot
        let errors = self.validate_references(sql);
        if errors.is_empty() {
            StructuralReport::clean()
        } else {
            debug!("Schema reference errors: {errors:?}");
            StructuralReport {
                valid: false,
                syntax_valid: true,
                schema_valid: false,
                errors,
                score: 0.5,
                error_type: None,
                requires_classification: false,
            }
        }
    }

    /// Check FROM/JOIN table refs and alias.column refs against the cache.
    pub fn validate_references(&self, sql: &str) -> Vec<String> {
        if self.schema_info.is_empty() {
            return Vec::new();
        }

        let mut errors = Vec::new();
        let lower = sql.to_lowercase();

        // table refs + optional aliases: "FROM sales.orders o", "JOIN users"
        let table_re =
            Regex::new(r"\b(?:from|join)\s+([a-zA-Z_][\w.]*)(?:\s+(?:as\s+)?([a-zA-Z_]\w*))?")
                .unwrap();

        let mut alias_to_table: HashMap<String, String> = HashMap::new();
        let mut referenced_tables: Vec<String> = Vec::new();

        for caps in table_re.captures_iter(&lower) {
            let table_ref = caps[1].to_string();
            match self.resolve_table(&table_ref) {
                Some(resolved) => {
                    if let Some(alias) = caps.get(2) {
                        let alias = alias.as_str();
                        if !ALIAS_STOPWORDS.contains(&alias) {
                            alias_to_table.insert(alias.to_string(), resolved.clone());
                        }
                    }
                    // The bare table name also works as its own qualifier
                    if let Some(short) = table_ref.rsplit('.').next() {
                        alias_to_table.insert(short.to_string(), resolved.clone());
                    }
                    referenced_tables.push(resolved);
                }
                None => errors.push(format!("Table '{table_ref}' does not exist")),
            }
        }

        if referenced_tables.is_empty() {
            return errors;
        }

        // qualified column refs: "o.profit", "orders.region"
        let col_re = Regex::new(r"\b([a-zA-Z_]\w*)\.([a-zA-Z_]\w*)\b").unwrap();
        for caps in col_re.captures_iter(&lower) {
            let qualifier = &caps[1];
            let column = &caps[2];
            let Some(table) = alias_to_table.get(qualifier) else {
                continue; // schema-qualified table ref, not a column ref
            };
            if let Some(columns) = self.schema_info.get(table) {
                let known = columns.keys().any(|c| c.eq_ignore_ascii_case(column));
                if !known {
                    errors.push(format!("Column '{column}' does not exist in table '{table}'"));
                }
            }
        }

        errors
    }

    /// Resolve a (possibly schema-qualified) table reference against the
    /// cache. Unqualified names only resolve when unambiguous.
    fn resolve_table(&self, table_ref: &str) -> Option<String> {
        if self.schema_info.contains_key(table_ref) {
            return Some(table_ref.to_string());
        }
        let short = table_ref.rsplit('.').next()?;
        if self.schema_info.contains_key(short) {
            return Some(short.to_string());
        }
        // case-insensitive fallback
        self.schema_info
            .keys()
            .find(|k| k.eq_ignore_ascii_case(table_ref) || k.eq_ignore_ascii_case(short))
            .cloned()
    }
}

/// Run `EXPLAIN <sql>` on the agent database; `Err` carries the database's
/// error message.
async fn explain(sql: &str, db_url: &str) -> Result<(), String> {
    let kind = AgentDbKind::from_url(db_url).map_err(|e| e.to_string())?;
    let explain_sql = format!("EXPLAIN {sql}");

    let run = async {
        match kind {
            AgentDbKind::Postgres => {
                let mut conn = PgConnection::connect(db_url)
                    .await
                    .map_err(|e| e.to_string())?;
                sqlx::query(&explain_sql)
                    .fetch_all(&mut conn)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            AgentDbKind::MySql => {
                let mut conn = MySqlConnection::connect(db_url)
                    .await
                    .map_err(|e| e.to_string())?;
                sqlx::query(&explain_sql)
                    .fetch_all(&mut conn)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            AgentDbKind::Sqlite => {
                let path = sqlite_path(db_url);
                let mut conn = SqliteConnection::connect(&format!("sqlite://{path}?mode=ro"))
                    .await
                    .map_err(|e| e.to_string())?;
                sqlx::query(&explain_sql)
                    .fetch_all(&mut conn)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            AgentDbKind::MongoDb => Err("EXPLAIN is not supported for document stores".to_string()),
        }
    };

    tokio::time::timeout(std::time::Duration::from_secs(5), run)
        .await
        .map_err(|_| "EXPLAIN timed out".to_string())?
}

/// Map a database error message onto the taxonomy.
pub fn classify_explain_error(message: &str) -> SqlErrorType {
    let lower = message.to_lowercase();

    if lower.contains("syntax") {
        return SqlErrorType::SyntaxError;
    }
    if lower.contains("column")
        && (lower.contains("does not exist")
            || lower.contains("no such column")
            || lower.contains("unknown column"))
    {
        return SqlErrorType::UndefinedColumn;
    }
    if (lower.contains("relation") || lower.contains("table"))
        && (lower.contains("does not exist")
            || lower.contains("no such table")
            || lower.contains("doesn't exist"))
    {
        return SqlErrorType::UndefinedTable;
    }
    SqlErrorType::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> HashMap<String, HashMap<String, String>> {
        let mut orders: HashMap<String, String> = HashMap::new();
        orders.insert("region".into(), "text".into());
        orders.insert("profit".into(), "numeric".into());
        let mut customers: HashMap<String, String> = HashMap::new();
        customers.insert("id".into(), "integer".into());
        customers.insert("name".into(), "text".into());

        let mut info = HashMap::new();
        info.insert("orders".to_string(), orders.clone());
        info.insert("sales.orders".to_string(), orders);
        info.insert("customers".to_string(), customers.clone());
        info.insert("sales.customers".to_string(), customers);
        info
    }

    fn validator() -> StructuralValidator {
        StructuralValidator::new(schema(), None)
    }

    #[test]
    fn test_valid_references_pass() {
        let errors = validator().validate_references("SELECT region FROM orders");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_qualified_table_resolves() {
        let errors = validator().validate_references("SELECT region FROM sales.orders");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_unknown_table_reported() {
        let errors = validator().validate_references("SELECT x FROM nonexistent");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("nonexistent"));
    }

    #[test]
    fn test_alias_column_check() {
        let ok = validator().validate_references("SELECT o.region FROM orders o");
        assert!(ok.is_empty());

        let bad = validator().validate_references("SELECT o.missing FROM orders o");
        assert_eq!(bad.len(), 1);
        assert!(bad[0].contains("missing"));
    }

    #[test]
    fn test_join_tables_checked() {
        let errors = validator().validate_references(
            "SELECT o.region, c.name FROM orders o JOIN customers c ON c.id = o.region",
        );
        assert!(errors.is_empty());

        let errors = validator()
            .validate_references("SELECT o.region FROM orders o JOIN ghosts g ON g.id = 1");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_empty_schema_skips_checks() {
        let validator = StructuralValidator::new(HashMap::new(), None);
        assert!(validator
            .validate_references("SELECT x FROM anything")
            .is_empty());
    }

    #[test]
    fn test_classify_postgres_errors() {
        assert_eq!(
            classify_explain_error("ERROR: syntax error at or near \"FORM\""),
            SqlErrorType::SyntaxError
        );
        assert_eq!(
            classify_explain_error("ERROR: relation \"nonexistent\" does not exist"),
            SqlErrorType::UndefinedTable
        );
        assert_eq!(
            classify_explain_error("ERROR: column \"stock\" does not exist"),
            SqlErrorType::UndefinedColumn
        );
        assert_eq!(
            classify_explain_error("ERROR: permission denied for table orders"),
            SqlErrorType::Other
        );
    }

    #[test]
    fn test_classify_other_backends() {
        assert_eq!(
            classify_explain_error("no such table: products"),
            SqlErrorType::UndefinedTable
        );
        assert_eq!(
            classify_explain_error("Unknown column 'x' in 'field list'"),
            SqlErrorType::UndefinedColumn
        );
    }

    #[test]
    fn test_permission_error_not_classifiable() {
        let error_type = classify_explain_error("permission denied for relation orders");
        assert!(!error_type.is_classifiable());
    }

    #[tokio::test]
    async fn test_validate_without_db_url_uses_cache_only() {
        let report = validator().validate("SELECT x FROM nonexistent").await;
        assert!(!report.valid);
        assert!(report.syntax_valid);
        assert_eq!(report.score, 0.5);
        assert!(!report.requires_classification);
    }

    #[tokio::test]
    async fn test_validate_clean_sql() {
        let report = validator().validate("SELECT region FROM orders").await;
        assert!(report.valid);
        assert_eq!(report.score, 1.0);
    }
}
