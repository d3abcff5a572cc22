//! Query-log table detection
//!
//! Scores every discovered table by column-name heuristics across five role
//! buckets. The winner is persisted as the poller's source iff it scores at
//! least 6; otherwise polling stays disabled and the agent relies on the
//! SDK ingest endpoint.

use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::discovery::ColumnInfo;

const QUERY_TEXT_COLS: [&str; 6] = ["query_text", "question", "prompt", "user_query", "nl_query", "query"];
const SQL_COLS: [&str; 5] = ["sql", "generated_sql", "sql_query", "response_sql", "query_sql"];
const TS_COLS: [&str; 5] = ["created_at", "timestamp", "logged_at", "query_time", "executed_at"];
const STATUS_COLS: [&str; 3] = ["status", "query_status", "state"];
const ERROR_COLS: [&str; 3] = ["error", "error_message", "error_msg"];
const ID_COLS: [&str; 4] = ["id", "query_id", "log_id", "row_id"];

/// Minimum score for a table to be accepted as the query log
pub const MIN_SCORE: u32 = 6;

/// Matched column roles for one candidate table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchedColumns {
    pub query_text_column: Option<String>,
    pub sql_column: Option<String>,
    pub timestamp_column: Option<String>,
    pub status_column: Option<String>,
    pub error_column: Option<String>,
    pub id_column: Option<String>,
}

/// Score one table's column set. Weights: query_text 3, sql 3, timestamp 2,
/// status 1, error 1, id 0.
pub fn score_table(columns: &BTreeSet<String>) -> (u32, MatchedColumns) {
    let find = |candidates: &[&str]| -> Option<String> {
        columns
            .iter()
            .find(|c| candidates.contains(&c.as_str()))
            .cloned()
    };

    let mut score = 0;
    let mut matched = MatchedColumns::default();

    if let Some(col) = find(&QUERY_TEXT_COLS) {
        score += 3;
        matched.query_text_column = Some(col);
    }
    if let Some(col) = find(&SQL_COLS) {
        score += 3;
        matched.sql_column = Some(col);
    }
    if let Some(col) = find(&TS_COLS) {
        score += 2;
        matched.timestamp_column = Some(col);
    }
    if let Some(col) = find(&STATUS_COLS) {
        score += 1;
        matched.status_column = Some(col);
    }
    if let Some(col) = find(&ERROR_COLS) {
        score += 1;
        matched.error_column = Some(col);
    }
    matched.id_column = find(&ID_COLS);

    (score, matched)
}

/// Pick the best-scoring table, or `None` when nothing clears [`MIN_SCORE`].
pub fn detect_query_log_table(
    columns: &[ColumnInfo],
) -> Option<(String, String, MatchedColumns)> {
    let mut tables: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
    for col in columns {
        tables
            .entry((col.schema_name.clone(), col.table_name.clone()))
            .or_default()
            .insert(col.column_name.to_lowercase());
    }

    let mut best: Option<(u32, String, String, MatchedColumns)> = None;
    for ((schema, table), cols) in tables {
        let (score, matched) = score_table(&cols);
        let better = best.as_ref().map(|(s, ..)| score > *s).unwrap_or(true);
        if better {
            best = Some((score, schema, table, matched));
        }
    }

    match best {
        Some((score, schema, table, matched)) if score >= MIN_SCORE => {
            info!("Detected query log table: {schema}.{table} (score {score})");
            Some((schema, table, matched))
        }
        Some((score, ..)) => {
            info!("No query log table detected (best score {score}) - SDK ingestion only");
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn column_infos(table: &str, names: &[&str]) -> Vec<ColumnInfo> {
        names
            .iter()
            .map(|name| ColumnInfo {
                schema_name: "public".into(),
                table_name: table.into(),
                column_name: name.to_string(),
                data_type: "text".into(),
                is_nullable: true,
            })
            .collect()
    }

    #[test]
    fn test_full_query_log_table_scores_ten() {
        let (score, matched) = score_table(&cols(&[
            "id",
            "query_text",
            "generated_sql",
            "created_at",
            "status",
            "error_message",
        ]));
        assert_eq!(score, 10);
        assert_eq!(matched.query_text_column.as_deref(), Some("query_text"));
        assert_eq!(matched.sql_column.as_deref(), Some("generated_sql"));
        assert_eq!(matched.timestamp_column.as_deref(), Some("created_at"));
        assert_eq!(matched.id_column.as_deref(), Some("id"));
    }

    #[test]
    fn test_id_column_carries_no_weight() {
        let (with_id, _) = score_table(&cols(&["query", "sql", "id"]));
        let (without_id, _) = score_table(&cols(&["query", "sql"]));
        assert_eq!(with_id, without_id);
    }

    #[test]
    fn test_threshold_requires_text_and_sql() {
        // timestamp + status + error alone: 2 + 1 + 1 = 4 < 6
        let (score, _) = score_table(&cols(&["created_at", "status", "error"]));
        assert!(score < MIN_SCORE);

        // query text + sql alone: 3 + 3 = 6, exactly at the bar
        let (score, _) = score_table(&cols(&["question", "sql_query"]));
        assert_eq!(score, MIN_SCORE);
    }

    #[test]
    fn test_detect_picks_best_table() {
        let mut columns = column_infos("products", &["id", "name", "price"]);
        columns.extend(column_infos(
            "agent_queries",
            &["id", "query_text", "sql", "created_at", "status"],
        ));

        let (schema, table, matched) = detect_query_log_table(&columns).unwrap();
        assert_eq!(schema, "public");
        assert_eq!(table, "agent_queries");
        assert_eq!(matched.status_column.as_deref(), Some("status"));
    }

    #[test]
    fn test_detect_none_when_below_threshold() {
        let columns = column_infos("products", &["id", "name", "price", "created_at"]);
        assert!(detect_query_log_table(&columns).is_none());
    }

    #[test]
    fn test_case_insensitive_matching() {
        let columns = column_infos("logs", &["Query_Text", "SQL", "Created_At"]);
        // detect lowercases column names before scoring
        assert!(detect_query_log_table(&columns).is_some());
    }
}
