//! LLM-based output validation for queries without ground truth
//!
//! Executes the candidate SQL and asks the LLM whether the output answers
//! the question: correctness 0.5, completeness 0.3, quality 0.2. Attached
//! to heuristic evaluations as extra evidence; never changes the weighted
//! score.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::agentdb::{QueryExecutor, SqlValue};
use crate::llm::LlmClient;

/// Parsed output-judge scores
#[derive(Debug, Clone, Serialize)]
pub struct OutputScores {
    pub correctness: f64,
    pub completeness: f64,
    pub quality: f64,
    pub overall: f64,
    pub reasoning: String,
    pub execution_success: bool,
    pub generated_execution_time_ms: f64,
    pub error: Option<String>,
}

impl OutputScores {
    fn conservative(reasoning: String, error: Option<String>) -> Self {
        Self {
            correctness: 0.5,
            completeness: 0.5,
            quality: 0.5,
            overall: 0.5,
            reasoning,
            execution_success: false,
            generated_execution_time_ms: 0.0,
            error,
        }
    }
}

/// Output judge: execute, render, ask
pub struct LlmOutputJudge {
    llm: Arc<dyn LlmClient>,
    executor: QueryExecutor,
}

impl LlmOutputJudge {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            executor: QueryExecutor::new(Duration::from_secs(10), 10_000),
        }
    }

    pub async fn validate(
        &self,
        query_text: &str,
        generated_sql: &str,
        db_url: &str,
    ) -> OutputScores {
        let execution = self.executor.execute(generated_sql, db_url).await;
        if !execution.success {
            let error = execution.error.clone();
            return OutputScores {
                execution_success: false,
                ..OutputScores::conservative(
                    format!(
                        "SQL failed to execute: {}",
                        error.clone().unwrap_or_default()
                    ),
                    error,
                )
            };
        }

        let prompt = build_prompt(
            query_text,
            generated_sql,
            &execution.columns,
            &execution.rows,
            execution.row_count,
            execution.execution_time_ms,
        );

        match self.llm.chat(SYSTEM_PROMPT, &prompt).await {
            Ok(response) => {
                let mut scores = parse_scores(&response);
                scores.execution_success = true;
                scores.generated_execution_time_ms = execution.execution_time_ms;
                info!(
                    "LLM output validation: correctness={:.2}, completeness={:.2}, overall={:.2}",
                    scores.correctness, scores.completeness, scores.overall
                );
                scores
            }
            Err(e) => {
                error!("LLM output validation failed: {e}");
                OutputScores {
                    execution_success: true,
                    generated_execution_time_ms: execution.execution_time_ms,
                    ..OutputScores::conservative(format!("Evaluation failed: {e}"), None)
                }
            }
        }
    }
}

const SYSTEM_PROMPT: &str =
    "You are an expert SQL query evaluator. Analyze whether the query output correctly answers the user's question. Respond in the exact line format requested.";

fn build_prompt(
    query_text: &str,
    sql: &str,
    columns: &[String],
    rows: &[Vec<SqlValue>],
    row_count: usize,
    execution_time_ms: f64,
) -> String {
    format!(
        r#"**User Question:**
{query_text}

**Generated SQL:**
```sql
{sql}
```

**Query Output (Sample):**
{table}

**Execution Details:**
- Total rows returned: {row_count}
- Columns: {columns}
- Execution time: {execution_time_ms:.1}ms

**Important:** A NULL or empty result is CORRECT and VALID if the SQL is logically correct but the requested data simply does not exist. Judge the SQL logic, not whether the data exists.

Score the output on:
1. CORRECTNESS (50%): Does the SQL correctly answer the user's question?
2. COMPLETENESS (30%): Did it return the expected structure and all requested fields?
3. QUALITY (20%): Are values within reasonable ranges, with proper types and naming?

**Response Format (REQUIRED):**
CORRECTNESS_SCORE: <number between 0.0 and 1.0>
COMPLETENESS_SCORE: <number between 0.0 and 1.0>
QUALITY_SCORE: <number between 0.0 and 1.0>
OVERALL_SCORE: <weighted average: 0.5*correctness + 0.3*completeness + 0.2*quality>
REASONING: <2-3 sentences explaining your evaluation>"#,
        table = format_output_table(columns, rows, 5),
        columns = columns.join(", "),
    )
}

/// Render the first rows as a markdown table for the prompt.
fn format_output_table(columns: &[String], rows: &[Vec<SqlValue>], max_rows: usize) -> String {
    if rows.is_empty() {
        return "No rows returned".to_string();
    }

    let mut table = format!("| {} |\n", columns.join(" | "));
    table.push_str(&format!(
        "|{}|\n",
        columns.iter().map(|_| "---").collect::<Vec<_>>().join("|")
    ));

    for row in rows.iter().take(max_rows) {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                SqlValue::Null => "NULL".to_string(),
                other => serde_json::to_string(other)
                    .unwrap_or_default()
                    .trim_matches('"')
                    .to_string(),
            })
            .collect();
        table.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    if rows.len() > max_rows {
        table.push_str(&format!("\n... and {} more rows", rows.len() - max_rows));
    }
    table
}

fn parse_scores(response: &str) -> OutputScores {
    let mut correctness = None;
    let mut completeness = None;
    let mut quality = None;
    let mut overall = None;
    let mut reasoning = String::new();

    for line in response.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_uppercase();
        let value = value.trim();

        if key.contains("CORRECTNESS_SCORE") {
            correctness = value.parse().ok();
        } else if key.contains("COMPLETENESS_SCORE") {
            completeness = value.parse().ok();
        } else if key.contains("QUALITY_SCORE") {
            quality = value.parse().ok();
        } else if key.contains("OVERALL_SCORE") {
            overall = value.parse().ok();
        } else if key.contains("REASONING") {
            reasoning = value.to_string();
        }
    }

    let (Some(correctness), Some(completeness), Some(quality)) =
        (correctness, completeness, quality)
    else {
        return OutputScores::conservative(
            format!("Failed to parse LLM response: {}", response.trim()),
            None,
        );
    };

    let correctness = f64::clamp(correctness, 0.0, 1.0);
    let completeness = f64::clamp(completeness, 0.0, 1.0);
    let quality = f64::clamp(quality, 0.0, 1.0);
    let overall = overall
        .map(|v: f64| v.clamp(0.0, 1.0))
        .unwrap_or(0.5 * correctness + 0.3 * completeness + 0.2 * quality);

    OutputScores {
        correctness,
        completeness,
        quality,
        overall,
        reasoning: if reasoning.is_empty() {
            "No reasoning provided".to_string()
        } else {
            reasoning
        },
        execution_success: false,
        generated_execution_time_ms: 0.0,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_response() {
        let response = "CORRECTNESS_SCORE: 0.9\nCOMPLETENESS_SCORE: 1.0\nQUALITY_SCORE: 0.85\nOVERALL_SCORE: 0.92\nREASONING: Looks right.";
        let scores = parse_scores(response);
        assert!((scores.correctness - 0.9).abs() < 1e-9);
        assert!((scores.overall - 0.92).abs() < 1e-9);
        assert_eq!(scores.reasoning, "Looks right.");
    }

    #[test]
    fn test_overall_computed_when_missing() {
        let response = "CORRECTNESS_SCORE: 1.0\nCOMPLETENESS_SCORE: 1.0\nQUALITY_SCORE: 0.5";
        let scores = parse_scores(response);
        assert!((scores.overall - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_missing_scores_conservative() {
        let scores = parse_scores("The output looks fine to me.");
        assert_eq!(scores.correctness, 0.5);
        assert_eq!(scores.overall, 0.5);
    }

    #[test]
    fn test_scores_clamped() {
        let response = "CORRECTNESS_SCORE: 1.4\nCOMPLETENESS_SCORE: -0.2\nQUALITY_SCORE: 0.5";
        let scores = parse_scores(response);
        assert_eq!(scores.correctness, 1.0);
        assert_eq!(scores.completeness, 0.0);
    }

    #[test]
    fn test_table_formatting() {
        let columns = vec!["name".to_string(), "count".to_string()];
        let rows = vec![
            vec![SqlValue::Text("a".into()), SqlValue::Int(1)],
            vec![SqlValue::Null, SqlValue::Int(2)],
        ];
        let table = format_output_table(&columns, &rows, 5);
        assert!(table.contains("| name | count |"));
        assert!(table.contains("| NULL | 2 |"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(
            format_output_table(&["x".to_string()], &[], 5),
            "No rows returned"
        );
    }
}
