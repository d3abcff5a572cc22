//! LLM judge for SQL correctness
//!
//! Prompts the evaluator LLM with the question, the candidate SQL and the
//! reference SQL, and parses a line-protocol verdict:
//! `VERDICT: PASS|FAIL`, `CONFIDENCE: 0.0-1.0`, `REASONING: ...`.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = r#"You are an expert SQL evaluator. Your task is to determine if the generated SQL query correctly answers the user's question.

Evaluation Criteria:
1. **Correctness**: Does the SQL query retrieve the right data to answer the question?
2. **Completeness**: Does it include all necessary components (filters, aggregations, etc.)?
3. **Logic**: Are the table joins, WHERE conditions, and GROUP BY clauses correct?

Compare the generated SQL with the ground truth SQL. Consider them equivalent if they produce the same result, even if syntax differs slightly.
Refine your judgment:
- **PASS** if the generated SQL uses a VIEW instead of complex JOINs. This is a VALID logic optimization.
- **PASS** if the SQL answers the core intent of the question, even if aggregation or sorting is slightly different.
- **PASS** if the SQL uses different column aliases or table aliases.
- **IGNORE** additional ORDER BY clauses unless the user asked for a specific order.
- **IGNORE** NULLIF or safety checks (e.g. division by zero protection).
- **IGNORE** extra columns in SELECT clause if the core answer is present.

**FAIL ONLY IF**:
- The SQL is syntactically invalid.
- The SQL queries the WRONG table or WRONG column.
- The SQL returns completely unrelated data.

**CRITICAL INSTRUCTIONS FOR FLEXIBILITY**:
- **SUPERIOR LOGIC**: If the generated SQL uses a more complex/accurate logic than the ground truth, it MUST **PASS**.
- **CASE SENSITIVITY**: Ignore case mismatches in string literals.

Return your evaluation in this exact format:
VERDICT: [PASS/FAIL]
CONFIDENCE: [0.0-1.0]
REASONING: [Brief explanation of your decision]"#;

/// Parsed judge verdict
#[derive(Debug, Clone, Serialize)]
pub struct JudgeVerdict {
    pub verdict: String,
    pub confidence: f64,
    pub reasoning: String,
}

impl JudgeVerdict {
    pub fn passed(&self) -> bool {
        self.verdict == "PASS"
    }

    pub fn score(&self) -> f64 {
        if self.passed() {
            1.0
        } else {
            0.0
        }
    }
}

/// SQL judge backed by the evaluator LLM
pub struct LlmJudge {
    llm: Arc<dyn LlmClient>,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn evaluate(
        &self,
        user_query: &str,
        generated_sql: &str,
        ground_truth_sql: &str,
        agent_type: &str,
    ) -> JudgeVerdict {
        let user_prompt = format!(
            r#"User Query: "{user_query}"

Generated SQL:
{generated_sql}

Ground Truth SQL:
{ground_truth_sql}

Agent Type: {agent_type}

Evaluate if the generated SQL correctly answers the user query."#
        );

        match self.llm.chat(SYSTEM_PROMPT, &user_prompt).await {
            Ok(response) => parse_verdict(&response),
            Err(e) => {
                error!("LLM judge call failed: {e}");
                JudgeVerdict {
                    verdict: "FAIL".to_string(),
                    confidence: 0.0,
                    reasoning: format!("Error during evaluation: {e}"),
                }
            }
        }
    }
}

/// Parse the line-protocol response. Missing fields fall back to a FAIL
/// verdict with 0.5 confidence, keeping the raw text as reasoning.
pub fn parse_verdict(response: &str) -> JudgeVerdict {
    let mut verdict = "FAIL".to_string();
    let mut confidence = 0.5;
    let mut reasoning = String::new();

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("VERDICT:") {
            let value = rest.trim().to_uppercase();
            verdict = if value == "PASS" || value == "FAIL" {
                value
            } else {
                "FAIL".to_string()
            };
        } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
            match rest.trim().parse::<f64>() {
                Ok(value) => confidence = value.clamp(0.0, 1.0),
                Err(_) => warn!("Unparseable judge confidence: {rest}"),
            }
        } else if let Some(rest) = line.strip_prefix("REASONING:") {
            reasoning = rest.trim().to_string();
        }
    }

    if reasoning.is_empty() {
        reasoning = response.trim().to_string();
    }

    JudgeVerdict {
        verdict,
        confidence,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pass_verdict() {
        let response = "VERDICT: PASS\nCONFIDENCE: 0.92\nREASONING: Equivalent aggregation.";
        let verdict = parse_verdict(response);
        assert!(verdict.passed());
        assert_eq!(verdict.score(), 1.0);
        assert!((verdict.confidence - 0.92).abs() < 1e-9);
        assert_eq!(verdict.reasoning, "Equivalent aggregation.");
    }

    #[test]
    fn test_parse_fail_verdict() {
        let verdict = parse_verdict("VERDICT: FAIL\nCONFIDENCE: 0.8\nREASONING: Wrong table.");
        assert!(!verdict.passed());
        assert_eq!(verdict.score(), 0.0);
    }

    #[test]
    fn test_unknown_verdict_falls_back_to_fail() {
        let verdict = parse_verdict("VERDICT: MAYBE\nCONFIDENCE: 0.8");
        assert_eq!(verdict.verdict, "FAIL");
    }

    #[test]
    fn test_garbage_response() {
        let verdict = parse_verdict("The model produced prose instead.");
        assert_eq!(verdict.verdict, "FAIL");
        assert_eq!(verdict.confidence, 0.5);
        assert_eq!(verdict.reasoning, "The model produced prose instead.");
    }

    #[test]
    fn test_confidence_clamped() {
        let verdict = parse_verdict("VERDICT: PASS\nCONFIDENCE: 1.7");
        assert_eq!(verdict.confidence, 1.0);
    }
}
