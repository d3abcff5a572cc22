//! LLM-based intent analysis
//!
//! A contextual alternative to the keyword intent layer: the LLM names the
//! intents the question requests, the intents the SQL fulfils, and a score.
//! Used as supplementary evidence on heuristic evaluations; the weighted
//! sum stays keyword-based so it remains deterministic.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str =
    "You are an expert SQL query analyzer. Identify what the user wants (intent) and verify if the SQL query fulfills those intents. Respond in the exact line format requested.";

/// Parsed intent analysis
#[derive(Debug, Clone, Serialize)]
pub struct IntentAnalysis {
    pub requested_intents: Vec<String>,
    pub fulfilled_intents: Vec<String>,
    pub missing_intents: Vec<String>,
    pub unrequested_intents: Vec<String>,
    pub score: f64,
    pub reasoning: String,
}

impl IntentAnalysis {
    fn conservative(reasoning: String) -> Self {
        Self {
            requested_intents: Vec::new(),
            fulfilled_intents: Vec::new(),
            missing_intents: Vec::new(),
            unrequested_intents: Vec::new(),
            score: 0.5,
            reasoning,
        }
    }
}

/// Contextual intent evaluator
pub struct LlmIntentEvaluator {
    llm: Arc<dyn LlmClient>,
}

impl LlmIntentEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn evaluate(&self, user_query: &str, sql: &str) -> IntentAnalysis {
        debug!("LLM evaluating intent for: {:.60}", user_query);

        let prompt = build_intent_prompt(user_query, sql);
        match self.llm.chat(SYSTEM_PROMPT, &prompt).await {
            Ok(response) => {
                let analysis = parse_intent_response(&response);
                debug!(
                    "Intent analysis: score={:.2}, requested={:?}, missing={:?}",
                    analysis.score, analysis.requested_intents, analysis.missing_intents
                );
                analysis
            }
            Err(e) => {
                error!("LLM intent evaluation failed: {e}");
                IntentAnalysis::conservative(format!("Evaluation failed: {e}"))
            }
        }
    }
}

fn build_intent_prompt(user_query: &str, sql: &str) -> String {
    format!(
        r#"**User Query:**
{user_query}

**Generated SQL:**
```sql
{sql}
```

**Intent Categories:**
1. FILTERING: narrowing results by conditions (WHERE clauses)
2. AGGREGATION: computing summaries (SUM, AVG, COUNT, MIN, MAX)
3. GROUPING: breaking down by dimensions (GROUP BY)
4. SORTING: ordering results (ORDER BY)
5. LIMITING: restricting number of rows (LIMIT, TOP N)
6. JOINING: combining multiple tables
7. CALCULATION: derived metrics or computed fields

**Analysis Instructions:**
1. Identify REQUESTED intents: what does the user query ask for?
   Be contextual: "revenue > 100000" is FILTERING, not AGGREGATION;
   "total revenue per campaign" is AGGREGATION + GROUPING.
2. Identify FULFILLED intents: what does the SQL actually do?
3. Calculate score: 1.0 if all requested intents are fulfilled,
   -0.20 for each missing intent, -0.10 for unrequested complexity,
   minimum 0.0.

**Response Format (REQUIRED):**
REQUESTED: intent1, intent2
FULFILLED: intent1
MISSING: intent2
UNREQUESTED:
SCORE: <number between 0.0 and 1.0>
REASONING: <1-2 sentences explaining the score>

Now analyze the query above:"#
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_intent_response(response: &str) -> IntentAnalysis {
    let mut analysis = IntentAnalysis::conservative(String::new());

    for line in response.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_uppercase();
        let value = value.trim();

        if key.contains("UNREQUESTED") {
            analysis.unrequested_intents = parse_list(value);
        } else if key.contains("REQUESTED") {
            analysis.requested_intents = parse_list(value);
        } else if key.contains("FULFILLED") {
            analysis.fulfilled_intents = parse_list(value);
        } else if key.contains("MISSING") {
            analysis.missing_intents = parse_list(value);
        } else if key.contains("SCORE") {
            analysis.score = value.parse::<f64>().map(|s| s.clamp(0.0, 1.0)).unwrap_or(0.5);
        } else if key.contains("REASONING") {
            analysis.reasoning = value.to_string();
        }
    }

    if analysis.reasoning.is_empty() {
        analysis.reasoning = "No reasoning provided".to_string();
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let response = "REQUESTED: FILTERING, AGGREGATION\nFULFILLED: FILTERING\nMISSING: AGGREGATION\nUNREQUESTED:\nSCORE: 0.8\nREASONING: Missing the SUM.";
        let analysis = parse_intent_response(response);
        assert_eq!(analysis.requested_intents, vec!["FILTERING", "AGGREGATION"]);
        assert_eq!(analysis.fulfilled_intents, vec!["FILTERING"]);
        assert_eq!(analysis.missing_intents, vec!["AGGREGATION"]);
        assert!(analysis.unrequested_intents.is_empty());
        assert!((analysis.score - 0.8).abs() < 1e-9);
        assert_eq!(analysis.reasoning, "Missing the SUM.");
    }

    #[test]
    fn test_unrequested_not_swallowed_by_requested() {
        // "UNREQUESTED" contains the substring "REQUESTED"; the parser must
        // route it to the right bucket.
        let response = "REQUESTED: FILTERING\nFULFILLED: FILTERING\nMISSING:\nUNREQUESTED: GROUPING\nSCORE: 0.9";
        let analysis = parse_intent_response(response);
        assert_eq!(analysis.requested_intents, vec!["FILTERING"]);
        assert_eq!(analysis.unrequested_intents, vec!["GROUPING"]);
    }

    #[test]
    fn test_garbage_gets_conservative_score() {
        let analysis = parse_intent_response("prose instead of the protocol");
        assert_eq!(analysis.score, 0.5);
    }

    #[test]
    fn test_score_clamped() {
        let analysis = parse_intent_response("SCORE: 2.5");
        assert_eq!(analysis.score, 1.0);
    }
}
