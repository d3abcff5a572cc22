//! SQL quality evaluation
//!
//! The evaluator runs one of two paths per event: a ground-truth path
//! (semantic SQL similarity + LLM judge + result validation) when the
//! semantic matcher finds a reference, and a reference-free heuristic path
//! otherwise. Structural validation gates both.

pub mod evaluator;
pub mod gt_lookup;
pub mod layers;
pub mod llm_judge;
pub mod output;
pub mod semantic_checker;
pub mod structural;

pub use evaluator::{EvaluationOutcome, EvaluationRecord, EvaluationRequest, Evaluator};
pub use gt_lookup::{GroundTruthCatalog, GroundTruthIndex, GroundTruthMatch};
pub use llm_judge::{LlmJudge, JudgeVerdict};
pub use semantic_checker::SemanticChecker;
pub use structural::{SqlErrorType, StructuralReport, StructuralValidator};

use serde::{Deserialize, Serialize};

/// Evaluation verdicts as persisted in `monitoring.evaluations.result`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "ERROR")]
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
