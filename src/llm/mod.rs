//! LLM capability contract
//!
//! Chat completion with a system + user message, plain-text response. Used
//! by the ground-truth generator, the SQL judge, and the output judge.

pub mod azure_client;
pub mod client_factory;
pub mod ollama_client;

pub use azure_client::AzureOpenAiClient;
pub use client_factory::create_llm_client;
pub use ollama_client::OllamaClient;

use anyhow::Result;
use async_trait::async_trait;

/// Chat-completion provider contract
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one system + user exchange and return the assistant text.
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Provider label for logs
    fn provider_name(&self) -> &str;
}

/// Strip markdown code fences from a model response.
///
/// Accepts bare responses, ```json fenced blocks, and ```sql fenced blocks;
/// returns the inner text trimmed.
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines = trimmed.lines();
    // Drop the opening fence (with optional language tag)
    lines.next();
    let mut body: Vec<&str> = lines.collect();
    if let Some(last) = body.last() {
        if last.trim().starts_with("```") {
            body.pop();
        }
    }
    body.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_text_untouched() {
        assert_eq!(strip_code_fences("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn test_json_fence_stripped() {
        let fenced = "```json\n[{\"a\": 1}]\n```";
        assert_eq!(strip_code_fences(fenced), "[{\"a\": 1}]");
    }

    #[test]
    fn test_plain_fence_stripped() {
        let fenced = "```\nSELECT *\nFROM t\n```";
        assert_eq!(strip_code_fences(fenced), "SELECT *\nFROM t");
    }

    #[test]
    fn test_unclosed_fence_tolerated() {
        let fenced = "```sql\nSELECT 1";
        assert_eq!(strip_code_fences(fenced), "SELECT 1");
    }
}
