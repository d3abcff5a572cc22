//! Provider selection from settings

use anyhow::{bail, Result};
use std::sync::Arc;

use super::{AzureOpenAiClient, LlmClient, OllamaClient};
use crate::config::Settings;

/// Build the chat client for the requested provider name.
pub fn create_llm_client(settings: &Settings, provider: &str) -> Result<Arc<dyn LlmClient>> {
    match provider {
        "azure" => Ok(Arc::new(AzureOpenAiClient::new(
            &settings.azure_openai_endpoint,
            &settings.azure_openai_api_key,
            &settings.azure_openai_deployment,
            &settings.azure_openai_api_version,
        ))),
        "ollama" => Ok(Arc::new(OllamaClient::new(
            &settings.ollama_host,
            &settings.ollama_model,
        ))),
        other => bail!("unknown LLM provider '{other}' (expected 'azure' or 'ollama')"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        let settings = Settings::from_env().unwrap();
        assert_eq!(
            create_llm_client(&settings, "azure").unwrap().provider_name(),
            "azure"
        );
        assert_eq!(
            create_llm_client(&settings, "ollama").unwrap().provider_name(),
            "ollama"
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let settings = Settings::from_env().unwrap();
        assert!(create_llm_client(&settings, "bedrock-chat").is_err());
    }
}
