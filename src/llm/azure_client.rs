//! Azure OpenAI chat client
//!
//! Deployment-scoped chat completions:
//! `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=...`
//! with the `api-key` header.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::LlmClient;

/// Azure OpenAI API client
#[derive(Clone)]
pub struct AzureOpenAiClient {
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    client: reqwest::Client,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl AzureOpenAiClient {
    pub fn new(endpoint: &str, api_key: &str, deployment: &str, api_version: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            deployment: deployment.to_string(),
            api_version: api_version.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            temperature: 0.0,
            max_tokens: 2048,
        }
    }

    /// Override sampling parameters (generation wants temperature 0.7).
    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl LlmClient for AzureOpenAiClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&serde_json::json!({
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt}
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Azure OpenAI error {status}: {body}"));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("empty response from Azure OpenAI"))
    }

    fn provider_name(&self) -> &str {
        "azure"
    }
}
