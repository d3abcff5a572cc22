//! Ollama chat client (local fallback provider)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::LlmClient;

#[derive(Clone)]
pub struct OllamaClient {
    host: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&serde_json::json!({
                "model": self.model,
                "stream": false,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt}
                ],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama error {status}: {body}"));
        }

        let parsed: OllamaResponse = response.json().await?;
        Ok(parsed.message.content)
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}
