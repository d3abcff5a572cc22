//! Text embedding via Amazon Titan Text Embeddings v2 on Bedrock
//!
//! The platform treats embeddings as a capability contract: text in, fixed
//! dimension float vector out. The default provider is
//! `amazon.titan-embed-text-v2:0` (1024 dimensions, L2-normalized output).
//! Stored baselines record the dimension they were built with, so the
//! dimension reported here must stay in agreement with them.

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use serde::Deserialize;
use tracing::{debug, info};

use crate::types::EmbedderError;

/// Default Bedrock embedding model
pub const DEFAULT_MODEL: &str = "amazon.titan-embed-text-v2:0";

/// Default output dimension for Titan v2
pub const DEFAULT_DIMENSION: usize = 1024;

/// Capability contract for a text → vector provider
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed one text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed a batch of texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Output dimension of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Provider model identifier
    fn model_id(&self) -> &str;
}

/// Titan embeddings over the Bedrock runtime
#[derive(Clone)]
pub struct BedrockEmbedder {
    client: BedrockClient,
    model_id: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct TitanEmbedResponse {
    embedding: Vec<f32>,
}

impl BedrockEmbedder {
    /// Create a new embedder against the given AWS region.
    ///
    /// Credentials come from the standard SDK chain (env vars, profile,
    /// instance role).
    pub async fn new(region: impl Into<String>, model_id: &str, dimension: usize) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .load()
            .await;

        info!("Embedding provider ready: {} ({}d)", model_id, dimension);

        Self {
            client: BedrockClient::new(&config),
            model_id: model_id.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl TextEmbedder for BedrockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let body = serde_json::json!({
            "inputText": text,
            "dimensions": self.dimension,
            "normalize": true,
        });

        let response = self
            .client
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .body(Blob::new(body.to_string().into_bytes()))
            .send()
            .await
            .map_err(|e| EmbedderError::Provider(e.to_string()))?;

        let parsed: TitanEmbedResponse = serde_json::from_slice(response.body().as_ref())
            .map_err(|e| EmbedderError::Malformed(e.to_string()))?;

        if parsed.embedding.len() != self.dimension {
            return Err(EmbedderError::Dimension {
                expected: self.dimension,
                actual: parsed.embedding.len(),
            });
        }

        debug!("Embedded {} chars via {}", text.len(), self.model_id);
        Ok(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
