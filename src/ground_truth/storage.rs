//! Artifact storage - S3 with local filesystem fallback
//!
//! With `GT_S3_BUCKET` set, artifacts live under `ground_truth/<filename>`
//! in the bucket; otherwise under the local directory. Loads return `None`
//! for missing artifacts rather than erroring.

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::PathBuf;
use tracing::{info, warn};

use super::GroundTruthArtifact;

const S3_PREFIX: &str = "ground_truth";

enum Backend {
    S3 { client: S3Client, bucket: String },
    Local { dir: PathBuf },
}

/// Unified ground-truth storage
pub struct GroundTruthStore {
    backend: Backend,
}

impl GroundTruthStore {
    /// Build the store: S3 when a bucket is configured, local otherwise.
    pub async fn new(bucket: Option<&str>, region: &str, local_dir: &str) -> Self {
        let backend = match bucket {
            Some(bucket) => {
                let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(region.to_string()))
                    .load()
                    .await;
                info!("Ground-truth store: s3://{bucket}/{S3_PREFIX}");
                Backend::S3 {
                    client: S3Client::new(&config),
                    bucket: bucket.to_string(),
                }
            }
            None => {
                info!("Ground-truth store: local directory {local_dir}");
                Backend::Local {
                    dir: PathBuf::from(local_dir),
                }
            }
        };
        Self { backend }
    }

    /// Local-only store (tests and development).
    pub fn local(dir: &str) -> Self {
        Self {
            backend: Backend::Local {
                dir: PathBuf::from(dir),
            },
        }
    }

    pub async fn save(&self, filename: &str, artifact: &GroundTruthArtifact) -> Result<()> {
        let body = serde_json::to_vec_pretty(artifact).context("failed to serialize artifact")?;
        match &self.backend {
            Backend::S3 { client, bucket } => {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(format!("{S3_PREFIX}/{filename}"))
                    .content_type("application/json")
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .with_context(|| format!("S3 put failed for {filename}"))?;
                info!("Saved s3://{bucket}/{S3_PREFIX}/{filename}");
            }
            Backend::Local { dir } => {
                tokio::fs::create_dir_all(dir).await.ok();
                let path = dir.join(filename);
                tokio::fs::write(&path, body)
                    .await
                    .with_context(|| format!("local write failed for {}", path.display()))?;
                info!("Saved {}", path.display());
            }
        }
        Ok(())
    }

    pub async fn load(&self, filename: &str) -> Option<GroundTruthArtifact> {
        let bytes = match &self.backend {
            Backend::S3 { client, bucket } => {
                let response = client
                    .get_object()
                    .bucket(bucket)
                    .key(format!("{S3_PREFIX}/{filename}"))
                    .send()
                    .await
                    .ok()?;
                response.body.collect().await.ok()?.into_bytes().to_vec()
            }
            Backend::Local { dir } => tokio::fs::read(dir.join(filename)).await.ok()?,
        };

        match serde_json::from_slice(&bytes) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("Artifact {filename} is unreadable: {e}");
                None
            }
        }
    }

    pub async fn exists(&self, filename: &str) -> bool {
        match &self.backend {
            Backend::S3 { client, bucket } => client
                .head_object()
                .bucket(bucket)
                .key(format!("{S3_PREFIX}/{filename}"))
                .send()
                .await
                .is_ok(),
            Backend::Local { dir } => dir.join(filename).exists(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ground_truth::artifact_filename;

    #[tokio::test]
    async fn test_local_round_trip() {
        let dir = std::env::temp_dir().join(format!("gt-store-{}", uuid::Uuid::new_v4()));
        let store = GroundTruthStore::local(dir.to_str().unwrap());

        let filename = artifact_filename("demand");
        assert!(store.load(&filename).await.is_none());
        assert!(!store.exists(&filename).await);

        let artifact = GroundTruthArtifact::empty(1, "demand");
        store.save(&filename, &artifact).await.unwrap();

        assert!(store.exists(&filename).await);
        let loaded = store.load(&filename).await.unwrap();
        assert_eq!(loaded.agent_name, "demand");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
