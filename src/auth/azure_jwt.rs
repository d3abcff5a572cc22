//! Azure AD bearer-token validation
//!
//! Operator endpoints accept RS256 tokens issued by the configured tenant.
//! Signing keys come from the tenant JWKS endpoint and are cached in memory;
//! an unknown `kid` triggers one refresh before the request is rejected.

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
    #[serde(default)]
    kty: String,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Claims the platform cares about
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorClaims {
    pub sub: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Validator for one Azure AD tenant
pub struct AzureAdValidator {
    jwks_url: String,
    issuer: String,
    audience: String,
    http: reqwest::Client,
    keys: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl AzureAdValidator {
    pub fn new(tenant_id: &str, audience: &str) -> Self {
        Self {
            jwks_url: format!(
                "https://login.microsoftonline.com/{tenant_id}/discovery/v2.0/keys"
            ),
            issuer: format!("https://login.microsoftonline.com/{tenant_id}/v2.0"),
            audience: audience.to_string(),
            http: reqwest::Client::new(),
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate a bearer token and return its claims.
    pub async fn validate(&self, token: &str) -> Result<OperatorClaims> {
        let header = decode_header(token).context("malformed token header")?;
        let kid = header.kid.ok_or_else(|| anyhow!("token missing kid"))?;

        let key = match self.cached_key(&kid).await {
            Some(key) => key,
            None => {
                self.refresh_keys().await?;
                self.cached_key(&kid)
                    .await
                    .ok_or_else(|| anyhow!("unknown signing key {kid}"))?
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<OperatorClaims>(token, &key, &validation)
            .context("token validation failed")?;
        debug!("Validated operator token for {}", data.claims.sub);
        Ok(data.claims)
    }

    async fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }

    async fn refresh_keys(&self) -> Result<()> {
        let response: JwksResponse = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .context("failed to fetch JWKS")?
            .json()
            .await
            .context("failed to parse JWKS")?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in response.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => warn!("Skipping unusable JWKS key {}: {e}", jwk.kid),
            }
        }
        debug!("JWKS refresh loaded {} signing keys", keys.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuer_and_jwks_urls() {
        let validator = AzureAdValidator::new("my-tenant", "api://sentinel");
        assert_eq!(
            validator.jwks_url,
            "https://login.microsoftonline.com/my-tenant/discovery/v2.0/keys"
        );
        assert_eq!(
            validator.issuer,
            "https://login.microsoftonline.com/my-tenant/v2.0"
        );
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let validator = AzureAdValidator::new("t", "a");
        assert!(validator.validate("not-a-jwt").await.is_err());
    }
}
