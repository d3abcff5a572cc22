//! Environment-driven settings
//!
//! Loaded once at startup from process env (`.env` honored via dotenvy).
//! A malformed value is a startup failure, not a fallback.

use anyhow::{Context, Result};
use std::env;

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    // Platform database
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    // HTTP listen
    pub api_host: String,
    pub api_port: u16,

    // Operator auth (Azure AD bearer tokens)
    pub auth_enabled: bool,
    pub azure_ad_tenant_id: Option<String>,
    pub azure_ad_client_id: Option<String>,
    pub azure_ad_audience: Option<String>,

    // LLM providers
    pub azure_openai_endpoint: String,
    pub azure_openai_api_key: String,
    pub azure_openai_deployment: String,
    pub azure_openai_api_version: String,
    pub agent_llm_provider: String,
    pub evaluator_llm_provider: String,
    pub ollama_host: String,
    pub ollama_model: String,

    // Embeddings
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub aws_region: String,

    // Evaluation / drift thresholds
    pub evaluation_threshold: f64,
    pub drift_high_threshold: f64,
    pub drift_medium_threshold: f64,

    // Schedulers
    pub health_check_interval_s: u64,
    pub telemetry_gap_threshold_m: i64,

    // Ground-truth artifact store
    pub gt_s3_bucket: Option<String>,
    pub gt_local_dir: String,

    // Alerts
    pub alert_email_enabled: bool,
    pub alert_ses_sender_email: Option<String>,
    pub alert_recipient_emails: Option<String>,
    pub alert_sns_topic_arn: Option<String>,
    pub alert_slack_webhook_url: Option<String>,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn opt_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("invalid {key}={other}: expected true/false"),
        },
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Read settings from the environment. `.env` is loaded first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            db_host: var_or("DB_HOST", "localhost"),
            db_port: parse_var("DB_PORT", 5432)?,
            db_name: var_or("DB_NAME", "agent_sentinel"),
            db_user: var_or("DB_USER", "postgres"),
            db_password: var_or("DB_PASSWORD", ""),

            api_host: var_or("API_HOST", "0.0.0.0"),
            api_port: parse_var("API_PORT", 8000)?,

            auth_enabled: parse_bool("AUTH_ENABLED", false)?,
            azure_ad_tenant_id: opt_var("AZURE_AD_TENANT_ID"),
            azure_ad_client_id: opt_var("AZURE_AD_CLIENT_ID"),
            azure_ad_audience: opt_var("AZURE_AD_AUDIENCE"),

            azure_openai_endpoint: var_or("AZURE_OPENAI_ENDPOINT", ""),
            azure_openai_api_key: var_or("AZURE_OPENAI_API_KEY", ""),
            azure_openai_deployment: var_or("AZURE_OPENAI_DEPLOYMENT", "gpt-4o"),
            azure_openai_api_version: var_or("AZURE_OPENAI_API_VERSION", "2024-12-01-preview"),
            agent_llm_provider: var_or("AGENT_LLM_PROVIDER", "azure"),
            evaluator_llm_provider: var_or("EVALUATOR_LLM_PROVIDER", "azure"),
            ollama_host: var_or("OLLAMA_HOST", "http://localhost:11434"),
            ollama_model: var_or("OLLAMA_MODEL", "llama3.1"),

            embedding_model: var_or("EMBEDDING_MODEL", "amazon.titan-embed-text-v2:0"),
            embedding_dimension: parse_var("EMBEDDING_DIMENSION", 1024)?,
            aws_region: var_or("AWS_REGION", "eu-north-1"),

            evaluation_threshold: parse_var("EVALUATION_THRESHOLD", 0.7)?,
            drift_high_threshold: parse_var("DRIFT_HIGH_THRESHOLD", 0.5)?,
            drift_medium_threshold: parse_var("DRIFT_MEDIUM_THRESHOLD", 0.3)?,

            health_check_interval_s: parse_var("HEALTH_CHECK_INTERVAL_S", 30)?,
            telemetry_gap_threshold_m: parse_var("TELEMETRY_GAP_THRESHOLD_M", 10)?,

            gt_s3_bucket: opt_var("GT_S3_BUCKET"),
            gt_local_dir: var_or("GT_LOCAL_DIR", "data/ground_truth"),

            alert_email_enabled: parse_bool("ALERT_EMAIL_ENABLED", false)?,
            alert_ses_sender_email: opt_var("ALERT_SES_SENDER_EMAIL"),
            alert_recipient_emails: opt_var("ALERT_RECIPIENT_EMAILS"),
            alert_sns_topic_arn: opt_var("ALERT_SNS_TOPIC_ARN"),
            alert_slack_webhook_url: opt_var("ALERT_SLACK_WEBHOOK_URL"),
        })
    }

    /// Connection URL for the platform database
    pub fn database_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }

    /// Recipient list parsed from the comma-separated env value
    pub fn alert_recipients(&self) -> Vec<String> {
        self.alert_recipient_emails
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Azure AD JWKS endpoint for the configured tenant
    pub fn azure_jwks_url(&self) -> Option<String> {
        self.azure_ad_tenant_id.as_ref().map(|tenant| {
            format!("https://login.microsoftonline.com/{tenant}/discovery/v2.0/keys")
        })
    }

    /// Validate the combinations that make startup pointless if wrong.
    pub fn validate(&self) -> Result<()> {
        if self.auth_enabled {
            self.azure_ad_tenant_id
                .as_ref()
                .context("AUTH_ENABLED requires AZURE_AD_TENANT_ID")?;
            self.azure_ad_audience
                .as_ref()
                .context("AUTH_ENABLED requires AZURE_AD_AUDIENCE")?;
        }
        if self.embedding_dimension == 0 {
            anyhow::bail!("EMBEDDING_DIMENSION must be positive");
        }
        if !(0.0..=1.0).contains(&self.evaluation_threshold) {
            anyhow::bail!("EVALUATION_THRESHOLD must be within [0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipients_parsing() {
        let mut settings = Settings::from_env().unwrap();
        settings.alert_recipient_emails =
            Some("ops@example.com, oncall@example.com ,,".to_string());
        assert_eq!(
            settings.alert_recipients(),
            vec!["ops@example.com".to_string(), "oncall@example.com".to_string()]
        );
    }

    #[test]
    fn test_database_url_shape() {
        let mut settings = Settings::from_env().unwrap();
        settings.db_user = "svc".into();
        settings.db_password = "pw".into();
        settings.db_host = "db".into();
        settings.db_port = 5433;
        settings.db_name = "sentinel".into();
        assert_eq!(settings.database_url(), "postgresql://svc:pw@db:5433/sentinel");
    }

    #[test]
    fn test_auth_requires_tenant() {
        let mut settings = Settings::from_env().unwrap();
        settings.auth_enabled = true;
        settings.azure_ad_tenant_id = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_jwks_url() {
        let mut settings = Settings::from_env().unwrap();
        settings.azure_ad_tenant_id = Some("tenant-123".into());
        assert_eq!(
            settings.azure_jwks_url().unwrap(),
            "https://login.microsoftonline.com/tenant-123/discovery/v2.0/keys"
        );
    }
}
