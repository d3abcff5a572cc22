//! Startup wiring
//!
//! Every stateful collaborator is constructed here once and handed around
//! as an explicit dependency - request handlers and schedulers receive
//! handles, never globals.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::alerts::AlertService;
use crate::config::Settings;
use crate::database::{
    connect_pool, migrations, AgentRepository, MetricsRepository, MonitoringRepository,
};
use crate::evaluation::{Evaluator, GroundTruthCatalog};
use crate::ground_truth::GroundTruthStore;
use crate::llm::{create_llm_client, AzureOpenAiClient, LlmClient};
use crate::monitoring::{DriftDetector, DriftThresholds};
use sentinel_matcher::{BedrockEmbedder, TextEmbedder};

/// The platform's shared service set
pub struct Services {
    pub settings: Settings,
    pub pool: PgPool,
    pub agents: AgentRepository,
    pub monitoring: MonitoringRepository,
    pub metrics: MetricsRepository,
    pub embedder: Arc<dyn TextEmbedder>,
    pub evaluator_llm: Arc<dyn LlmClient>,
    pub generator_llm: Arc<dyn LlmClient>,
    pub gt_store: Arc<GroundTruthStore>,
    pub gt_catalog: Arc<GroundTruthCatalog>,
    pub alerts: Arc<AlertService>,
}

impl Services {
    /// Connect, migrate, and build every collaborator.
    pub async fn initialize(settings: Settings) -> Result<Arc<Self>> {
        settings.validate().context("invalid configuration")?;

        let pool = connect_pool(&settings).await?;
        migrations::run(&pool, settings.embedding_dimension)
            .await
            .context("database migration failed")?;

        let embedder: Arc<dyn TextEmbedder> = Arc::new(
            BedrockEmbedder::new(
                settings.aws_region.clone(),
                &settings.embedding_model,
                settings.embedding_dimension,
            )
            .await,
        );

        let evaluator_llm = create_llm_client(&settings, &settings.evaluator_llm_provider)?;
        // Generation wants a hotter sampling profile and a bigger budget
        let generator_llm: Arc<dyn LlmClient> =
            if settings.agent_llm_provider == "azure" {
                Arc::new(
                    AzureOpenAiClient::new(
                        &settings.azure_openai_endpoint,
                        &settings.azure_openai_api_key,
                        &settings.azure_openai_deployment,
                        &settings.azure_openai_api_version,
                    )
                    .with_sampling(0.7, 8000),
                )
            } else {
                create_llm_client(&settings, &settings.agent_llm_provider)?
            };

        let gt_store = Arc::new(
            GroundTruthStore::new(
                settings.gt_s3_bucket.as_deref(),
                &settings.aws_region,
                &settings.gt_local_dir,
            )
            .await,
        );
        let gt_catalog = Arc::new(GroundTruthCatalog::new(gt_store.clone(), embedder.clone()));
        let alerts = Arc::new(AlertService::new(&settings).await);

        info!("Platform services initialized");

        Ok(Arc::new(Self {
            agents: AgentRepository::new(pool.clone()),
            monitoring: MonitoringRepository::new(pool.clone()),
            metrics: MetricsRepository::new(pool.clone()),
            pool,
            embedder,
            evaluator_llm,
            generator_llm,
            gt_store,
            gt_catalog,
            alerts,
            settings,
        }))
    }

    pub fn drift_thresholds(&self) -> DriftThresholds {
        DriftThresholds {
            high: self.settings.drift_high_threshold,
            medium: self.settings.drift_medium_threshold,
        }
    }

    /// A drift detector bound to this service set.
    pub fn drift_detector(&self) -> DriftDetector {
        DriftDetector::new(
            self.monitoring.clone(),
            self.embedder.clone(),
            self.drift_thresholds(),
        )
    }

    /// Build an evaluator for one agent, loading its cached schema.
    pub async fn evaluator_for(&self, agent_type: &str) -> Result<Evaluator> {
        let agent = self.agents.get_by_name(agent_type).await?;
        let (schema_info, db_url) = match &agent {
            Some(agent) => (
                self.agents.schema_info(agent.agent_id).await?,
                Some(agent.db_url.clone()),
            ),
            None => (Default::default(), None),
        };

        Ok(Evaluator::new(
            agent
                .map(|a| a.agent_name)
                .unwrap_or_else(|| agent_type.to_string()),
            db_url,
            schema_info,
            self.evaluator_llm.clone(),
            self.gt_catalog.clone(),
            self.drift_detector(),
            self.monitoring.clone(),
            self.settings.evaluation_threshold,
        ))
    }
}
