//! agent-sentinel - observability platform for text-to-SQL agents
//!
//! Registered agents emit telemetry (natural-language query, generated SQL,
//! status, latency). The platform stores it, evaluates SQL quality against
//! discovered ground truth, detects semantic drift of incoming queries from
//! a learned baseline, classifies errors, and serves the aggregations the
//! dashboard reads.
//!
//! Module map:
//! - [`config`] / [`error`] - settings and the platform error type
//! - [`database`] - platform Postgres pool, migrations, repositories
//! - [`auth`] - API-key minting/hashing and Azure AD bearer validation
//! - [`agentdb`] - short-lived connections to external agent databases
//! - [`discovery`] - schema/relationship discovery and row sampling
//! - [`ground_truth`] - LLM-driven artifact generation and storage
//! - [`llm`] - chat-completion capability contract + providers
//! - [`evaluation`] - the two-path evaluator and its component signals
//! - [`monitoring`] - drift detection and error classification
//! - [`alerts`] - email / SNS / Slack alert fan-out
//! - [`agents`] - agent lifecycle, poller, health checker, schema monitor
//! - [`pipeline`] - the per-event background pipeline
//! - [`api`] - axum routers composed by the web binary

pub mod agentdb;
pub mod agents;
pub mod alerts;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod database;
pub mod discovery;
pub mod error;
pub mod evaluation;
pub mod ground_truth;
pub mod llm;
pub mod monitoring;
pub mod pipeline;

pub use config::Settings;
pub use context::Services;
pub use error::PlatformError;
