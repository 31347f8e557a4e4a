use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use caseflow_agent::advisor::{Advisor, HttpAdvisor};
use caseflow_agent::orchestrator::Orchestrator;
use caseflow_agent::tools::ToolRegistry;
use caseflow_core::audit::{AuditEvent, AuditSink};
use caseflow_core::config::{AdvisorMode, AppConfig, ConfigError, LoadOptions};
use caseflow_core::errors::ApplicationError;
use caseflow_db::{connect_with_settings, migrations, DbPool};
use caseflow_db::repositories::{
    SqlFulfillmentRepository, SqlIdempotencyRepository, SqlOrderRepository, SqlSessionRepository,
    SqlToolCallRepository,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::Error),
    #[error("advisor adapter could not be built: {0}")]
    Advisor(String),
    #[error(transparent)]
    Runtime(#[from] ApplicationError),
}

/// Forwards audit events into the structured log stream.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            session_id = event.session_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            correlation_id = %event.correlation_id,
            actor = %event.actor,
            "audit event"
        );
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let orders = Arc::new(SqlOrderRepository::new(db_pool.clone()));
    let sessions = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let fulfillment = Arc::new(SqlFulfillmentRepository::new(db_pool.clone()));
    let registry = Arc::new(ToolRegistry::new(
        orders.clone(),
        fulfillment.clone(),
        Arc::new(SqlIdempotencyRepository::new(db_pool.clone())),
        Arc::new(SqlToolCallRepository::new(db_pool.clone())),
    ));

    let llm: Option<Arc<dyn Advisor>> = match config.advisor.mode {
        AdvisorMode::Deterministic => None,
        AdvisorMode::Hybrid | AdvisorMode::Strict => Some(Arc::new(
            HttpAdvisor::from_config(&config.advisor)
                .map_err(|error| BootstrapError::Advisor(error.to_string()))?,
        )),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        sessions,
        orders,
        fulfillment,
        registry,
        Arc::new(TracingAuditSink),
        llm,
        &config,
    )?);

    Ok(Application { config, db_pool, orchestrator })
}
