use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use agora_core::config::{AppConfig, ConfigError, LoadOptions, ProvidersConfig};
use agora_core::domain::template::ModelId;
use agora_db::repositories::{
    SqlConversationLogRepository, SqlCustomizationRepository, SqlRevenueRepository,
    SqlTemplateRepository, SqlUsageCounterRepository,
};
use agora_db::{connect_with_settings, migrations, AccountingView, CatalogStore, DbPool, DemoCatalog};
use agora_runtime::{
    AdapterRegistry, AnthropicAdapter, DispatchEngine, OllamaAdapter, OpenAiAdapter, QuotaGate,
    RateLimitBreaker, StaticCallerDirectory,
};

use crate::routes::AppState;

const OPENAI_DEFAULT_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini"];
const ANTHROPIC_DEFAULT_MODELS: &[&str] = &["claude-3-5-sonnet", "claude-3-5-haiku"];
const OLLAMA_DEFAULT_MODELS: &[&str] = &["llama3.1"];

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("demo catalog seeding failed: {0}")]
    Seed(#[source] agora_db::repositories::RepositoryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "bootstrap_start", correlation_id = "bootstrap", "starting bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "bootstrap_database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "bootstrap_migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    if config.marketplace.seed_demo_catalog {
        let seeded = DemoCatalog::load(&db_pool).await.map_err(BootstrapError::Seed)?;
        info!(
            event_name = "bootstrap_demo_catalog_seeded",
            correlation_id = "bootstrap",
            templates = seeded.templates_seeded,
            "demo catalog loaded"
        );
    }

    let templates = Arc::new(SqlTemplateRepository::new(db_pool.clone()));
    let customizations = Arc::new(SqlCustomizationRepository::new(db_pool.clone()));
    let log = Arc::new(SqlConversationLogRepository::new(db_pool.clone()));
    let counters = Arc::new(SqlUsageCounterRepository::new(db_pool.clone()));
    let revenue = Arc::new(SqlRevenueRepository::new(db_pool.clone()));

    let directory =
        Arc::new(StaticCallerDirectory::new(config.marketplace.paid_users.iter().cloned()));
    let registry = build_registry(&config.providers);
    info!(
        event_name = "bootstrap_registry_built",
        correlation_id = "bootstrap",
        models = registry.models().len(),
        "adapter registry built"
    );

    let gate = QuotaGate::new(directory.clone(), counters, config.tiers);
    let breaker = RateLimitBreaker::new(&config.breaker);
    let engine = Arc::new(DispatchEngine::new(
        templates.clone(),
        customizations.clone(),
        log.clone(),
        gate,
        breaker,
        registry,
        config.marketplace.history_tail_limit,
    ));

    let state = AppState {
        engine,
        catalog: Arc::new(CatalogStore::new(templates, customizations.clone())),
        accounting: Arc::new(AccountingView::new(
            db_pool.clone(),
            config.marketplace.currency.clone(),
        )),
        customizations,
        log,
        revenue,
        directory,
        webhook_secret: config.payments.webhook_secret.clone(),
    };

    Ok(Application { config, db_pool, state })
}

/// One adapter per configured provider. A missing credential means no
/// adapter for that family, never a startup failure.
fn build_registry(providers: &ProvidersConfig) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();

    match &providers.openai {
        Some(openai) => registry.register(Arc::new(OpenAiAdapter::new(
            openai.api_key.clone(),
            openai.base_url.clone(),
            model_ids(&openai.models, OPENAI_DEFAULT_MODELS),
        ))),
        None => info!(event_name = "adapter_disabled", provider = "openai", "no credential"),
    }

    match &providers.anthropic {
        Some(anthropic) => registry.register(Arc::new(AnthropicAdapter::new(
            anthropic.api_key.clone(),
            anthropic.base_url.clone(),
            model_ids(&anthropic.models, ANTHROPIC_DEFAULT_MODELS),
        ))),
        None => info!(event_name = "adapter_disabled", provider = "anthropic", "no credential"),
    }

    match &providers.ollama {
        Some(ollama) => registry.register(Arc::new(OllamaAdapter::new(
            Some(ollama.base_url.clone()),
            model_ids(&ollama.models, OLLAMA_DEFAULT_MODELS),
        ))),
        None => info!(event_name = "adapter_disabled", provider = "ollama", "not configured"),
    }

    registry
}

fn model_ids(configured: &[String], defaults: &[&str]) -> Vec<ModelId> {
    if configured.is_empty() {
        defaults.iter().map(|m| ModelId((*m).to_string())).collect()
    } else {
        configured.iter().map(|m| ModelId(m.clone())).collect()
    }
}
