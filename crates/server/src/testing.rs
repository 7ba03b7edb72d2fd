//! Shared test harness: a fully wired [`AppState`] over an in-memory
//! database, with a canned adapter standing in for the providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use agora_core::compose::PromptBundle;
use agora_core::config::BreakerConfig;
use agora_core::domain::template::{
    AgentTemplate, ApprovalState, ModelId, TemplateId, TemplateTier, UserId,
};
use agora_core::policy::{CallerPlan, PolicyTable};
use agora_db::repositories::{
    SqlConversationLogRepository, SqlCustomizationRepository, SqlRevenueRepository,
    SqlTemplateRepository, SqlUsageCounterRepository, TemplateRepository,
};
use agora_db::{connect_with_settings, migrations, AccountingView, CatalogStore, NewCustomization};
use agora_runtime::{
    AdapterRegistry, AdapterReply, DispatchEngine, ModelAdapter, QuotaGate, RateLimitBreaker,
    StaticCallerDirectory,
};

use crate::routes::AppState;

pub const WEBHOOK_SECRET: &str = "whsec_router_tests";

const CANNED_MODEL: &str = "gpt-4o-mini";

/// Answers every call with the same text, like a provider that is always
/// up and instantaneous.
struct CannedAdapter;

#[async_trait]
impl ModelAdapter for CannedAdapter {
    fn supported_models(&self) -> Vec<ModelId> {
        vec![ModelId(CANNED_MODEL.to_string())]
    }

    async fn generate(
        &self,
        model: &ModelId,
        bundle: &PromptBundle,
        _deadline: Duration,
    ) -> AdapterReply {
        AdapterReply::from_text("scripted answer".to_string(), model.clone(), Some(42), bundle)
    }
}

pub struct SeededApp {
    pub state: AppState,
    /// A customization on `tpl-essential` owned by `u-free`.
    pub customization_id: String,
}

fn template(id: &str, tier: TemplateTier) -> AgentTemplate {
    AgentTemplate {
        id: TemplateId(id.to_string()),
        name: format!("Template {id}"),
        category: "research".to_string(),
        description: "Answers questions.".to_string(),
        base_instruction: "You are a helpful assistant.".to_string(),
        default_model: ModelId(CANNED_MODEL.to_string()),
        permitted_models: vec![
            ModelId(CANNED_MODEL.to_string()),
            ModelId("claude-3-5-haiku".to_string()),
        ],
        base_price_cents: 4_900,
        recurring_price_cents: 900,
        tier,
        active: true,
        approval: ApprovalState::Approved,
        created_at: Utc::now(),
    }
}

/// Two templates (one open, one premium), one customization for the free
/// caller, `u-paid` and `u-buyer` on the paid plan, and a known webhook
/// secret.
pub async fn seeded_state() -> SeededApp {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");

    let templates = Arc::new(SqlTemplateRepository::new(pool.clone()));
    templates.save(template("tpl-essential", TemplateTier::Essential)).await.expect("seed");
    templates.save(template("tpl-premium", TemplateTier::Premium)).await.expect("seed");

    let customizations = Arc::new(SqlCustomizationRepository::new(pool.clone()));
    let log = Arc::new(SqlConversationLogRepository::new(pool.clone()));
    let counters = Arc::new(SqlUsageCounterRepository::new(pool.clone()));
    let revenue = Arc::new(SqlRevenueRepository::new(pool.clone()));

    let catalog = Arc::new(CatalogStore::new(templates.clone(), customizations.clone()));
    let created = catalog
        .create_customization(
            CallerPlan::Free,
            NewCustomization {
                template_id: TemplateId("tpl-essential".to_string()),
                user_id: UserId("u-free".to_string()),
                display_name: None,
                instruction_override: None,
                model: None,
                overrides: Default::default(),
            },
        )
        .await
        .expect("seed customization");

    let directory = Arc::new(StaticCallerDirectory::new([
        "u-paid".to_string(),
        "u-buyer".to_string(),
    ]));
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(CannedAdapter));

    let gate = QuotaGate::new(directory.clone(), counters, PolicyTable::default());
    let breaker = RateLimitBreaker::new(&BreakerConfig {
        rate_limit_threshold: 5,
        window_secs: 60,
        cooloff_secs: 60,
    });
    let engine = Arc::new(DispatchEngine::new(
        templates,
        customizations.clone(),
        log.clone(),
        gate,
        breaker,
        registry,
        10,
    ));

    SeededApp {
        state: AppState {
            engine,
            catalog,
            accounting: Arc::new(AccountingView::new(pool, "USD".to_string())),
            customizations,
            log,
            revenue,
            directory,
            webhook_secret: Some(WEBHOOK_SECRET.into()),
        },
        customization_id: created.customization.id.0,
    }
}
