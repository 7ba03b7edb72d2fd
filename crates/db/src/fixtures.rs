//! Deterministic demo catalog for development and end-to-end runs.

use chrono::Utc;

use agora_core::domain::template::{
    AgentTemplate, ApprovalState, ModelId, TemplateId, TemplateTier,
};

use crate::repositories::{RepositoryError, SqlTemplateRepository, TemplateRepository};
use crate::DbPool;

struct SeedTemplate {
    id: &'static str,
    name: &'static str,
    category: &'static str,
    description: &'static str,
    base_instruction: &'static str,
    default_model: &'static str,
    permitted_models: &'static [&'static str],
    base_price_cents: i64,
    recurring_price_cents: i64,
    tier: TemplateTier,
    approval: ApprovalState,
}

const SEED_TEMPLATES: &[SeedTemplate] = &[
    SeedTemplate {
        id: "tpl-research-scout",
        name: "Research Scout",
        category: "research",
        description: "Finds, compares and summarizes sources on any topic.",
        base_instruction: "You are a meticulous research assistant. Cite the sources you rely on and flag uncertainty explicitly.",
        default_model: "gpt-4o-mini",
        permitted_models: &["gpt-4o-mini", "claude-3-5-haiku", "llama3.1"],
        base_price_cents: 2_900,
        recurring_price_cents: 500,
        tier: TemplateTier::Essential,
        approval: ApprovalState::Approved,
    },
    SeedTemplate {
        id: "tpl-sales-coach",
        name: "Sales Coach",
        category: "sales",
        description: "Drafts outreach, handles objections, preps call notes.",
        base_instruction: "You are an experienced B2B sales coach. Keep advice concrete and tied to the prospect's context.",
        default_model: "gpt-4o",
        permitted_models: &["gpt-4o", "gpt-4o-mini", "claude-3-5-sonnet"],
        base_price_cents: 7_900,
        recurring_price_cents: 1_900,
        tier: TemplateTier::Professional,
        approval: ApprovalState::Approved,
    },
    SeedTemplate {
        id: "tpl-contract-analyst",
        name: "Contract Analyst",
        category: "legal",
        description: "Reviews agreements clause by clause and surfaces risk.",
        base_instruction: "You are a contract analyst. Walk through documents clause by clause, name the risk, and propose fallback language. You do not give legal advice.",
        default_model: "claude-3-5-sonnet",
        permitted_models: &["claude-3-5-sonnet", "gpt-4o"],
        base_price_cents: 19_900,
        recurring_price_cents: 4_900,
        tier: TemplateTier::Premium,
        approval: ApprovalState::Approved,
    },
    SeedTemplate {
        id: "tpl-draft-unreviewed",
        name: "Unreviewed Draft Agent",
        category: "research",
        description: "A submitted template still waiting for review.",
        base_instruction: "You are a helpful assistant.",
        default_model: "gpt-4o-mini",
        permitted_models: &["gpt-4o-mini"],
        base_price_cents: 900,
        recurring_price_cents: 0,
        tier: TemplateTier::Essential,
        approval: ApprovalState::Pending,
    },
];

pub struct SeedResult {
    pub templates_seeded: usize,
}

pub struct DemoCatalog;

impl DemoCatalog {
    /// Upserts the demo templates. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let repo = SqlTemplateRepository::new(pool.clone());
        for seed in SEED_TEMPLATES {
            repo.save(AgentTemplate {
                id: TemplateId(seed.id.to_string()),
                name: seed.name.to_string(),
                category: seed.category.to_string(),
                description: seed.description.to_string(),
                base_instruction: seed.base_instruction.to_string(),
                default_model: ModelId(seed.default_model.to_string()),
                permitted_models: seed
                    .permitted_models
                    .iter()
                    .map(|m| ModelId((*m).to_string()))
                    .collect(),
                base_price_cents: seed.base_price_cents,
                recurring_price_cents: seed.recurring_price_cents,
                tier: seed.tier,
                active: true,
                approval: seed.approval,
                created_at: Utc::now(),
            })
            .await?;
        }
        Ok(SeedResult { templates_seeded: SEED_TEMPLATES.len() })
    }

    /// Confirms every seed row is present with its expected approval state.
    pub async fn verify(pool: &DbPool) -> Result<bool, RepositoryError> {
        for seed in SEED_TEMPLATES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM agent_template WHERE id = ? AND approval = ?)",
            )
            .bind(seed.id)
            .bind(seed.approval.as_str())
            .fetch_one(pool)
            .await?;
            if present != 1 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use agora_core::policy::CallerPlan;

    use crate::repositories::{SqlTemplateRepository, TemplateFilters, TemplateRepository};
    use crate::{connect_with_settings, migrations};

    use super::DemoCatalog;

    #[tokio::test]
    async fn demo_catalog_loads_and_verifies() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let result = DemoCatalog::load(&pool).await.expect("load");
        assert_eq!(result.templates_seeded, 4);
        assert!(DemoCatalog::verify(&pool).await.expect("verify"));

        // Reloading is idempotent.
        DemoCatalog::load(&pool).await.expect("reload");
        assert!(DemoCatalog::verify(&pool).await.expect("verify"));
    }

    #[tokio::test]
    async fn pending_seed_is_hidden_from_buyers() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoCatalog::load(&pool).await.expect("load");

        let repo = SqlTemplateRepository::new(pool);
        let visible = repo
            .list_visible(TemplateFilters { category: None, plan: Some(CallerPlan::Paid) })
            .await
            .expect("list");
        assert_eq!(visible.len(), 3);
        assert!(visible.iter().all(|t| t.id.0 != "tpl-draft-unreviewed"));
    }
}
