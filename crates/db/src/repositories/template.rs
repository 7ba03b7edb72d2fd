use chrono::{DateTime, Utc};
use sqlx::Row;

use agora_core::domain::template::{
    AgentTemplate, ApprovalState, ModelId, TemplateId, TemplateTier,
};
use agora_core::policy::CallerPlan;

use super::{RepositoryError, TemplateFilters, TemplateRepository};
use crate::DbPool;

pub struct SqlTemplateRepository {
    pool: DbPool,
}

impl SqlTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_tier(s: &str) -> Result<TemplateTier, RepositoryError> {
    match s {
        "essential" => Ok(TemplateTier::Essential),
        "professional" => Ok(TemplateTier::Professional),
        "premium" => Ok(TemplateTier::Premium),
        "elite" => Ok(TemplateTier::Elite),
        other => Err(RepositoryError::Decode(format!("unknown tier `{other}`"))),
    }
}

fn parse_approval(s: &str) -> Result<ApprovalState, RepositoryError> {
    match s {
        "pending" => Ok(ApprovalState::Pending),
        "approved" => Ok(ApprovalState::Approved),
        "rejected" => Ok(ApprovalState::Rejected),
        "archived" => Ok(ApprovalState::Archived),
        other => Err(RepositoryError::Decode(format!("unknown approval state `{other}`"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp `{s}`: {e}")))
}

fn row_to_template(row: &sqlx::sqlite::SqliteRow) -> Result<AgentTemplate, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let name: String = row.try_get("name").map_err(decode)?;
    let category: String = row.try_get("category").map_err(decode)?;
    let description: String = row.try_get("description").map_err(decode)?;
    let base_instruction: String = row.try_get("base_instruction").map_err(decode)?;
    let default_model: String = row.try_get("default_model").map_err(decode)?;
    let permitted_models_json: String = row.try_get("permitted_models").map_err(decode)?;
    let base_price_cents: i64 = row.try_get("base_price_cents").map_err(decode)?;
    let recurring_price_cents: i64 = row.try_get("recurring_price_cents").map_err(decode)?;
    let tier_str: String = row.try_get("tier").map_err(decode)?;
    let active: bool = row.try_get("active").map_err(decode)?;
    let approval_str: String = row.try_get("approval").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;

    let permitted: Vec<String> = serde_json::from_str(&permitted_models_json)
        .map_err(|e| RepositoryError::Decode(format!("bad permitted_models: {e}")))?;

    Ok(AgentTemplate {
        id: TemplateId(id),
        name,
        category,
        description,
        base_instruction,
        default_model: ModelId(default_model),
        permitted_models: permitted.into_iter().map(ModelId).collect(),
        base_price_cents,
        recurring_price_cents,
        tier: parse_tier(&tier_str)?,
        active,
        approval: parse_approval(&approval_str)?,
        created_at: parse_timestamp(&created_at_str)?,
    })
}

const TEMPLATE_COLUMNS: &str = "id, name, category, description, base_instruction, default_model,
       permitted_models, base_price_cents, recurring_price_cents, tier, active, approval, created_at";

#[async_trait::async_trait]
impl TemplateRepository for SqlTemplateRepository {
    async fn find_by_id(
        &self,
        id: &TemplateId,
    ) -> Result<Option<AgentTemplate>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM agent_template WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_template(r)?)),
            None => Ok(None),
        }
    }

    async fn list_visible(
        &self,
        filters: TemplateFilters,
    ) -> Result<Vec<AgentTemplate>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM agent_template
             WHERE approval = 'approved' AND active = 1
               AND (? IS NULL OR category = ?)
             ORDER BY category, name"
        ))
        .bind(&filters.category)
        .bind(&filters.category)
        .fetch_all(&self.pool)
        .await?;

        let mut templates =
            rows.iter().map(row_to_template).collect::<Result<Vec<_>, _>>()?;

        if filters.plan == Some(CallerPlan::Free) {
            templates.retain(|template| !template.tier.requires_paid_plan());
        }

        Ok(templates)
    }

    async fn save(&self, template: AgentTemplate) -> Result<(), RepositoryError> {
        let permitted_models_json = serde_json::to_string(
            &template.permitted_models.iter().map(|m| m.0.clone()).collect::<Vec<_>>(),
        )
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO agent_template (id, name, category, description, base_instruction,
                                         default_model, permitted_models, base_price_cents,
                                         recurring_price_cents, tier, active, approval, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 category = excluded.category,
                 description = excluded.description,
                 base_instruction = excluded.base_instruction,
                 default_model = excluded.default_model,
                 permitted_models = excluded.permitted_models,
                 base_price_cents = excluded.base_price_cents,
                 recurring_price_cents = excluded.recurring_price_cents,
                 tier = excluded.tier,
                 active = excluded.active,
                 approval = excluded.approval",
        )
        .bind(&template.id.0)
        .bind(&template.name)
        .bind(&template.category)
        .bind(&template.description)
        .bind(&template.base_instruction)
        .bind(&template.default_model.0)
        .bind(&permitted_models_json)
        .bind(template.base_price_cents)
        .bind(template.recurring_price_cents)
        .bind(template.tier.as_str())
        .bind(template.active)
        .bind(template.approval.as_str())
        .bind(template.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn archive(&self, id: &TemplateId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agent_template SET approval = 'archived', active = 0 WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
