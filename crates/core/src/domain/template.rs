use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateTier {
    Essential,
    Professional,
    Premium,
    Elite,
}

impl TemplateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Essential => "essential",
            Self::Professional => "professional",
            Self::Premium => "premium",
            Self::Elite => "elite",
        }
    }

    /// Premium and elite templates are closed to free-plan callers.
    pub fn requires_paid_plan(&self) -> bool {
        matches!(self, Self::Premium | Self::Elite)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Archived,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub id: TemplateId,
    pub name: String,
    pub category: String,
    pub description: String,
    pub base_instruction: String,
    pub default_model: ModelId,
    pub permitted_models: Vec<ModelId>,
    pub base_price_cents: i64,
    pub recurring_price_cents: i64,
    pub tier: TemplateTier,
    pub active: bool,
    pub approval: ApprovalState,
    pub created_at: DateTime<Utc>,
}

impl AgentTemplate {
    /// A template is purchasable only while approved and active. Archived
    /// and rejected templates stay addressable for admins and for the
    /// customizations that already reference them.
    pub fn buyer_visible(&self) -> bool {
        self.active && self.approval == ApprovalState::Approved
    }

    pub fn permits_model(&self, model: &ModelId) -> bool {
        self.permitted_models.contains(model)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{AgentTemplate, ApprovalState, ModelId, TemplateId, TemplateTier};

    fn template(approval: ApprovalState, active: bool) -> AgentTemplate {
        AgentTemplate {
            id: TemplateId("tpl-legal".to_string()),
            name: "Contract Reviewer".to_string(),
            category: "legal".to_string(),
            description: "Reviews contracts clause by clause".to_string(),
            base_instruction: "You review contracts.".to_string(),
            default_model: ModelId("gpt-4o-mini".to_string()),
            permitted_models: vec![
                ModelId("gpt-4o-mini".to_string()),
                ModelId("claude-3-5-haiku".to_string()),
            ],
            base_price_cents: 4_900,
            recurring_price_cents: 900,
            tier: TemplateTier::Professional,
            active,
            approval,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_approved_and_active_templates_are_buyer_visible() {
        assert!(template(ApprovalState::Approved, true).buyer_visible());
        assert!(!template(ApprovalState::Approved, false).buyer_visible());
        assert!(!template(ApprovalState::Pending, true).buyer_visible());
        assert!(!template(ApprovalState::Archived, true).buyer_visible());
    }

    #[test]
    fn model_permit_checks_declared_set() {
        let template = template(ApprovalState::Approved, true);
        assert!(template.permits_model(&ModelId("claude-3-5-haiku".to_string())));
        assert!(!template.permits_model(&ModelId("llama3.1".to_string())));
    }

    #[test]
    fn premium_and_elite_tiers_require_paid_plan() {
        assert!(!TemplateTier::Essential.requires_paid_plan());
        assert!(!TemplateTier::Professional.requires_paid_plan());
        assert!(TemplateTier::Premium.requires_paid_plan());
        assert!(TemplateTier::Elite.requires_paid_plan());
    }
}
