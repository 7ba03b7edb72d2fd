use std::collections::HashMap;

use tokio::sync::RwLock;

use agora_core::domain::customization::{Customization, CustomizationId};
use agora_core::domain::revenue::RevenueRecord;
use agora_core::domain::template::{AgentTemplate, ApprovalState, TemplateId, UserId};
use agora_core::domain::turn::{ConversationId, ConversationTurn};
use agora_core::domain::usage::UsagePeriod;
use agora_core::policy::CallerPlan;

use super::{
    ConversationLogRepository, CustomizationRepository, RepositoryError, RevenueRepository,
    TemplateFilters, TemplateRepository, UsageCounterRepository,
};

#[derive(Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<String, AgentTemplate>>,
}

#[async_trait::async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn find_by_id(
        &self,
        id: &TemplateId,
    ) -> Result<Option<AgentTemplate>, RepositoryError> {
        let templates = self.templates.read().await;
        Ok(templates.get(&id.0).cloned())
    }

    async fn list_visible(
        &self,
        filters: TemplateFilters,
    ) -> Result<Vec<AgentTemplate>, RepositoryError> {
        let templates = self.templates.read().await;
        let mut visible: Vec<AgentTemplate> = templates
            .values()
            .filter(|template| template.buyer_visible())
            .filter(|template| {
                filters.category.as_deref().map_or(true, |c| template.category == c)
            })
            .filter(|template| {
                filters.plan != Some(CallerPlan::Free) || !template.tier.requires_paid_plan()
            })
            .cloned()
            .collect();
        visible.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        Ok(visible)
    }

    async fn save(&self, template: AgentTemplate) -> Result<(), RepositoryError> {
        let mut templates = self.templates.write().await;
        templates.insert(template.id.0.clone(), template);
        Ok(())
    }

    async fn archive(&self, id: &TemplateId) -> Result<(), RepositoryError> {
        let mut templates = self.templates.write().await;
        if let Some(template) = templates.get_mut(&id.0) {
            template.approval = ApprovalState::Archived;
            template.active = false;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCustomizationRepository {
    customizations: RwLock<HashMap<String, Customization>>,
}

#[async_trait::async_trait]
impl CustomizationRepository for InMemoryCustomizationRepository {
    async fn find_by_id(
        &self,
        id: &CustomizationId,
    ) -> Result<Option<Customization>, RepositoryError> {
        let customizations = self.customizations.read().await;
        Ok(customizations.get(&id.0).cloned())
    }

    async fn find_by_key_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Customization>, RepositoryError> {
        let customizations = self.customizations.read().await;
        Ok(customizations.values().find(|c| c.api_key_digest == digest).cloned())
    }

    async fn save(&self, customization: Customization) -> Result<(), RepositoryError> {
        let mut customizations = self.customizations.write().await;
        customizations.insert(customization.id.0.clone(), customization);
        Ok(())
    }

    async fn update_key_digest(
        &self,
        id: &CustomizationId,
        digest: &str,
    ) -> Result<(), RepositoryError> {
        let mut customizations = self.customizations.write().await;
        if let Some(customization) = customizations.get_mut(&id.0) {
            customization.api_key_digest = digest.to_string();
        }
        Ok(())
    }

    async fn exists_for(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
    ) -> Result<bool, RepositoryError> {
        let customizations = self.customizations.read().await;
        Ok(customizations
            .values()
            .any(|c| c.user_id == *user_id && c.template_id == *template_id))
    }

    async fn count_all(&self) -> Result<u64, RepositoryError> {
        let customizations = self.customizations.read().await;
        Ok(customizations.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryConversationLogRepository {
    turns: RwLock<Vec<ConversationTurn>>,
}

impl InMemoryConversationLogRepository {
    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConversationLogRepository for InMemoryConversationLogRepository {
    async fn append(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        let mut turns = self.turns.write().await;
        turns.push(turn);
        Ok(())
    }

    async fn tail(
        &self,
        customization_id: &CustomizationId,
        conversation_id: &ConversationId,
        max_n: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let turns = self.turns.read().await;
        let matching: Vec<ConversationTurn> = turns
            .iter()
            .filter(|turn| {
                turn.customization_id == *customization_id
                    && turn.conversation_id == *conversation_id
            })
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(max_n);
        Ok(matching[skip..].to_vec())
    }

    async fn history(
        &self,
        customization_id: &CustomizationId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let turns = self.turns.read().await;
        let mut matching: Vec<ConversationTurn> = turns
            .iter()
            .filter(|turn| turn.customization_id == *customization_id)
            .cloned()
            .collect();
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryUsageCounterRepository {
    counters: RwLock<HashMap<(String, String, String), u32>>,
}

#[async_trait::async_trait]
impl UsageCounterRepository for InMemoryUsageCounterRepository {
    async fn current(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
        period: UsagePeriod,
    ) -> Result<u32, RepositoryError> {
        let counters = self.counters.read().await;
        Ok(*counters
            .get(&(user_id.0.clone(), template_id.0.clone(), period.key()))
            .unwrap_or(&0))
    }

    async fn increment(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
        period: UsagePeriod,
    ) -> Result<u32, RepositoryError> {
        let mut counters = self.counters.write().await;
        let count = counters
            .entry((user_id.0.clone(), template_id.0.clone(), period.key()))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

#[derive(Default)]
pub struct InMemoryRevenueRepository {
    records: RwLock<HashMap<String, RevenueRecord>>,
}

#[async_trait::async_trait]
impl RevenueRepository for InMemoryRevenueRepository {
    async fn record(&self, record: RevenueRecord) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.external_txn) {
            return Ok(false);
        }
        records.insert(record.external_txn.clone(), record);
        Ok(true)
    }

    async fn exists(&self, external_txn: &str) -> Result<bool, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.contains_key(external_txn))
    }
}
