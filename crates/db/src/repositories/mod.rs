use async_trait::async_trait;
use thiserror::Error;

use agora_core::domain::customization::{Customization, CustomizationId};
use agora_core::domain::revenue::RevenueRecord;
use agora_core::domain::template::{AgentTemplate, TemplateId, UserId};
use agora_core::domain::turn::{ConversationId, ConversationTurn};
use agora_core::domain::usage::UsagePeriod;
use agora_core::policy::CallerPlan;

pub mod conversation;
pub mod customization;
pub mod memory;
pub mod revenue;
pub mod template;
pub mod usage;

pub use conversation::SqlConversationLogRepository;
pub use customization::SqlCustomizationRepository;
pub use memory::{
    InMemoryConversationLogRepository, InMemoryCustomizationRepository,
    InMemoryRevenueRepository, InMemoryTemplateRepository, InMemoryUsageCounterRepository,
};
pub use revenue::SqlRevenueRepository;
pub use template::SqlTemplateRepository;
pub use usage::SqlUsageCounterRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Default)]
pub struct TemplateFilters {
    pub category: Option<String>,
    /// Free-plan callers do not see templates whose tier requires payment.
    pub plan: Option<CallerPlan>,
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_by_id(&self, id: &TemplateId)
        -> Result<Option<AgentTemplate>, RepositoryError>;

    /// Approved + active templates only, optionally narrowed by category
    /// and caller plan. Admin access goes through `find_by_id`.
    async fn list_visible(
        &self,
        filters: TemplateFilters,
    ) -> Result<Vec<AgentTemplate>, RepositoryError>;

    async fn save(&self, template: AgentTemplate) -> Result<(), RepositoryError>;

    /// Archival freezes the template; dependent customizations keep
    /// serving against the stored instruction text.
    async fn archive(&self, id: &TemplateId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CustomizationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &CustomizationId,
    ) -> Result<Option<Customization>, RepositoryError>;

    /// Single indexed digest lookup; unknown digests are an ordinary miss,
    /// not an error.
    async fn find_by_key_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Customization>, RepositoryError>;

    async fn save(&self, customization: Customization) -> Result<(), RepositoryError>;

    async fn update_key_digest(
        &self,
        id: &CustomizationId,
        digest: &str,
    ) -> Result<(), RepositoryError>;

    async fn exists_for(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
    ) -> Result<bool, RepositoryError>;

    async fn count_all(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ConversationLogRepository: Send + Sync {
    async fn append(&self, turn: ConversationTurn) -> Result<(), RepositoryError>;

    /// The most recent `max_n` turns of one conversation in chronological
    /// order. Conversation ids are scoped per customization: a turn is
    /// returned only when both ids match.
    async fn tail(
        &self,
        customization_id: &CustomizationId,
        conversation_id: &ConversationId,
        max_n: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;

    /// Most recent turns across all conversations of one customization,
    /// newest first.
    async fn history(
        &self,
        customization_id: &CustomizationId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;
}

#[async_trait]
pub trait UsageCounterRepository: Send + Sync {
    async fn current(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
        period: UsagePeriod,
    ) -> Result<u32, RepositoryError>;

    /// Atomic relative increment; concurrent calls for the same key never
    /// lose an update. Returns the new count.
    async fn increment(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
        period: UsagePeriod,
    ) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait RevenueRepository: Send + Sync {
    /// Idempotent on `external_txn`; returns whether a new row was written.
    async fn record(&self, record: RevenueRecord) -> Result<bool, RepositoryError>;

    async fn exists(&self, external_txn: &str) -> Result<bool, RepositoryError>;
}
