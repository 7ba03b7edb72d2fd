use agora_core::domain::template::{TemplateId, UserId};
use agora_core::domain::usage::UsagePeriod;

use super::{RepositoryError, UsageCounterRepository};
use crate::DbPool;

pub struct SqlUsageCounterRepository {
    pool: DbPool,
}

impl SqlUsageCounterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UsageCounterRepository for SqlUsageCounterRepository {
    async fn current(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
        period: UsagePeriod,
    ) -> Result<u32, RepositoryError> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT call_count FROM usage_counter
             WHERE user_id = ? AND template_id = ? AND period = ?",
        )
        .bind(&user_id.0)
        .bind(&template_id.0)
        .bind(period.key())
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.unwrap_or(0).max(0) as u32)
    }

    async fn increment(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
        period: UsagePeriod,
    ) -> Result<u32, RepositoryError> {
        // A single relative upsert keeps concurrent admissions for the same
        // (user, template, period) from losing updates.
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO usage_counter (user_id, template_id, period, call_count)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(user_id, template_id, period)
                 DO UPDATE SET call_count = call_count + 1
             RETURNING call_count",
        )
        .bind(&user_id.0)
        .bind(&template_id.0)
        .bind(period.key())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u32)
    }
}
