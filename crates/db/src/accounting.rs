//! Read-only accounting view over one usage period. Everything here is a
//! query; the write paths live in the repositories.

use std::collections::BTreeMap;

use sqlx::Row;

use agora_core::domain::usage::UsagePeriod;

use crate::repositories::RepositoryError;
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AccountingReport {
    pub period: String,
    pub currency: String,
    pub revenue_cents: i64,
    pub revenue_by_kind: BTreeMap<String, i64>,
    pub calls_by_template: BTreeMap<String, u64>,
    pub calls_by_category: BTreeMap<String, u64>,
    pub active_customizations: u64,
    /// Mean token count over successful turns in the period; `None` when
    /// there were no successes.
    pub avg_tokens_per_success: Option<f64>,
}

pub struct AccountingView {
    pool: DbPool,
    currency: String,
}

impl AccountingView {
    pub fn new(pool: DbPool, currency: String) -> Self {
        Self { pool, currency }
    }

    pub async fn report(&self, period: UsagePeriod) -> Result<AccountingReport, RepositoryError> {
        let key = period.key();

        // Revenue rows and conversation turns carry RFC 3339 timestamps,
        // so the YYYY-MM prefix selects the period.
        let mut revenue_by_kind = BTreeMap::new();
        let revenue_rows = sqlx::query(
            "SELECT kind, COALESCE(SUM(amount_cents), 0) AS total
             FROM revenue_record
             WHERE substr(created_at, 1, 7) = ?
             GROUP BY kind",
        )
        .bind(&key)
        .fetch_all(&self.pool)
        .await?;
        let mut revenue_cents = 0i64;
        for row in &revenue_rows {
            let kind: String = row.try_get("kind")?;
            let total: i64 = row.try_get("total")?;
            revenue_cents += total;
            revenue_by_kind.insert(kind, total);
        }

        let mut calls_by_template = BTreeMap::new();
        let template_rows = sqlx::query(
            "SELECT template_id, COALESCE(SUM(call_count), 0) AS calls
             FROM usage_counter
             WHERE period = ?
             GROUP BY template_id",
        )
        .bind(&key)
        .fetch_all(&self.pool)
        .await?;
        for row in &template_rows {
            let template_id: String = row.try_get("template_id")?;
            let calls: i64 = row.try_get("calls")?;
            calls_by_template.insert(template_id, calls.max(0) as u64);
        }

        let mut calls_by_category = BTreeMap::new();
        let category_rows = sqlx::query(
            "SELECT t.category AS category, COALESCE(SUM(u.call_count), 0) AS calls
             FROM usage_counter u
             JOIN agent_template t ON t.id = u.template_id
             WHERE u.period = ?
             GROUP BY t.category",
        )
        .bind(&key)
        .fetch_all(&self.pool)
        .await?;
        for row in &category_rows {
            let category: String = row.try_get("category")?;
            let calls: i64 = row.try_get("calls")?;
            calls_by_category.insert(category, calls.max(0) as u64);
        }

        let active_customizations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM customization")
                .fetch_one(&self.pool)
                .await?;

        let avg_tokens_per_success: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(CAST(tokens AS REAL)) FROM conversation_turn
             WHERE outcome IN ('ok', 'empty') AND substr(created_at, 1, 7) = ?",
        )
        .bind(&key)
        .fetch_one(&self.pool)
        .await?;

        Ok(AccountingReport {
            period: key,
            currency: self.currency.clone(),
            revenue_cents,
            revenue_by_kind,
            calls_by_template,
            calls_by_category,
            active_customizations: active_customizations.max(0) as u64,
            avg_tokens_per_success,
        })
    }
}
