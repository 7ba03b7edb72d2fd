use agora_core::domain::revenue::RevenueRecord;

use super::{RepositoryError, RevenueRepository};
use crate::DbPool;

pub struct SqlRevenueRepository {
    pool: DbPool,
}

impl SqlRevenueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RevenueRepository for SqlRevenueRepository {
    async fn record(&self, record: RevenueRecord) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO revenue_record (external_txn, user_id, template_id, kind,
                                         amount_cents, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_txn) DO NOTHING",
        )
        .bind(&record.external_txn)
        .bind(&record.user_id.0)
        .bind(&record.template_id.0)
        .bind(record.kind.as_str())
        .bind(record.amount_cents)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, external_txn: &str) -> Result<bool, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM revenue_record WHERE external_txn = ?")
                .bind(external_txn)
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use agora_core::domain::revenue::{RevenueKind, RevenueRecord};
    use agora_core::domain::template::{TemplateId, UserId};

    use super::SqlRevenueRepository;
    use crate::repositories::RevenueRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample(external_txn: &str) -> RevenueRecord {
        RevenueRecord {
            user_id: UserId("u-1".to_string()),
            template_id: TemplateId("tpl-1".to_string()),
            kind: RevenueKind::OneTime,
            amount_cents: 4_900,
            external_txn: external_txn.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_external_txn_is_an_idempotent_no_op() {
        let pool = setup().await;
        let repo = SqlRevenueRepository::new(pool.clone());

        assert!(repo.record(sample("txn-1")).await.expect("first"));
        assert!(!repo.record(sample("txn-1")).await.expect("duplicate"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revenue_record")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn exists_reflects_recorded_transactions() {
        let pool = setup().await;
        let repo = SqlRevenueRepository::new(pool);

        assert!(!repo.exists("txn-1").await.expect("exists"));
        repo.record(sample("txn-1")).await.expect("record");
        assert!(repo.exists("txn-1").await.expect("exists"));
    }
}
