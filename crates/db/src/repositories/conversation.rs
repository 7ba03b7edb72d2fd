use chrono::{DateTime, Utc};
use sqlx::Row;

use agora_core::domain::customization::CustomizationId;
use agora_core::domain::template::ModelId;
use agora_core::domain::turn::{ConversationId, ConversationTurn, TurnOutcome};

use super::{ConversationLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationLogRepository {
    pool: DbPool,
}

impl SqlConversationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_outcome(s: &str) -> Result<TurnOutcome, RepositoryError> {
    match s {
        "ok" => Ok(TurnOutcome::Ok),
        "empty" => Ok(TurnOutcome::Empty),
        "rate_limited" => Ok(TurnOutcome::RateLimited),
        "upstream_error" => Ok(TurnOutcome::UpstreamError),
        "timeout" => Ok(TurnOutcome::Timeout),
        other => Err(RepositoryError::Decode(format!("unknown outcome `{other}`"))),
    }
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let customization_id: String = row.try_get("customization_id").map_err(decode)?;
    let conversation_id: String = row.try_get("conversation_id").map_err(decode)?;
    let user_text: String = row.try_get("user_text").map_err(decode)?;
    let agent_text: String = row.try_get("agent_text").map_err(decode)?;
    let model_used: String = row.try_get("model_used").map_err(decode)?;
    let tokens: i64 = row.try_get("tokens").map_err(decode)?;
    let latency_ms: i64 = row.try_get("latency_ms").map_err(decode)?;
    let outcome_str: String = row.try_get("outcome").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp: {e}")))?;

    Ok(ConversationTurn {
        id,
        customization_id: CustomizationId(customization_id),
        conversation_id: ConversationId(conversation_id),
        user_text,
        agent_text,
        model_used: ModelId(model_used),
        tokens: tokens.max(0) as u32,
        latency_ms: latency_ms.max(0) as u64,
        outcome: parse_outcome(&outcome_str)?,
        created_at,
    })
}

const TURN_COLUMNS: &str = "id, customization_id, conversation_id, user_text, agent_text,
       model_used, tokens, latency_ms, outcome, created_at";

#[async_trait::async_trait]
impl ConversationLogRepository for SqlConversationLogRepository {
    async fn append(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_turn (id, customization_id, conversation_id, user_text,
                                            agent_text, model_used, tokens, latency_ms,
                                            outcome, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id)
        .bind(&turn.customization_id.0)
        .bind(&turn.conversation_id.0)
        .bind(&turn.user_text)
        .bind(&turn.agent_text)
        .bind(&turn.model_used.0)
        .bind(i64::from(turn.tokens))
        .bind(turn.latency_ms as i64)
        .bind(turn.outcome.as_str())
        .bind(turn.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn tail(
        &self,
        customization_id: &CustomizationId,
        conversation_id: &ConversationId,
        max_n: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        // Newest-first with LIMIT, then reversed: the bound applies to the
        // end of the conversation, and callers get chronological order.
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turn
             WHERE customization_id = ? AND conversation_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(&customization_id.0)
        .bind(&conversation_id.0)
        .bind(max_n as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows.iter().map(row_to_turn).collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn history(
        &self,
        customization_id: &CustomizationId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turn
             WHERE customization_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(&customization_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_turn).collect()
    }
}
