use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::customization::CustomizationId;
use super::template::ModelId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Outcome category of one dispatch, as reported by the adapter. `Ok` and
/// `Empty` count as successful for quota purposes; the rest do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Ok,
    Empty,
    RateLimited,
    UpstreamError,
    Timeout,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Empty => "empty",
            Self::RateLimited => "rate_limited",
            Self::UpstreamError => "upstream_error",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Empty)
    }
}

/// One (user message, agent reply) pair. Append-only; failed dispatches are
/// recorded with an empty reply to preserve audit continuity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub customization_id: CustomizationId,
    pub conversation_id: ConversationId,
    pub user_text: String,
    pub agent_text: String,
    pub model_used: ModelId,
    pub tokens: u32,
    pub latency_ms: u64,
    pub outcome: TurnOutcome,
    pub created_at: DateTime<Utc>,
}
