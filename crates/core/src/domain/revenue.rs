use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::template::{TemplateId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueKind {
    OneTime,
    Recurring,
}

impl RevenueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Recurring => "recurring",
        }
    }
}

impl std::str::FromStr for RevenueKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "one_time" => Ok(Self::OneTime),
            "recurring" => Ok(Self::Recurring),
            other => Err(format!("unknown revenue kind `{other}`")),
        }
    }
}

/// One billable event posted by the external payment collaborator.
/// Read-only to the runtime; `external_txn` is the idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub user_id: UserId,
    pub template_id: TemplateId,
    pub kind: RevenueKind,
    pub amount_cents: i64,
    pub external_txn: String,
    pub created_at: DateTime<Utc>,
}
