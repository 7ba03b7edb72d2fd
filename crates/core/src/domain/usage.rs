use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::template::{TemplateId, UserId};

/// A UTC calendar month, the granularity at which usage counters reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsagePeriod {
    pub year: i32,
    pub month: u32,
}

impl UsagePeriod {
    pub fn current() -> Self {
        Self::from_timestamp(Utc::now())
    }

    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self { year: at.year(), month: at.month() }
    }

    /// Stable storage key, e.g. `2026-08`.
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub user_id: UserId,
    pub template_id: TemplateId,
    pub period: UsagePeriod,
    pub call_count: u32,
}
