use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::template::TemplateTier;

/// The caller's billing plan, resolved by the surrounding identity layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerPlan {
    Free,
    Paid,
}

/// Per-template-tier policy: how long one call may run and how many
/// successful calls each plan gets per calendar month.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub per_call_timeout_secs: u64,
    pub monthly_cap_free: u32,
    pub monthly_cap_paid: u32,
}

impl TierPolicy {
    pub fn monthly_cap(&self, plan: CallerPlan) -> u32 {
        match plan {
            CallerPlan::Free => self.monthly_cap_free,
            CallerPlan::Paid => self.monthly_cap_paid,
        }
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_secs)
    }

    /// The authoritative deadline: the tier timeout, tightened by any
    /// deadline the caller supplied.
    pub fn effective_deadline(&self, caller_deadline: Option<Duration>) -> Duration {
        match caller_deadline {
            Some(supplied) => supplied.min(self.per_call_timeout()),
            None => self.per_call_timeout(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub essential: TierPolicy,
    pub professional: TierPolicy,
    pub premium: TierPolicy,
    pub elite: TierPolicy,
}

impl PolicyTable {
    pub fn for_tier(&self, tier: TemplateTier) -> TierPolicy {
        match tier {
            TemplateTier::Essential => self.essential,
            TemplateTier::Professional => self.professional,
            TemplateTier::Premium => self.premium,
            TemplateTier::Elite => self.elite,
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            essential: TierPolicy {
                per_call_timeout_secs: 30,
                monthly_cap_free: 25,
                monthly_cap_paid: 500,
            },
            professional: TierPolicy {
                per_call_timeout_secs: 45,
                monthly_cap_free: 10,
                monthly_cap_paid: 1_000,
            },
            premium: TierPolicy {
                per_call_timeout_secs: 60,
                monthly_cap_free: 0,
                monthly_cap_paid: 2_000,
            },
            elite: TierPolicy {
                per_call_timeout_secs: 90,
                monthly_cap_free: 0,
                monthly_cap_paid: 5_000,
            },
        }
    }
}
