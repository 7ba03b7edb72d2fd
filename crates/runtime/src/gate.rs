//! Quota and entitlement gate. Admission checks the caller's plan, the
//! template's tier gate, and the monthly counter; the debit happens only
//! after a successful reply, so failed calls never consume quota.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use agora_core::domain::template::{TemplateId, TemplateTier, UserId};
use agora_core::domain::usage::UsagePeriod;
use agora_core::errors::DispatchError;
use agora_core::policy::{CallerPlan, PolicyTable, TierPolicy};

use agora_db::repositories::UsageCounterRepository;

/// External identity collaborator: resolves a user to a billing plan.
#[async_trait]
pub trait CallerDirectory: Send + Sync {
    async fn plan_for(&self, user: &UserId) -> CallerPlan;
}

/// Plan resolution from a configured allow-list of paid users. Stands in
/// for a real identity service in development and tests.
pub struct StaticCallerDirectory {
    paid_users: HashSet<String>,
}

impl StaticCallerDirectory {
    pub fn new(paid_users: impl IntoIterator<Item = String>) -> Self {
        Self { paid_users: paid_users.into_iter().collect() }
    }
}

#[async_trait]
impl CallerDirectory for StaticCallerDirectory {
    async fn plan_for(&self, user: &UserId) -> CallerPlan {
        if self.paid_users.contains(&user.0) {
            CallerPlan::Paid
        } else {
            CallerPlan::Free
        }
    }
}

/// Admission token. `deadline` is authoritative for the whole call;
/// `remaining` counts this call.
#[derive(Clone, Copy, Debug)]
pub struct GateTicket {
    pub plan: CallerPlan,
    pub deadline: Duration,
    pub remaining: u32,
}

pub struct QuotaGate {
    directory: Arc<dyn CallerDirectory>,
    counters: Arc<dyn UsageCounterRepository>,
    policies: PolicyTable,
}

impl QuotaGate {
    pub fn new(
        directory: Arc<dyn CallerDirectory>,
        counters: Arc<dyn UsageCounterRepository>,
        policies: PolicyTable,
    ) -> Self {
        Self { directory, counters, policies }
    }

    pub fn policy_for(&self, tier: TemplateTier) -> TierPolicy {
        self.policies.for_tier(tier)
    }

    pub async fn admit(
        &self,
        user: &UserId,
        template_id: &TemplateId,
        tier: TemplateTier,
        caller_deadline: Option<Duration>,
    ) -> Result<GateTicket, DispatchError> {
        let plan = self.directory.plan_for(user).await;
        if tier.requires_paid_plan() && plan == CallerPlan::Free {
            return Err(DispatchError::AuthorizationDenied);
        }

        let policy = self.policies.for_tier(tier);
        let cap = policy.monthly_cap(plan);
        let used = self
            .counters
            .current(user, template_id, UsagePeriod::current())
            .await
            .map_err(storage_error)?;
        if used >= cap {
            return Err(DispatchError::QuotaExceeded { remaining: 0 });
        }

        Ok(GateTicket {
            plan,
            deadline: policy.effective_deadline(caller_deadline),
            remaining: cap - used,
        })
    }

    /// Post-success debit; the sole counter mutation in the system.
    pub async fn debit(
        &self,
        user: &UserId,
        template_id: &TemplateId,
    ) -> Result<u32, DispatchError> {
        self.counters
            .increment(user, template_id, UsagePeriod::current())
            .await
            .map_err(storage_error)
    }
}

fn storage_error(error: agora_db::repositories::RepositoryError) -> DispatchError {
    warn!(event_name = "gate_storage_error", error = %error, "counter storage error");
    DispatchError::Internal
}
