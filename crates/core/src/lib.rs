//! Domain core for the agora agent marketplace.
//!
//! Everything here is deterministic and storage-free: catalog entities and
//! their invariants, the closed override enumerations, the dispatch error
//! taxonomy, prompt composition, API-key material, tier policy, and
//! configuration loading. Persistence lives in `agora-db`; provider
//! dispatch lives in `agora-runtime`.

pub mod compose;
pub mod config;
pub mod domain;
pub mod errors;
pub mod keys;
pub mod policy;

pub use compose::{compose, compose_bounded, PromptBundle, PromptTurn, HISTORY_TAIL_LIMIT};
pub use domain::customization::{Customization, CustomizationId};
pub use domain::overrides::{
    ExpertiseFocus, InteractionMode, InvalidOverride, Language, OverrideSet, ResponseStyle,
};
pub use domain::revenue::{RevenueKind, RevenueRecord};
pub use domain::template::{
    AgentTemplate, ApprovalState, ModelId, TemplateId, TemplateTier, UserId,
};
pub use domain::turn::{ConversationId, ConversationTurn, TurnOutcome};
pub use domain::usage::{UsageCounter, UsagePeriod};
pub use errors::DispatchError;
pub use keys::{digest_key, issue_key, IssuedKey};
pub use policy::{CallerPlan, PolicyTable, TierPolicy};
