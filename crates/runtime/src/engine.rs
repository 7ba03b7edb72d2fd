//! Dispatch engine: the single entry point that takes an inbound chat
//! from admission through provider dispatch to persistence. One call is
//! strictly sequential; concurrency happens across calls. The audit
//! append and the quota debit commit from a spawned task, out of reach
//! of caller cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use agora_core::compose;
use agora_core::domain::customization::Customization;
use agora_core::domain::turn::{ConversationId, ConversationTurn};
use agora_core::errors::DispatchError;
use agora_core::keys;

use agora_db::repositories::{
    ConversationLogRepository, CustomizationRepository, RepositoryError, TemplateRepository,
};

use crate::adapter::{AdapterRegistry, AdapterReply, ReplyCategory};
use crate::breaker::RateLimitBreaker;
use crate::gate::QuotaGate;

#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    /// Exactly one of `customization_id` and `api_key` must be set.
    pub customization_id: Option<String>,
    pub api_key: Option<String>,
    pub message: String,
    /// Absent id starts a fresh conversation with empty history.
    pub conversation_id: Option<String>,
    pub context: BTreeMap<String, String>,
    /// May only tighten the tier's per-call timeout.
    pub deadline: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct ChatReply {
    pub reply: String,
    pub conversation_id: String,
    pub model_used: String,
    pub latency: Duration,
    pub tokens: u32,
    pub tokens_estimated: bool,
}

pub struct DispatchEngine {
    templates: Arc<dyn TemplateRepository>,
    customizations: Arc<dyn CustomizationRepository>,
    log: Arc<dyn ConversationLogRepository>,
    gate: Arc<QuotaGate>,
    breaker: RateLimitBreaker,
    registry: AdapterRegistry,
    history_tail_limit: usize,
}

impl DispatchEngine {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        customizations: Arc<dyn CustomizationRepository>,
        log: Arc<dyn ConversationLogRepository>,
        gate: QuotaGate,
        breaker: RateLimitBreaker,
        registry: AdapterRegistry,
        history_tail_limit: usize,
    ) -> Self {
        Self {
            templates,
            customizations,
            log,
            gate: Arc::new(gate),
            breaker,
            registry,
            history_tail_limit,
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, DispatchError> {
        if request.message.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("message must not be empty".to_string()));
        }

        let customization = self.resolve_customization(&request).await?;
        // Archived and deactivated templates keep serving existing
        // customizations against their frozen instruction text.
        let template = self
            .templates
            .find_by_id(&customization.template_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                warn!(
                    event_name = "dangling_template",
                    customization_id = %customization.id.0,
                    template_id = %customization.template_id.0,
                );
                DispatchError::Internal
            })?;

        let ticket = self
            .gate
            .admit(&customization.user_id, &template.id, template.tier, request.deadline)
            .await?;

        self.breaker.check(&customization.model)?;
        let adapter = self
            .registry
            .adapter_for(&customization.model)
            .ok_or_else(|| DispatchError::ModelUnavailable(customization.model.0.clone()))?;

        let (conversation_id, tail) = match &request.conversation_id {
            Some(id) => {
                let conversation_id = ConversationId(id.clone());
                let tail = self
                    .log
                    .tail(&customization.id, &conversation_id, self.history_tail_limit)
                    .await
                    .map_err(storage_error)?;
                (conversation_id, tail)
            }
            None => (ConversationId::generate(), Vec::new()),
        };

        let bundle = compose::compose_bounded(
            &template,
            &customization,
            &tail,
            &request.message,
            request.context.clone(),
            self.history_tail_limit,
        );

        // The outer timeout guarantees the deadline even if the adapter
        // ignores the one it was handed.
        let started = Instant::now();
        let reply = match tokio::time::timeout(
            ticket.deadline,
            adapter.generate(&customization.model, &bundle, ticket.deadline),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => AdapterReply::failure(ReplyCategory::Timeout, customization.model.clone()),
        };
        let latency = started.elapsed();

        let turn = ConversationTurn {
            id: Uuid::new_v4().to_string(),
            customization_id: customization.id.clone(),
            conversation_id: conversation_id.clone(),
            user_text: request.message.clone(),
            agent_text: if reply.category.is_success() {
                reply.text.clone()
            } else {
                String::new()
            },
            model_used: reply.model.clone(),
            tokens: reply.tokens,
            latency_ms: latency.as_millis() as u64,
            outcome: reply.category.as_outcome(),
            created_at: chrono::Utc::now(),
        };
        // The audit append and the quota debit run on a spawned task: a
        // caller that disconnects drops this future, and dropping it must
        // not land one of the two writes without the other.
        let success = reply.category.is_success();
        let persisted = {
            let log = Arc::clone(&self.log);
            let gate = Arc::clone(&self.gate);
            let user_id = customization.user_id.clone();
            let template_id = template.id.clone();
            tokio::spawn(async move {
                log.append(turn).await.map_err(storage_error)?;
                if success {
                    gate.debit(&user_id, &template_id).await?;
                }
                Ok::<(), DispatchError>(())
            })
        };
        match persisted.await {
            Ok(outcome) => outcome?,
            Err(join_error) => {
                warn!(event_name = "engine_persist_panicked", error = %join_error);
                return Err(DispatchError::Internal);
            }
        }

        if success {
            info!(
                event_name = "chat_completed",
                customization_id = %customization.id.0,
                conversation_id = %conversation_id.0,
                model = %reply.model.0,
                latency_ms = latency.as_millis() as u64,
                tokens = reply.tokens,
            );
            Ok(ChatReply {
                reply: reply.text,
                conversation_id: conversation_id.0,
                model_used: reply.model.0,
                latency,
                tokens: reply.tokens,
                tokens_estimated: reply.tokens_estimated,
            })
        } else {
            if reply.category == ReplyCategory::RateLimited {
                self.breaker.record_rate_limited(&customization.model);
            }
            info!(
                event_name = "chat_failed",
                customization_id = %customization.id.0,
                conversation_id = %conversation_id.0,
                model = %reply.model.0,
                outcome = reply.category.as_outcome().as_str(),
                latency_ms = latency.as_millis() as u64,
            );
            Err(match reply.category {
                ReplyCategory::RateLimited => DispatchError::UpstreamRateLimited,
                ReplyCategory::Timeout => DispatchError::UpstreamTimeout,
                _ => DispatchError::UpstreamError,
            })
        }
    }

    async fn resolve_customization(
        &self,
        request: &ChatRequest,
    ) -> Result<Customization, DispatchError> {
        match (&request.customization_id, &request.api_key) {
            (Some(id), _) => self
                .customizations
                .find_by_id(&agora_core::domain::customization::CustomizationId(id.clone()))
                .await
                .map_err(storage_error)?
                .ok_or(DispatchError::CustomizationNotFound),
            (None, Some(raw_key)) => self
                .customizations
                .find_by_key_digest(&keys::digest_key(raw_key))
                .await
                .map_err(storage_error)?
                .ok_or(DispatchError::CustomizationNotFound),
            (None, None) => Err(DispatchError::InvalidRequest(
                "customization_id or api_key is required".to_string(),
            )),
        }
    }
}

fn storage_error(error: RepositoryError) -> DispatchError {
    warn!(event_name = "engine_storage_error", error = %error, "storage error");
    DispatchError::Internal
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::Utc;

    use agora_core::compose::PromptBundle;
    use agora_core::config::BreakerConfig;
    use agora_core::domain::customization::{Customization, CustomizationId};
    use agora_core::domain::overrides::OverrideSet;
    use agora_core::domain::template::{
        AgentTemplate, ApprovalState, ModelId, TemplateId, TemplateTier, UserId,
    };
    use agora_core::domain::turn::{ConversationId, ConversationTurn, TurnOutcome};
    use agora_core::domain::usage::UsagePeriod;
    use agora_core::errors::DispatchError;
    use agora_core::policy::{PolicyTable, TierPolicy};

    use agora_db::repositories::{
        ConversationLogRepository, CustomizationRepository, InMemoryConversationLogRepository,
        InMemoryCustomizationRepository, InMemoryTemplateRepository,
        InMemoryUsageCounterRepository, RepositoryError, TemplateRepository,
        UsageCounterRepository,
    };

    use crate::adapter::{AdapterRegistry, AdapterReply, ModelAdapter, ReplyCategory};
    use crate::breaker::RateLimitBreaker;
    use crate::gate::{QuotaGate, StaticCallerDirectory};

    use super::{ChatRequest, DispatchEngine};

    const MODEL: &str = "gpt-4o-mini";

    /// Replays a queue of reply categories; repeats `Ok` once exhausted.
    struct ScriptedAdapter {
        script: Mutex<VecDeque<ReplyCategory>>,
        last_bundle: Mutex<Option<PromptBundle>>,
    }

    impl ScriptedAdapter {
        fn new(script: impl IntoIterator<Item = ReplyCategory>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                last_bundle: Mutex::new(None),
            }
        }

        fn last_bundle(&self) -> Option<PromptBundle> {
            self.last_bundle.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ModelAdapter for ScriptedAdapter {
        fn supported_models(&self) -> Vec<ModelId> {
            vec![ModelId(MODEL.to_string())]
        }

        async fn generate(
            &self,
            model: &ModelId,
            bundle: &PromptBundle,
            _deadline: Duration,
        ) -> AdapterReply {
            *self.last_bundle.lock().unwrap() = Some(bundle.clone());
            let category =
                self.script.lock().unwrap().pop_front().unwrap_or(ReplyCategory::Ok);
            match category {
                ReplyCategory::Ok => AdapterReply {
                    text: "scripted answer".to_string(),
                    model: model.clone(),
                    tokens: 20,
                    tokens_estimated: false,
                    category,
                },
                other => AdapterReply::failure(other, model.clone()),
            }
        }
    }

    /// Ignores the deadline entirely; the engine must cut it off.
    struct StuckAdapter;

    #[async_trait::async_trait]
    impl ModelAdapter for StuckAdapter {
        fn supported_models(&self) -> Vec<ModelId> {
            vec![ModelId(MODEL.to_string())]
        }

        async fn generate(
            &self,
            model: &ModelId,
            _bundle: &PromptBundle,
            _deadline: Duration,
        ) -> AdapterReply {
            tokio::time::sleep(Duration::from_secs(10)).await;
            AdapterReply {
                text: "too late".to_string(),
                model: model.clone(),
                tokens: 5,
                tokens_estimated: false,
                category: ReplyCategory::Ok,
            }
        }
    }

    /// Holds `append` open until released, so a test can drop the caller
    /// while persistence is still in flight.
    #[derive(Default)]
    struct HeldLogRepository {
        inner: InMemoryConversationLogRepository,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ConversationLogRepository for HeldLogRepository {
        async fn append(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
            self.release.notified().await;
            self.inner.append(turn).await
        }

        async fn tail(
            &self,
            customization_id: &CustomizationId,
            conversation_id: &ConversationId,
            max_n: usize,
        ) -> Result<Vec<ConversationTurn>, RepositoryError> {
            self.inner.tail(customization_id, conversation_id, max_n).await
        }

        async fn history(
            &self,
            customization_id: &CustomizationId,
            limit: usize,
        ) -> Result<Vec<ConversationTurn>, RepositoryError> {
            self.inner.history(customization_id, limit).await
        }
    }

    struct Harness {
        engine: DispatchEngine,
        templates: Arc<InMemoryTemplateRepository>,
        customizations: Arc<InMemoryCustomizationRepository>,
        log: Arc<InMemoryConversationLogRepository>,
        counters: Arc<InMemoryUsageCounterRepository>,
    }

    async fn harness(adapter: Arc<dyn ModelAdapter>) -> Harness {
        let templates = Arc::new(InMemoryTemplateRepository::default());
        templates
            .save(AgentTemplate {
                id: TemplateId("tpl-1".to_string()),
                name: "Agent".to_string(),
                category: "general".to_string(),
                description: String::new(),
                base_instruction: "You are X.".to_string(),
                default_model: ModelId(MODEL.to_string()),
                permitted_models: vec![ModelId(MODEL.to_string())],
                base_price_cents: 0,
                recurring_price_cents: 0,
                tier: TemplateTier::Essential,
                active: true,
                approval: ApprovalState::Approved,
                created_at: Utc::now(),
            })
            .await
            .expect("template");

        let customizations = Arc::new(InMemoryCustomizationRepository::default());
        customizations
            .save(Customization {
                id: CustomizationId("cst-1".to_string()),
                user_id: UserId("u-1".to_string()),
                template_id: TemplateId("tpl-1".to_string()),
                display_name: None,
                instruction_override: None,
                model: ModelId(MODEL.to_string()),
                overrides: OverrideSet::default(),
                api_key_digest: agora_core::keys::digest_key("ak_test"),
                created_at: Utc::now(),
            })
            .await
            .expect("customization");

        let counters = Arc::new(InMemoryUsageCounterRepository::default());
        let tier =
            TierPolicy { per_call_timeout_secs: 2, monthly_cap_free: 3, monthly_cap_paid: 50 };
        let gate = QuotaGate::new(
            Arc::new(StaticCallerDirectory::new(std::iter::empty::<String>())),
            counters.clone(),
            PolicyTable { essential: tier, professional: tier, premium: tier, elite: tier },
        );
        let breaker = RateLimitBreaker::new(&BreakerConfig {
            rate_limit_threshold: 2,
            window_secs: 60,
            cooloff_secs: 120,
        });
        let mut registry = AdapterRegistry::new();
        registry.register(adapter);

        let log = Arc::new(InMemoryConversationLogRepository::default());
        let engine = DispatchEngine::new(
            templates.clone(),
            customizations.clone(),
            log.clone(),
            gate,
            breaker,
            registry,
            10,
        );
        Harness { engine, templates, customizations, log, counters }
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            customization_id: Some("cst-1".to_string()),
            message: message.to_string(),
            ..ChatRequest::default()
        }
    }

    async fn used(harness: &Harness) -> u32 {
        harness
            .counters
            .current(
                &UserId("u-1".to_string()),
                &TemplateId("tpl-1".to_string()),
                agora_core::domain::usage::UsagePeriod::current(),
            )
            .await
            .expect("counter")
    }

    #[tokio::test]
    async fn quota_cap_admits_exactly_cap_successes() {
        let harness = harness(Arc::new(ScriptedAdapter::new([]))).await;

        for _ in 0..3 {
            harness.engine.chat(request("hi")).await.expect("under cap");
        }
        let denied = harness.engine.chat(request("hi")).await;
        assert_eq!(denied.unwrap_err(), DispatchError::QuotaExceeded { remaining: 0 });

        assert_eq!(used(&harness).await, 3);
        assert_eq!(harness.log.len().await, 3);
    }

    #[tokio::test]
    async fn failed_calls_audit_but_do_not_debit() {
        let adapter = Arc::new(ScriptedAdapter::new([ReplyCategory::UpstreamError]));
        let harness = harness(adapter).await;

        let failed = harness.engine.chat(request("hi")).await;
        assert_eq!(failed.unwrap_err(), DispatchError::UpstreamError);
        assert_eq!(used(&harness).await, 0);

        let history =
            harness.log.history(&CustomizationId("cst-1".to_string()), 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, TurnOutcome::UpstreamError);
        assert!(history[0].agent_text.is_empty());

        // The next call succeeds and is debited normally.
        harness.engine.chat(request("hi")).await.expect("ok");
        assert_eq!(used(&harness).await, 1);
    }

    #[tokio::test]
    async fn dropped_caller_still_commits_turn_and_debit_together() {
        let harness = harness(Arc::new(ScriptedAdapter::new([]))).await;
        let held = Arc::new(HeldLogRepository::default());
        let counters = Arc::new(InMemoryUsageCounterRepository::default());
        let tier =
            TierPolicy { per_call_timeout_secs: 2, monthly_cap_free: 3, monthly_cap_paid: 50 };
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(ScriptedAdapter::new([])));
        let engine = DispatchEngine::new(
            harness.templates.clone(),
            harness.customizations.clone(),
            held.clone(),
            QuotaGate::new(
                Arc::new(StaticCallerDirectory::new(std::iter::empty::<String>())),
                counters.clone(),
                PolicyTable { essential: tier, professional: tier, premium: tier, elite: tier },
            ),
            RateLimitBreaker::new(&BreakerConfig {
                rate_limit_threshold: 5,
                window_secs: 60,
                cooloff_secs: 120,
            }),
            registry,
            10,
        );

        // Drop the request future while the audit append is still held
        // open, the way a disconnecting client drops its handler.
        {
            let call = engine.chat(request("hi"));
            tokio::select! {
                _ = call => panic!("append is held open; the call cannot have finished"),
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }

        held.release.notify_one();
        let user = UserId("u-1".to_string());
        let template = TemplateId("tpl-1".to_string());
        for _ in 0..200 {
            let turns = held.inner.len().await;
            let count = counters
                .current(&user, &template, UsagePeriod::current())
                .await
                .expect("counter");
            if turns == 1 && count == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("the audit row and the debit never both landed");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_off_a_stuck_adapter() {
        let harness = harness(Arc::new(StuckAdapter)).await;

        let result = harness.engine.chat(request("hi")).await;
        assert_eq!(result.unwrap_err(), DispatchError::UpstreamTimeout);
        assert_eq!(used(&harness).await, 0);

        let history =
            harness.log.history(&CustomizationId("cst-1".to_string()), 10).await.expect("history");
        assert_eq!(history[0].outcome, TurnOutcome::Timeout);
        assert!(history[0].agent_text.is_empty());
    }

    #[tokio::test]
    async fn missing_conversation_id_mints_a_fresh_one_each_call() {
        let harness = harness(Arc::new(ScriptedAdapter::new([]))).await;

        let first = harness.engine.chat(request("hi")).await.expect("first");
        let second = harness.engine.chat(request("hi")).await.expect("second");
        assert_ne!(first.conversation_id, second.conversation_id);
    }

    #[tokio::test]
    async fn supplied_conversation_id_threads_history_into_the_prompt() {
        let adapter = Arc::new(ScriptedAdapter::new([]));
        let harness = harness(adapter.clone()).await;

        let mut chat = request("first message");
        chat.conversation_id = Some("conv-1".to_string());
        harness.engine.chat(chat.clone()).await.expect("first");

        chat.message = "second message".to_string();
        harness.engine.chat(chat).await.expect("second");

        let bundle = adapter.last_bundle().expect("bundle");
        assert_eq!(bundle.history.len(), 1);
        assert_eq!(bundle.history[0].user, "first message");
        assert_eq!(bundle.history[0].agent, "scripted answer");
    }

    #[tokio::test]
    async fn api_key_resolves_the_same_customization() {
        let harness = harness(Arc::new(ScriptedAdapter::new([]))).await;

        let reply = harness
            .engine
            .chat(ChatRequest {
                api_key: Some("ak_test".to_string()),
                message: "hi".to_string(),
                ..ChatRequest::default()
            })
            .await
            .expect("key resolves");
        assert_eq!(reply.model_used, MODEL);

        let miss = harness
            .engine
            .chat(ChatRequest {
                api_key: Some("ak_wrong".to_string()),
                message: "hi".to_string(),
                ..ChatRequest::default()
            })
            .await;
        assert_eq!(miss.unwrap_err(), DispatchError::CustomizationNotFound);
    }

    #[tokio::test]
    async fn archived_template_keeps_serving_existing_customizations() {
        let harness = harness(Arc::new(ScriptedAdapter::new([]))).await;
        harness.templates.archive(&TemplateId("tpl-1".to_string())).await.expect("archive");

        harness.engine.chat(request("hi")).await.expect("archival never cuts service");
    }

    #[tokio::test]
    async fn repeated_rate_limits_trip_the_breaker() {
        let adapter = Arc::new(ScriptedAdapter::new([
            ReplyCategory::RateLimited,
            ReplyCategory::RateLimited,
        ]));
        let harness = harness(adapter).await;

        for _ in 0..2 {
            let result = harness.engine.chat(request("hi")).await;
            assert_eq!(result.unwrap_err(), DispatchError::UpstreamRateLimited);
        }

        // Threshold reached: short-circuited before the adapter, no audit row.
        let rows_before = harness.log.len().await;
        let result = harness.engine.chat(request("hi")).await;
        assert_eq!(result.unwrap_err(), DispatchError::ModelUnavailable(MODEL.to_string()));
        assert_eq!(harness.log.len().await, rows_before);
    }

    #[tokio::test]
    async fn blank_message_is_rejected_before_any_work() {
        let harness = harness(Arc::new(ScriptedAdapter::new([]))).await;
        let result = harness.engine.chat(request("   ")).await;
        assert!(matches!(result.unwrap_err(), DispatchError::InvalidRequest(_)));
        assert!(harness.log.is_empty().await);
    }

    #[tokio::test]
    async fn unregistered_model_is_unavailable() {
        let harness = harness(Arc::new(ScriptedAdapter::new([]))).await;

        // A customization pointing at a model nobody serves.
        let customizations = Arc::new(InMemoryCustomizationRepository::default());
        customizations
            .save(Customization {
                id: CustomizationId("cst-orphan".to_string()),
                user_id: UserId("u-1".to_string()),
                template_id: TemplateId("tpl-1".to_string()),
                display_name: None,
                instruction_override: None,
                model: ModelId("unserved-model".to_string()),
                overrides: OverrideSet::default(),
                api_key_digest: "d".to_string(),
                created_at: Utc::now(),
            })
            .await
            .expect("save");
        let counters = Arc::new(InMemoryUsageCounterRepository::default());
        let tier =
            TierPolicy { per_call_timeout_secs: 2, monthly_cap_free: 3, monthly_cap_paid: 50 };
        let engine = DispatchEngine::new(
            harness.templates.clone(),
            customizations,
            Arc::new(InMemoryConversationLogRepository::default()),
            QuotaGate::new(
                Arc::new(StaticCallerDirectory::new(std::iter::empty::<String>())),
                counters,
                PolicyTable { essential: tier, professional: tier, premium: tier, elite: tier },
            ),
            RateLimitBreaker::new(&BreakerConfig {
                rate_limit_threshold: 5,
                window_secs: 60,
                cooloff_secs: 120,
            }),
            AdapterRegistry::new(),
            10,
        );

        let result = engine
            .chat(ChatRequest {
                customization_id: Some("cst-orphan".to_string()),
                message: "hi".to_string(),
                ..ChatRequest::default()
            })
            .await;
        assert_eq!(
            result.unwrap_err(),
            DispatchError::ModelUnavailable("unserved-model".to_string())
        );
    }
}
