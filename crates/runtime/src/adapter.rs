//! Provider-agnostic adapter seam. Adapters translate a [`PromptBundle`]
//! into one provider call and always come back with an [`AdapterReply`];
//! provider errors are folded into a coarse category and never propagate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agora_core::compose::PromptBundle;
use agora_core::domain::template::ModelId;
use agora_core::domain::turn::TurnOutcome;

/// Stand-in text for a reply the provider returned with no content.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "The model returned no content.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyCategory {
    Ok,
    Empty,
    RateLimited,
    UpstreamError,
    Timeout,
}

impl ReplyCategory {
    /// Empty replies count as delivered: they are logged and debited like
    /// any other answer.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Empty)
    }

    pub fn as_outcome(self) -> TurnOutcome {
        match self {
            Self::Ok => TurnOutcome::Ok,
            Self::Empty => TurnOutcome::Empty,
            Self::RateLimited => TurnOutcome::RateLimited,
            Self::UpstreamError => TurnOutcome::UpstreamError,
            Self::Timeout => TurnOutcome::Timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdapterReply {
    pub text: String,
    pub model: ModelId,
    /// Input + output tokens when the provider reports them, otherwise an
    /// estimate (flagged below).
    pub tokens: u32,
    pub tokens_estimated: bool,
    pub category: ReplyCategory,
}

impl AdapterReply {
    pub fn failure(category: ReplyCategory, model: ModelId) -> Self {
        Self { text: String::new(), model, tokens: 0, tokens_estimated: true, category }
    }

    /// Normalizes a provider answer: blank text becomes `Empty` with the
    /// placeholder, a missing token count becomes a length-based estimate.
    pub fn from_text(
        text: String,
        model: ModelId,
        reported_tokens: Option<u32>,
        bundle: &PromptBundle,
    ) -> Self {
        let trimmed_empty = text.trim().is_empty();
        let (text, category) = if trimmed_empty {
            (EMPTY_REPLY_PLACEHOLDER.to_string(), ReplyCategory::Empty)
        } else {
            (text, ReplyCategory::Ok)
        };
        let (tokens, tokens_estimated) = match reported_tokens {
            Some(tokens) => (tokens, false),
            None => (estimate_tokens(bundle, &text), true),
        };
        Self { text, model, tokens, tokens_estimated, category }
    }
}

/// Rough token estimate (four characters per token) over the full prompt
/// and the reply, used when the provider reports no usage.
pub fn estimate_tokens(bundle: &PromptBundle, reply_text: &str) -> u32 {
    let prompt_chars = bundle.system.len()
        + bundle.user_message.len()
        + bundle.history.iter().map(|t| t.user.len() + t.agent.len()).sum::<usize>();
    ((prompt_chars + reply_text.len()) / 4).max(1) as u32
}

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn supported_models(&self) -> Vec<ModelId>;

    /// One provider call. Must come back within `deadline` with
    /// `category = timeout` rather than block past it; the engine
    /// additionally enforces the deadline from outside.
    async fn generate(
        &self,
        model: &ModelId,
        bundle: &PromptBundle,
        deadline: Duration,
    ) -> AdapterReply;
}

/// Model-id to adapter map, built once at startup from the configured
/// credentials and immutable afterwards.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ModelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ModelAdapter>) {
        for model in adapter.supported_models() {
            self.adapters.insert(model.0, Arc::clone(&adapter));
        }
    }

    pub fn adapter_for(&self, model: &ModelId) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(&model.0).cloned()
    }

    pub fn models(&self) -> Vec<ModelId> {
        let mut models: Vec<ModelId> =
            self.adapters.keys().map(|m| ModelId(m.clone())).collect();
        models.sort_by(|a, b| a.0.cmp(&b.0));
        models
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
