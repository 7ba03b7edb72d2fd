//! Concrete provider adapters. Provider request and response shapes are
//! confined to this module; everything above speaks [`PromptBundle`] and
//! [`AdapterReply`].

use agora_core::compose::PromptBundle;

use crate::adapter::ReplyCategory;

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

/// System + alternating user/assistant turns + the new user message, the
/// shape shared by chat-completions style APIs.
fn chat_messages(bundle: &PromptBundle) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(2 + bundle.history.len() * 2);
    messages.push(serde_json::json!({ "role": "system", "content": bundle.system }));
    for turn in &bundle.history {
        messages.push(serde_json::json!({ "role": "user", "content": turn.user }));
        messages.push(serde_json::json!({ "role": "assistant", "content": turn.agent }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": bundle.user_message }));
    messages
}

/// Dialogue turns without the system block, for APIs that take the system
/// prompt as a separate field.
fn dialogue_messages(bundle: &PromptBundle) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(1 + bundle.history.len() * 2);
    for turn in &bundle.history {
        messages.push(serde_json::json!({ "role": "user", "content": turn.user }));
        messages.push(serde_json::json!({ "role": "assistant", "content": turn.agent }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": bundle.user_message }));
    messages
}

fn classify_send_error(error: &reqwest::Error) -> ReplyCategory {
    if error.is_timeout() {
        ReplyCategory::Timeout
    } else {
        ReplyCategory::UpstreamError
    }
}

fn classify_status(status: reqwest::StatusCode) -> ReplyCategory {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ReplyCategory::RateLimited
    } else {
        ReplyCategory::UpstreamError
    }
}
