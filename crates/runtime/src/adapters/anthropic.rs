//! Anthropic messages adapter (non-streaming). The system block travels
//! in the top-level `system` field rather than as a message.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::warn;

use agora_core::compose::PromptBundle;
use agora_core::domain::template::ModelId;

use crate::adapter::{AdapterReply, ModelAdapter, ReplyCategory};

use super::{classify_send_error, classify_status, dialogue_messages};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_REPLY_TOKENS: u32 = 4_096;

pub struct AnthropicAdapter {
    base_url: String,
    api_key: SecretString,
    models: Vec<ModelId>,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(api_key: SecretString, base_url: Option<String>, models: Vec<ModelId>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            models,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl ModelAdapter for AnthropicAdapter {
    fn supported_models(&self) -> Vec<ModelId> {
        self.models.clone()
    }

    async fn generate(
        &self,
        model: &ModelId,
        bundle: &PromptBundle,
        deadline: Duration,
    ) -> AdapterReply {
        let body = serde_json::json!({
            "model": model.0,
            "max_tokens": MAX_REPLY_TOKENS,
            "system": bundle.system,
            "messages": dialogue_messages(bundle),
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(deadline)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                let category = classify_send_error(&error);
                warn!(event_name = "anthropic_send_failed", model = %model.0, error = %error);
                return AdapterReply::failure(category, model.clone());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(event_name = "anthropic_http_error", model = %model.0, status = %status);
            return AdapterReply::failure(classify_status(status), model.clone());
        }

        let parsed: MessagesResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(event_name = "anthropic_decode_failed", model = %model.0, error = %error);
                return AdapterReply::failure(ReplyCategory::UpstreamError, model.clone());
            }
        };

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let tokens = parsed
            .usage
            .map(|usage| usage.input_tokens + usage.output_tokens)
            .filter(|t| *t > 0);

        AdapterReply::from_text(text, model.clone(), tokens, bundle)
    }
}
