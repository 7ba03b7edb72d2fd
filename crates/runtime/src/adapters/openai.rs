//! OpenAI chat-completions adapter (non-streaming).

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::warn;

use agora_core::compose::PromptBundle;
use agora_core::domain::template::ModelId;

use crate::adapter::{AdapterReply, ModelAdapter, ReplyCategory};

use super::{chat_messages, classify_send_error, classify_status};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiAdapter {
    base_url: String,
    api_key: SecretString,
    models: Vec<ModelId>,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(api_key: SecretString, base_url: Option<String>, models: Vec<ModelId>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            models,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl ModelAdapter for OpenAiAdapter {
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
            "messages": chat_messages(bundle),
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .timeout(deadline)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                let category = classify_send_error(&error);
                warn!(event_name = "openai_send_failed", model = %model.0, error = %error);
                return AdapterReply::failure(category, model.clone());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(event_name = "openai_http_error", model = %model.0, status = %status);
            return AdapterReply::failure(classify_status(status), model.clone());
        }

        let parsed: ChatCompletionResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(event_name = "openai_decode_failed", model = %model.0, error = %error);
                return AdapterReply::failure(ReplyCategory::UpstreamError, model.clone());
            }
        };

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let tokens = parsed.usage.map(|usage| usage.total_tokens).filter(|t| *t > 0);

        AdapterReply::from_text(text, model.clone(), tokens, bundle)
    }
}
