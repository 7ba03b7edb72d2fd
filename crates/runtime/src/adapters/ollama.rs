//! Ollama adapter for locally hosted models. No credentials; token counts
//! come from `prompt_eval_count`/`eval_count` when the daemon reports them.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use agora_core::compose::PromptBundle;
use agora_core::domain::template::ModelId;

use crate::adapter::{AdapterReply, ModelAdapter, ReplyCategory};

use super::{chat_messages, classify_send_error, classify_status};

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter {
    base_url: String,
    models: Vec<ModelId>,
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(base_url: Option<String>, models: Vec<ModelId>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            models,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ModelAdapter for OllamaAdapter {
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
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(deadline)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                let category = classify_send_error(&error);
                warn!(event_name = "ollama_send_failed", model = %model.0, error = %error);
                return AdapterReply::failure(category, model.clone());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(event_name = "ollama_http_error", model = %model.0, status = %status);
            return AdapterReply::failure(classify_status(status), model.clone());
        }

        let parsed: ChatResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(event_name = "ollama_decode_failed", model = %model.0, error = %error);
                return AdapterReply::failure(ReplyCategory::UpstreamError, model.clone());
            }
        };

        let text = parsed.message.map(|message| message.content).unwrap_or_default();
        let tokens = match (parsed.prompt_eval_count, parsed.eval_count) {
            (None, None) => None,
            (prompt, eval) => Some(prompt.unwrap_or(0) + eval.unwrap_or(0)),
        }
        .filter(|t| *t > 0);

        AdapterReply::from_text(text, model.clone(), tokens, bundle)
    }
}
