//! Ollama provider over the native `/api/chat` endpoint.
//!
//! Models are addressed as `ollama:<name>`; the prefix is removed before the
//! name is sent. Only text content is forwarded.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{LLMError, check_response};
use super::provider::{LLMProvider, Provider, unsupported_model};
use super::retry::RetryPolicy;
use crate::config::AdapterConfig;
use crate::conversation::{Content, Conversation, Role};

/// Ollama provider. Talks to a local daemon without credentials.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    wire_model: String,
    config: AdapterConfig,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub const PREFIX: &'static str = "ollama:";

    /// Any `ollama:<tag>` with a non-empty tag.
    pub fn is_model_supported(model: &str) -> bool {
        model
            .strip_prefix(Self::PREFIX)
            .is_some_and(|rest| !rest.is_empty())
    }

    pub fn new(config: AdapterConfig, base_url: String) -> Result<Self, LLMError> {
        let Some(wire_model) = config
            .model_name()
            .strip_prefix(Self::PREFIX)
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
        else {
            return Err(unsupported_model(Provider::Ollama, config.model_name()));
        };
        let retry = RetryPolicy::new(config.max_retry_attempts(), config.retry_delay());
        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            wire_model,
            config,
            retry,
        })
    }

    async fn call_api(&self, request: &ChatRequest<'_>) -> Result<String, LLMError> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self.client.post(&url).json(request).send().await?;
        let response = check_response(response).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;
        Ok(body.message.content)
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model_name(&self) -> &str {
        self.config.model_name()
    }

    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError> {
        let request = ChatRequest {
            model: &self.wire_model,
            messages: to_ollama_messages(conversation),
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature(),
                seed: self.config.seed(),
                num_predict: self.config.max_output_tokens(),
            },
        };

        debug!(model = %self.wire_model, entries = request.messages.len(), "Sending Ollama chat");
        self.retry.execute(|| self.call_api(&request)).await
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, PartialEq, Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    seed: u64,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

fn to_ollama_messages(conversation: &Conversation) -> Vec<ChatMessage<'_>> {
    conversation
        .messages()
        .iter()
        .flat_map(|message| {
            message.content().iter().filter_map(move |content| match content {
                Content::Text { text } => Some(ChatMessage {
                    role: message.role(),
                    content: text.as_str(),
                }),
                // TODO: forward images via the `images` field once vision tags are listed.
                Content::Image { .. } => None,
            })
        })
        .collect()
}
