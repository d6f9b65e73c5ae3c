//! OpenAI chat-completions protocol.
//!
//! One client type, parameterized by base URL and credential, backs three
//! adapters: the OpenAI cloud, Together, and a self-hosted OpenAI-compatible
//! server (e.g. vLLM). All three send the common block format unchanged.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::blocks::{CommonMessage, to_common_blocks};
use super::error::{LLMError, check_response};
use super::provider::{LLMProvider, Provider, unsupported_model};
use super::retry::RetryPolicy;
use crate::config::AdapterConfig;
use crate::conversation::Conversation;

// ============================================================================
// Shared client
// ============================================================================

/// HTTP client for any server speaking the chat-completions protocol.
pub struct OpenAICompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one completion request and return the first choice's text.
    async fn complete(&self, request: &ChatCompletionRequest<'_>) -> Result<String, LLMError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = check_response(req.json(request).send().await?).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LLMError::InvalidResponse("response has no message content".to_string()))
    }
}

/// Which request field carries the output-token limit.
#[derive(Debug, Clone, Copy)]
enum TokenLimitField {
    MaxTokens,
    MaxCompletionTokens,
}

/// Everything one chat-completions adapter needs for a call.
struct ChatCompletions {
    client: OpenAICompatibleClient,
    config: AdapterConfig,
    retry: RetryPolicy,
    wire_model: String,
    token_limit: TokenLimitField,
}

impl ChatCompletions {
    fn new(
        client: OpenAICompatibleClient,
        config: AdapterConfig,
        wire_model: &str,
        token_limit: TokenLimitField,
    ) -> Self {
        let retry = RetryPolicy::new(config.max_retry_attempts(), config.retry_delay());
        Self {
            client,
            wire_model: wire_model.to_string(),
            config,
            retry,
            token_limit,
        }
    }

    async fn generate(&self, conversation: &Conversation) -> Result<String, LLMError> {
        let messages = to_common_blocks(conversation)?;
        let limit = Some(self.config.max_output_tokens());
        let (max_tokens, max_completion_tokens) = match self.token_limit {
            TokenLimitField::MaxTokens => (limit, None),
            TokenLimitField::MaxCompletionTokens => (None, limit),
        };
        let request = ChatCompletionRequest {
            model: &self.wire_model,
            messages: &messages,
            temperature: self.config.temperature(),
            seed: self.config.seed(),
            max_tokens,
            max_completion_tokens,
        };

        debug!(
            base_url = %self.client.base_url(),
            model = %self.wire_model,
            entries = messages.len(),
            "Sending chat completion"
        );
        self.retry.execute(|| self.client.complete(&request)).await
    }
}

// ============================================================================
// OpenAI
// ============================================================================

/// OpenAI cloud adapter.
pub struct OpenAIProvider {
    inner: ChatCompletions,
}

impl OpenAIProvider {
    pub const SUPPORTED_MODELS: &'static [&'static str] = &[
        "gpt-4",
        "gpt-4o",
        "gpt-4o-mini",
        "gpt-4o-mini-2024-07-18",
        "gpt-4o-2024-11-20",
    ];

    pub fn is_model_supported(model: &str) -> bool {
        Self::SUPPORTED_MODELS.contains(&model)
    }

    pub fn new(config: AdapterConfig, base_url: String, api_key: String) -> Result<Self, LLMError> {
        if !Self::is_model_supported(config.model_name()) {
            return Err(unsupported_model(Provider::OpenAI, config.model_name()));
        }
        let client = OpenAICompatibleClient::new(base_url, Some(api_key));
        let wire_model = config.model_name().to_string();
        Ok(Self {
            inner: ChatCompletions::new(
                client,
                config,
                &wire_model,
                TokenLimitField::MaxCompletionTokens,
            ),
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn model_name(&self) -> &str {
        self.inner.config.model_name()
    }

    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError> {
        self.inner.generate(conversation).await
    }
}

// ============================================================================
// Together
// ============================================================================

/// Together-hosted models, addressed as `together:<model>`.
pub struct TogetherProvider {
    inner: ChatCompletions,
}

impl TogetherProvider {
    pub const PREFIX: &'static str = "together:";

    pub const SUPPORTED_MODELS: &'static [&'static str] = &[
        "together:meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo",
        "together:meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
        "together:meta-llama/Meta-Llama-3.1-405B-Instruct-Turbo",
        "together:meta-llama/Llama-Vision-Free",
    ];

    pub fn is_model_supported(model: &str) -> bool {
        Self::SUPPORTED_MODELS.contains(&model)
    }

    pub fn new(config: AdapterConfig, base_url: String, api_key: String) -> Result<Self, LLMError> {
        let Some(wire_model) = config
            .model_name()
            .strip_prefix(Self::PREFIX)
            .filter(|_| Self::is_model_supported(config.model_name()))
            .map(str::to_string)
        else {
            return Err(unsupported_model(Provider::Together, config.model_name()));
        };
        let client = OpenAICompatibleClient::new(base_url, Some(api_key));
        Ok(Self {
            inner: ChatCompletions::new(client, config, &wire_model, TokenLimitField::MaxTokens),
        })
    }
}

#[async_trait]
impl LLMProvider for TogetherProvider {
    fn provider(&self) -> Provider {
        Provider::Together
    }

    fn model_name(&self) -> &str {
        self.inner.config.model_name()
    }

    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError> {
        self.inner.generate(conversation).await
    }
}

// ============================================================================
// Local OpenAI-compatible server
// ============================================================================

/// Self-hosted OpenAI-protocol server. No auth is enforced, so a placeholder
/// token is sent.
pub struct LocalServerProvider {
    inner: ChatCompletions,
}

impl LocalServerProvider {
    pub const PREFIX: &'static str = "vllm:";
    pub const PLACEHOLDER_API_KEY: &'static str = "token-abc123";

    /// Name-inference predicate: `vllm:<model>`.
    pub fn is_model_supported(model: &str) -> bool {
        model
            .strip_prefix(Self::PREFIX)
            .is_some_and(|rest| !rest.is_empty())
    }

    /// Explicit-selection predicate: any non-empty name, prefixed or not.
    pub fn accepts_model(model: &str) -> bool {
        !Self::wire_model(model).is_empty()
    }

    fn wire_model(model: &str) -> &str {
        model.strip_prefix(Self::PREFIX).unwrap_or(model)
    }

    pub fn new(config: AdapterConfig, base_url: String) -> Result<Self, LLMError> {
        if !Self::accepts_model(config.model_name()) {
            return Err(unsupported_model(Provider::LocalServer, config.model_name()));
        }
        let client =
            OpenAICompatibleClient::new(base_url, Some(Self::PLACEHOLDER_API_KEY.to_string()));
        let wire_model = Self::wire_model(config.model_name()).to_string();
        Ok(Self {
            inner: ChatCompletions::new(
                client,
                config,
                &wire_model,
                TokenLimitField::MaxCompletionTokens,
            ),
        })
    }
}

#[async_trait]
impl LLMProvider for LocalServerProvider {
    fn provider(&self) -> Provider {
        Provider::LocalServer
    }

    fn model_name(&self) -> &str {
        self.inner.config.model_name()
    }

    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError> {
        self.inner.generate(conversation).await
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(serde::Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [CommonMessage],
    temperature: f32,
    seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(serde::Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(serde::Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationOptions;
    use crate::conversation::{Content, Message, Role};
    use crate::image_codec::Image;
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(model: &str, attempts: u32) -> AdapterConfig {
        let options = GenerationOptions {
            max_output_tokens: 256,
            temperature: 0.2,
            seed: 7,
            max_retry_attempts: attempts,
            retry_delay_seconds: 0.0,
            ..Default::default()
        };
        AdapterConfig::new(model, &options).unwrap()
    }

    fn completion(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}
            ]
        }))
    }

    #[tokio::test]
    async fn openai_sends_common_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "seed": 7,
                "max_completion_tokens": 256
            })))
            .respond_with(completion("A blue square."))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            OpenAIProvider::new(config("gpt-4o", 1), server.uri(), "sk-test".to_string()).unwrap();
        let image = Image::from(RgbImage::from_pixel(4, 4, Rgb([0, 0, 255])));
        let conversation = Conversation::with_message(
            Message::new(Role::User, vec![Content::text("Hello!"), Content::image(image)])
                .unwrap(),
        );

        let reply = provider.generate_response(&conversation).await.unwrap();
        assert_eq!(reply, "A blue square.");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            json!({"role": "user", "content": [{"type": "text", "text": "Hello!"}]})
        );
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"][0]["type"], "image_url");
        assert!(
            messages[1]["content"][0]["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/jpeg;base64,")
        );
        assert!(body.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn together_strips_prefix_and_uses_max_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer tg-test"))
            .and(body_partial_json(json!({
                "model": "meta-llama/Llama-Vision-Free",
                "max_tokens": 256
            })))
            .respond_with(completion("hi"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = TogetherProvider::new(
            config("together:meta-llama/Llama-Vision-Free", 1),
            server.uri(),
            "tg-test".to_string(),
        )
        .unwrap();
        assert_eq!(provider.model_name(), "together:meta-llama/Llama-Vision-Free");

        let reply = provider
            .generate_response(&Conversation::with_message(Message::user("hey")))
            .await
            .unwrap();
        assert_eq!(reply, "hi");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[tokio::test]
    async fn local_server_uses_placeholder_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer token-abc123"))
            .and(body_partial_json(json!({"model": "Qwen/Qwen2-VL-7B-Instruct"})))
            .respond_with(completion("local reply"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = LocalServerProvider::new(
            config("vllm:Qwen/Qwen2-VL-7B-Instruct", 1),
            format!("{}/v1/", server.uri()),
        )
        .unwrap();

        let reply = provider
            .generate_response(&Conversation::with_message(Message::user("hey")))
            .await
            .unwrap();
        assert_eq!(reply, "local reply");
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .expect(3)
            .mount(&server)
            .await;

        let provider =
            OpenAIProvider::new(config("gpt-4o-mini", 3), server.uri(), "sk".to_string()).unwrap();
        let err = provider
            .generate_response(&Conversation::with_message(Message::user("hi")))
            .await
            .unwrap_err();

        match err {
            LLMError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                match *last {
                    LLMError::Api { status, message } => {
                        assert_eq!(status, 500);
                        assert_eq!(message, "upstream down");
                    }
                    other => panic!("expected Api, got {other:?}"),
                }
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_content_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let provider =
            OpenAIProvider::new(config("gpt-4o", 1), server.uri(), "sk".to_string()).unwrap();
        let err = provider
            .generate_response(&Conversation::with_message(Message::user("hi")))
            .await
            .unwrap_err();

        match err {
            LLMError::Exhausted { last, .. } => {
                assert!(matches!(*last, LLMError::InvalidResponse(_)))
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn constructors_reject_unsupported_models() {
        assert!(matches!(
            OpenAIProvider::new(config("gpt-2", 1), "http://x".into(), "k".into()),
            Err(LLMError::Configuration(_))
        ));
        assert!(matches!(
            TogetherProvider::new(
                config("meta-llama/Llama-Vision-Free", 1),
                "http://x".into(),
                "k".into()
            ),
            Err(LLMError::Configuration(_))
        ));
        assert!(matches!(
            LocalServerProvider::new(config("vllm:", 1), "http://x".into()),
            Err(LLMError::Configuration(_))
        ));
    }
}
