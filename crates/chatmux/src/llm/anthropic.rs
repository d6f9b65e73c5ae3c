//! Anthropic LLM provider with native API format.
//!
//! Starts from the common block format. Text blocks are sent as-is; image
//! blocks are re-shaped into Anthropic's base64 `source` form, which the
//! Messages API requires instead of `image_url`.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::blocks::{CommonMessage, ContentBlock, to_common_blocks};
use super::error::{LLMError, check_response};
use super::provider::{LLMProvider, Provider, unsupported_model};
use super::retry::RetryPolicy;
use crate::config::AdapterConfig;
use crate::conversation::{Conversation, Role};

/// Anthropic provider with native API format.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
    config: AdapterConfig,
    retry: RetryPolicy,
}

impl AnthropicProvider {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";

    pub const SUPPORTED_MODELS: &'static [&'static str] =
        &["claude-3-5-haiku-20241022", "claude-3-5-sonnet-20241022"];

    pub fn is_model_supported(model: &str) -> bool {
        Self::SUPPORTED_MODELS.contains(&model)
    }

    pub fn new(config: AdapterConfig, base_url: String, api_key: String) -> Result<Self, LLMError> {
        if !Self::is_model_supported(config.model_name()) {
            return Err(unsupported_model(Provider::Anthropic, config.model_name()));
        }
        let retry = RetryPolicy::new(config.max_retry_attempts(), config.retry_delay());
        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
            config,
            retry,
        })
    }

    async fn call_api(&self, request: &Request<'_>) -> Result<String, LLMError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(request)
            .send()
            .await?;

        let response = check_response(response).await?;
        let anthropic_response: Response = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;
        from_response(anthropic_response)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model_name(&self) -> &str {
        self.config.model_name()
    }

    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError> {
        let blocks = to_common_blocks(conversation)?;
        let request = Request {
            model: self.config.model_name(),
            max_tokens: self.config.max_output_tokens(),
            messages: blocks.iter().map(to_request_message).collect(),
            temperature: self.config.temperature(),
        };

        debug!(
            model = %request.model,
            entries = request.messages.len(),
            "Sending Anthropic message"
        );
        self.retry.execute(|| self.call_api(&request)).await
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
    temperature: f32,
}

#[derive(serde::Serialize)]
struct RequestMessage<'a> {
    role: Role,
    content: Vec<RequestBlock<'a>>,
}

#[derive(Debug, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock<'a> {
    Text { text: &'a str },
    Image { source: ImageSource<'a> },
}

#[derive(Debug, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImageSource<'a> {
    Base64 { media_type: &'a str, data: &'a str },
    Url { url: &'a str },
}

#[derive(serde::Deserialize)]
struct Response {
    content: Vec<ResponseContent>,
}

#[derive(serde::Deserialize)]
struct ResponseContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

fn to_request_message(message: &CommonMessage) -> RequestMessage<'_> {
    RequestMessage {
        role: message.role,
        content: message.content.iter().map(to_request_block).collect(),
    }
}

fn to_request_block(block: &ContentBlock) -> RequestBlock<'_> {
    match block {
        ContentBlock::Text { text } => RequestBlock::Text {
            text: text.as_str(),
        },
        ContentBlock::ImageUrl { image_url } => {
            let source = parse_data_uri(&image_url.url)
                .map(|(media_type, data)| ImageSource::Base64 { media_type, data })
                .unwrap_or(ImageSource::Url {
                    url: image_url.url.as_str(),
                });
            RequestBlock::Image { source }
        }
    }
}

/// Split `data:<media_type>;base64,<data>` into its parts.
fn parse_data_uri(url: &str) -> Option<(&str, &str)> {
    url.strip_prefix("data:")?.split_once(";base64,")
}

/// The reply is the text of the first content block.
fn from_response(response: Response) -> Result<String, LLMError> {
    let first = response
        .content
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::InvalidResponse("response has no content blocks".to_string()))?;
    match first.text {
        Some(text) => Ok(text),
        None => Err(LLMError::InvalidResponse(format!(
            "first content block is {:?}, not text",
            first.content_type
        ))),
    }
}
