//! Google Gemini provider over the `generateContent` REST API.
//!
//! Gemini names the assistant role `model` and takes text as `parts`. Image
//! content is not forwarded.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{LLMError, check_response};
use super::provider::{LLMProvider, Provider, unsupported_model};
use super::retry::RetryPolicy;
use crate::config::AdapterConfig;
use crate::conversation::{Content, Conversation, Role};

/// Gemini provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    config: AdapterConfig,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub const SUPPORTED_MODELS: &'static [&'static str] = &[
        "gemini-1.5-flash-002",
        "gemini-1.5-pro-002",
        "gemini-2.0-flash-exp",
    ];

    pub fn is_model_supported(model: &str) -> bool {
        Self::SUPPORTED_MODELS.contains(&model)
    }

    pub fn new(config: AdapterConfig, base_url: String, api_key: String) -> Result<Self, LLMError> {
        if !Self::is_model_supported(config.model_name()) {
            return Err(unsupported_model(Provider::Gemini, config.model_name()));
        }
        let retry = RetryPolicy::new(config.max_retry_attempts(), config.retry_delay());
        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            config,
            retry,
        })
    }

    async fn call_api(&self, request: &GenerateRequest<'_>) -> Result<String, LLMError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            self.config.model_name()
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let response = check_response(response).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;
        from_response(body)
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn model_name(&self) -> &str {
        self.config.model_name()
    }

    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError> {
        let request = GenerateRequest {
            contents: to_gemini_contents(conversation),
            generation_config: GenerationConfig {
                temperature: self.config.temperature(),
                max_output_tokens: self.config.max_output_tokens(),
            },
        };

        debug!(
            model = %self.config.model_name(),
            entries = request.contents.len(),
            "Sending Gemini request"
        );
        self.retry.execute(|| self.call_api(&request)).await
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, PartialEq, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, PartialEq, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// One entry per text item; images are skipped.
fn to_gemini_contents(conversation: &Conversation) -> Vec<GeminiContent<'_>> {
    conversation
        .messages()
        .iter()
        .flat_map(|message| {
            message.content().iter().filter_map(move |content| match content {
                Content::Text { text } => Some(GeminiContent {
                    role: gemini_role(message.role()),
                    parts: vec![RequestPart {
                        text: text.as_str(),
                    }],
                }),
                Content::Image { .. } => None,
            })
        })
        .collect()
}

/// Concatenate the text parts of the first candidate.
fn from_response(response: GenerateResponse) -> Result<String, LLMError> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .ok_or_else(|| LLMError::InvalidResponse("response has no candidates".to_string()))?;

    let texts: Vec<String> = parts.into_iter().filter_map(|part| part.text).collect();
    if texts.is_empty() {
        return Err(LLMError::InvalidResponse(
            "first candidate has no text parts".to_string(),
        ));
    }
    Ok(texts.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationOptions;
    use crate::conversation::Message;
    use crate::image_codec::Image;
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn config(model: &str, attempts: u32) -> AdapterConfig {
        let options = GenerationOptions {
            max_output_tokens: 512,
            temperature: 0.5,
            max_retry_attempts: attempts,
            retry_delay_seconds: 0.0,
            ..Default::default()
        };
        AdapterConfig::new(model, &options).unwrap()
    }

    fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        }))
    }

    #[test]
    fn assistant_maps_to_model_and_images_are_dropped() {
        let image = Image::from(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])));
        let mut conversation = Conversation::with_message(
            Message::new(Role::User, vec![Content::text("Hi"), Content::image(image)]).unwrap(),
        );
        conversation.push(Message::assistant("Hello")).unwrap();

        let contents = to_gemini_contents(&conversation);
        assert_eq!(
            contents,
            vec![
                GeminiContent {
                    role: "user",
                    parts: vec![RequestPart { text: "Hi" }],
                },
                GeminiContent {
                    role: "model",
                    parts: vec![RequestPart { text: "Hello" }],
                },
            ]
        );
    }

    #[test]
    fn response_concatenates_text_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "Hel"}, {"text": "lo"}]}}]
        }))
        .unwrap();
        assert_eq!(from_response(response).unwrap(), "Hello");

        let blocked: GenerateResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert!(matches!(
            from_response(blocked),
            Err(LLMError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn sends_generate_content_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash-002:generateContent"))
            .and(header("x-goog-api-key", "gm-test"))
            .and(body_partial_json(json!({
                "generationConfig": {"temperature": 0.5, "maxOutputTokens": 512}
            })))
            .respond_with(reply("Hi there"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(
            config("gemini-1.5-flash-002", 1),
            server.uri(),
            "gm-test".to_string(),
        )
        .unwrap();
        let mut conversation = Conversation::with_message(Message::user("Hi"));
        conversation.push(Message::assistant("Hello")).unwrap();
        conversation.push(Message::user("How are you?")).unwrap();

        let reply = provider.generate_response(&conversation).await.unwrap();
        assert_eq!(reply, "Hi there");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        let roles: Vec<&str> = body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["user", "model", "user"]);
        assert_eq!(body["contents"][1]["parts"][0]["text"], "Hello");
    }

    struct FailOnce {
        calls: Arc<AtomicU32>,
    }

    impl Respond for FailOnce {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(503).set_body_string("overloaded")
            } else {
                reply("recovered")
            }
        }
    }

    #[tokio::test]
    async fn retries_after_server_error() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicU32::new(0));
        Mock::given(method("POST"))
            .respond_with(FailOnce {
                calls: calls.clone(),
            })
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(
            config("gemini-2.0-flash-exp", 3),
            server.uri(),
            "gm-test".to_string(),
        )
        .unwrap();
        let reply = provider
            .generate_response(&Conversation::with_message(Message::user("Hi")))
            .await
            .unwrap();

        assert_eq!(reply, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
