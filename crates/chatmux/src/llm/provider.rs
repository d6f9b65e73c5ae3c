//! LLM provider trait and backend kinds.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use super::anthropic::AnthropicProvider;
use super::error::LLMError;
use super::gemini::GeminiProvider;
use super::local::LocalRuntimeProvider;
use super::ollama::OllamaProvider;
use super::openai::{LocalServerProvider, OpenAIProvider, TogetherProvider};
use crate::conversation::Conversation;

/// A constructed, ready-to-use adapter for one backend.
///
/// Adapters hold no conversation state: the full history is passed on every
/// call and is only read.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Backend family this adapter talks to.
    fn provider(&self) -> Provider;

    /// Model identifier the adapter was constructed with.
    fn model_name(&self) -> &str;

    /// Generate the next assistant reply for `conversation`.
    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError>;
}

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Anthropic,
    Gemini,
    LocalRuntime,
    Ollama,
    OpenAI,
    Together,
    LocalServer,
}

impl Provider {
    /// Order in which families are tried when inferring from a model name.
    pub const INFERENCE_ORDER: [Provider; 7] = [
        Provider::Anthropic,
        Provider::Gemini,
        Provider::LocalRuntime,
        Provider::Ollama,
        Provider::OpenAI,
        Provider::Together,
        Provider::LocalServer,
    ];

    /// First family whose support predicate accepts `model`.
    pub fn infer(model: &str) -> Option<Provider> {
        Self::INFERENCE_ORDER
            .into_iter()
            .find(|p| p.is_model_supported(model))
    }

    /// Name-based support predicate. Never touches the network or credentials.
    pub fn is_model_supported(self, model: &str) -> bool {
        match self {
            Provider::Anthropic => AnthropicProvider::is_model_supported(model),
            Provider::Gemini => GeminiProvider::is_model_supported(model),
            Provider::LocalRuntime => LocalRuntimeProvider::is_model_supported(model),
            Provider::Ollama => OllamaProvider::is_model_supported(model),
            Provider::OpenAI => OpenAIProvider::is_model_supported(model),
            Provider::Together => TogetherProvider::is_model_supported(model),
            Provider::LocalServer => LocalServerProvider::is_model_supported(model),
        }
    }

    /// Support check used when the caller names the backend explicitly.
    ///
    /// Identical to [`is_model_supported`](Self::is_model_supported) except for
    /// the local OpenAI-protocol server, which serves whatever it was started
    /// with and so accepts any non-empty name.
    pub fn accepts_model(self, model: &str) -> bool {
        match self {
            Provider::LocalServer => LocalServerProvider::accepts_model(model),
            other => other.is_model_supported(model),
        }
    }

    /// Environment variable holding this backend's credential, if it needs one.
    pub fn credential_var(self) -> Option<&'static str> {
        match self {
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Together => Some("TOGETHER_API_KEY"),
            Provider::LocalRuntime | Provider::Ollama | Provider::LocalServer => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::LocalRuntime => "local_runtime",
            Provider::Ollama => "ollama",
            Provider::OpenAI => "openai",
            Provider::Together => "together",
            Provider::LocalServer => "local_server",
        }
    }
}

/// Construction-time error for a model the adapter does not serve.
pub(crate) fn unsupported_model(provider: Provider, model: &str) -> LLMError {
    LLMError::Configuration(format!("model {model:?} is not supported by {provider}"))
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::INFERENCE_ORDER
            .into_iter()
            .find(|p| p.as_str() == s)
            .or(match s {
                "vllm" => Some(Provider::LocalServer),
                "hf" | "huggingface" => Some(Provider::LocalRuntime),
                _ => None,
            })
            .ok_or_else(|| LLMError::Configuration(format!("unknown provider: {s}")))
    }
}
