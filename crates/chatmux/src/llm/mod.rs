//! LLM provider clients for chat completions.

mod anthropic;
mod blocks;
mod credentials;
mod error;
mod gemini;
mod local;
mod ollama;
mod openai;
mod provider;
mod registry;
mod retry;

pub use anthropic::AnthropicProvider;
pub use blocks::{CommonMessage, ContentBlock, ImageUrl, to_common_blocks};
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use error::{LLMError, ProviderErrorKind};
pub use gemini::GeminiProvider;
pub use local::{
    LocalRuntimeProvider, MultimodalRuntime, RuntimeLoader, RuntimeParams, collect_images,
    extract_reply, render_prompt,
};
pub use ollama::OllamaProvider;
pub use openai::{LocalServerProvider, OpenAIProvider, TogetherProvider};
pub use provider::{LLMProvider, Provider};
pub use registry::{MIN_LOCAL_TEMPERATURE, ProviderRegistry};
pub use retry::RetryPolicy;
