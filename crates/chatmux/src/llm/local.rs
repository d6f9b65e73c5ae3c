//! In-process multimodal runtime.
//!
//! The inference engine itself sits behind [`MultimodalRuntime`], so any
//! binding (llama.cpp, candle, an FFI shim) can be plugged in. This module
//! owns the parts that are engine-independent: rendering the conversation
//! with the Llama 3 chat template, gathering images, and cutting the latest
//! assistant turn out of the decoded output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::error::LLMError;
use super::provider::{LLMProvider, Provider, unsupported_model};
use super::retry::RetryPolicy;
use crate::config::AdapterConfig;
use crate::conversation::{Content, Conversation};
use crate::image_codec::Image;

const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
const START_HEADER: &str = "<|start_header_id|>";
const END_HEADER: &str = "<|end_header_id|>";
const END_OF_TURN: &str = "<|eot_id|>";
const IMAGE_TOKEN: &str = "<|image|>";

/// Sampling settings handed to the runtime on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeParams {
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub seed: u64,
}

/// A loaded model that can run blocking generation.
///
/// `generate` returns the decoded output sequence, which may include the
/// prompt; the reply is extracted afterwards.
pub trait MultimodalRuntime: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        images: &[Image],
        params: &RuntimeParams,
    ) -> Result<String, LLMError>;
}

/// Loads model weights into a [`MultimodalRuntime`].
pub trait RuntimeLoader: Send + Sync {
    fn load(&self, model_path: &Path) -> Result<Arc<dyn MultimodalRuntime>, LLMError>;
}

/// Adapter for models executed in-process.
pub struct LocalRuntimeProvider {
    runtime: Arc<dyn MultimodalRuntime>,
    config: AdapterConfig,
    retry: RetryPolicy,
}

impl LocalRuntimeProvider {
    pub const SUPPORTED_MODELS: &'static [&'static str] = &[
        "meta-llama/Llama-3.1-8B-Instruct",
        "meta-llama/Llama-3.2-3B-Instruct",
        "meta-llama/Llama-3.2-11B-Vision-Instruct",
    ];

    pub fn is_model_supported(model: &str) -> bool {
        Self::SUPPORTED_MODELS.contains(&model)
    }

    /// Load weights from `local_model_path`, or by model name when unset.
    pub fn new(config: AdapterConfig, loader: &dyn RuntimeLoader) -> Result<Self, LLMError> {
        if !Self::is_model_supported(config.model_name()) {
            return Err(unsupported_model(Provider::LocalRuntime, config.model_name()));
        }
        let model_path = config
            .local_model_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(config.model_name()));
        info!(model = %config.model_name(), path = %model_path.display(), "Loading local model");
        let runtime = loader.load(&model_path)?;
        Self::with_runtime(config, runtime)
    }

    /// Wrap an already-loaded runtime.
    pub fn with_runtime(
        config: AdapterConfig,
        runtime: Arc<dyn MultimodalRuntime>,
    ) -> Result<Self, LLMError> {
        if !Self::is_model_supported(config.model_name()) {
            return Err(unsupported_model(Provider::LocalRuntime, config.model_name()));
        }
        let retry = RetryPolicy::new(config.max_retry_attempts(), config.retry_delay());
        Ok(Self {
            runtime,
            config,
            retry,
        })
    }

    pub fn params(&self) -> RuntimeParams {
        RuntimeParams {
            temperature: self.config.temperature(),
            max_new_tokens: self.config.max_output_tokens(),
            seed: self.config.seed(),
        }
    }
}

#[async_trait]
impl LLMProvider for LocalRuntimeProvider {
    fn provider(&self) -> Provider {
        Provider::LocalRuntime
    }

    fn model_name(&self) -> &str {
        self.config.model_name()
    }

    async fn generate_response(&self, conversation: &Conversation) -> Result<String, LLMError> {
        let prompt: Arc<str> = render_prompt(conversation).into();
        let images: Arc<[Image]> = collect_images(conversation).into();
        let params = self.params();

        debug!(
            model = %self.config.model_name(),
            images = images.len(),
            prompt_len = prompt.len(),
            "Running local generation"
        );

        self.retry
            .execute(|| {
                let runtime = Arc::clone(&self.runtime);
                let prompt = Arc::clone(&prompt);
                let images = Arc::clone(&images);
                async move {
                    let output = tokio::task::spawn_blocking(move || {
                        runtime.generate(&prompt, &images, &params)
                    })
                    .await
                    .map_err(|e| LLMError::Runtime(format!("generation task failed: {e}")))??;
                    Ok::<_, LLMError>(extract_reply(&output))
                }
            })
            .await
    }
}

/// Render the conversation with the Llama 3 chat template, ending with an
/// open assistant header.
pub fn render_prompt(conversation: &Conversation) -> String {
    let mut prompt = String::from(BEGIN_OF_TEXT);
    for message in conversation.messages() {
        prompt.push_str(START_HEADER);
        prompt.push_str(message.role().as_str());
        prompt.push_str(END_HEADER);
        prompt.push_str("\n\n");
        for content in message.content() {
            match content {
                Content::Text { text } => prompt.push_str(text),
                Content::Image { .. } => prompt.push_str(IMAGE_TOKEN),
            }
        }
        prompt.push_str(END_OF_TURN);
    }
    prompt.push_str(START_HEADER);
    prompt.push_str("assistant");
    prompt.push_str(END_HEADER);
    prompt.push_str("\n\n");
    prompt
}

/// Every image across all turns, in order.
pub fn collect_images(conversation: &Conversation) -> Vec<Image> {
    conversation.images().cloned().collect()
}

/// The text after the last assistant header, trimmed, with a trailing
/// end-of-turn token removed.
pub fn extract_reply(output: &str) -> String {
    let marker = format!("assistant{END_HEADER}");
    let last = output.rsplit(marker.as_str()).next().unwrap_or(output).trim();
    last.strip_suffix(END_OF_TURN).unwrap_or(last).trim().to_string()
}
