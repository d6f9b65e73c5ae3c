//! Provider registry: resolves a model identifier to a ready adapter.

use std::sync::Arc;

use tracing::{debug, info};

use super::anthropic::AnthropicProvider;
use super::credentials::{CredentialSource, EnvCredentials, require};
use super::error::LLMError;
use super::gemini::GeminiProvider;
use super::local::{LocalRuntimeProvider, RuntimeLoader};
use super::ollama::OllamaProvider;
use super::openai::{LocalServerProvider, OpenAIProvider, TogetherProvider};
use super::provider::{LLMProvider, Provider};
use crate::config::{AdapterConfig, Config, EndpointsConfig, GenerationOptions};

/// Lowest temperature the local runtime accepts; exactly zero is raised to it.
pub const MIN_LOCAL_TEMPERATURE: f32 = 0.01;

/// Builds adapters on demand. Holds endpoints and credential access, never
/// conversation state.
#[derive(Clone)]
pub struct ProviderRegistry {
    endpoints: EndpointsConfig,
    credentials: Arc<dyn CredentialSource>,
    runtime_loader: Option<Arc<dyn RuntimeLoader>>,
}

impl ProviderRegistry {
    /// Registry reading credentials from the process environment.
    ///
    /// Nothing is read here; a credential is fetched only when a resolved
    /// backend needs it.
    pub fn new(endpoints: EndpointsConfig) -> Self {
        Self::with_credential_source(endpoints, Arc::new(EnvCredentials))
    }

    /// Registry reading credentials from `credentials`.
    pub fn with_credential_source(
        endpoints: EndpointsConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        info!(?endpoints, "Provider registry initialized");
        Self {
            endpoints,
            credentials,
            runtime_loader: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoints.clone())
    }

    /// Replace the credential source.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Enable the in-process runtime backend.
    pub fn with_runtime_loader(mut self, loader: Arc<dyn RuntimeLoader>) -> Self {
        self.runtime_loader = Some(loader);
        self
    }

    pub fn endpoints(&self) -> &EndpointsConfig {
        &self.endpoints
    }

    /// Infer the backend from the model name and construct its adapter.
    ///
    /// Families are tried in [`Provider::INFERENCE_ORDER`]; the first whose
    /// predicate accepts the name wins.
    pub fn resolve(
        &self,
        model: &str,
        options: &GenerationOptions,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        let provider =
            Provider::infer(model).ok_or_else(|| LLMError::UnsupportedModel(model.to_string()))?;
        debug!(model, %provider, "Inferred provider from model name");
        self.build(provider, model, options)
    }

    /// Construct the adapter for an explicitly chosen backend. The model name
    /// is only checked against that backend.
    pub fn resolve_with(
        &self,
        provider: Provider,
        model: &str,
        options: &GenerationOptions,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        if !provider.accepts_model(model) {
            return Err(LLMError::UnsupportedModel(format!(
                "{model} (provider {provider})"
            )));
        }
        debug!(model, %provider, "Using explicitly selected provider");
        self.build(provider, model, options)
    }

    fn build(
        &self,
        provider: Provider,
        model: &str,
        options: &GenerationOptions,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        let api_key = match provider.credential_var() {
            Some(var) => Some(require(self.credentials.as_ref(), var)?),
            None => None,
        };
        let endpoints = &self.endpoints;

        let adapter: Arc<dyn LLMProvider> = match (provider, api_key) {
            (Provider::Anthropic, Some(key)) => Arc::new(AnthropicProvider::new(
                AdapterConfig::new(model, options)?,
                endpoints.anthropic.clone(),
                key,
            )?),
            (Provider::Gemini, Some(key)) => Arc::new(GeminiProvider::new(
                AdapterConfig::new(model, options)?,
                endpoints.gemini.clone(),
                key,
            )?),
            (Provider::OpenAI, Some(key)) => Arc::new(OpenAIProvider::new(
                AdapterConfig::new(model, options)?,
                endpoints.openai.clone(),
                key,
            )?),
            (Provider::Together, Some(key)) => Arc::new(TogetherProvider::new(
                AdapterConfig::new(model, options)?,
                endpoints.together.clone(),
                key,
            )?),
            (Provider::Ollama, _) => Arc::new(OllamaProvider::new(
                AdapterConfig::new(model, options)?,
                endpoints.ollama.clone(),
            )?),
            (Provider::LocalServer, _) => Arc::new(LocalServerProvider::new(
                AdapterConfig::new(model, options)?,
                endpoints.local_server.clone(),
            )?),
            (Provider::LocalRuntime, _) => {
                let loader = self.runtime_loader.as_deref().ok_or_else(|| {
                    LLMError::Configuration(format!(
                        "no local runtime loader configured for {model}"
                    ))
                })?;
                let options = floor_local_temperature(options);
                Arc::new(LocalRuntimeProvider::new(
                    AdapterConfig::new(model, &options)?,
                    loader,
                )?)
            }
            (other, None) => {
                return Err(LLMError::Configuration(format!(
                    "{other} requires a credential"
                )));
            }
        };

        info!(
            provider = %adapter.provider(),
            model = %adapter.model_name(),
            "Constructed LLM adapter"
        );
        Ok(adapter)
    }
}

/// The local runtime rejects a temperature of exactly zero.
fn floor_local_temperature(options: &GenerationOptions) -> GenerationOptions {
    let mut options = options.clone();
    if options.temperature == 0.0 {
        options.temperature = MIN_LOCAL_TEMPERATURE;
    }
    options
}
