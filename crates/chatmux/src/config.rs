//! Configuration: generation defaults, endpoint overrides and the validated
//! per-adapter settings.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::LLMError;

// ============================================================================
// Config (root)
// ============================================================================

/// Optional YAML configuration: generation defaults and endpoint overrides.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: GenerationOptions,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// GenerationOptions
// ============================================================================

/// Per-call generation settings, everything except the model name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerationOptions {
    /// Local weights directory for on-device runtimes.
    #[serde(default)]
    pub local_model_path: Option<PathBuf>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: f64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            local_model_path: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: 0.0,
            seed: 0,
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> f64 {
    2.0
}

// ============================================================================
// AdapterConfig
// ============================================================================

/// Validated, immutable settings an adapter is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    model_name: String,
    local_model_path: Option<PathBuf>,
    max_output_tokens: u32,
    temperature: f32,
    seed: u64,
    max_retry_attempts: u32,
    retry_delay: Duration,
}

impl AdapterConfig {
    pub fn new(
        model_name: impl Into<String>,
        options: &GenerationOptions,
    ) -> Result<Self, LLMError> {
        let model_name = model_name.into();
        if model_name.trim().is_empty() {
            return Err(LLMError::Configuration(
                "model name must not be empty".to_string(),
            ));
        }
        if options.max_output_tokens == 0 {
            return Err(LLMError::Configuration(
                "max_output_tokens must be at least 1".to_string(),
            ));
        }
        if !options.temperature.is_finite() || options.temperature < 0.0 {
            return Err(LLMError::Configuration(format!(
                "temperature must be a non-negative number, got {}",
                options.temperature
            )));
        }
        if options.max_retry_attempts == 0 {
            return Err(LLMError::Configuration(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        let retry_delay = Duration::try_from_secs_f64(options.retry_delay_seconds).map_err(|_| {
            LLMError::Configuration(format!(
                "retry_delay_seconds must be a non-negative number, got {}",
                options.retry_delay_seconds
            ))
        })?;

        Ok(Self {
            model_name,
            local_model_path: options.local_model_path.clone(),
            max_output_tokens: options.max_output_tokens,
            temperature: options.temperature,
            seed: options.seed,
            max_retry_attempts: options.max_retry_attempts,
            retry_delay,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn local_model_path(&self) -> Option<&Path> {
        self.local_model_path.as_deref()
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

// ============================================================================
// EndpointsConfig
// ============================================================================

/// Base URLs per backend. Defaults point at the public APIs and at the
/// conventional localhost ports for self-hosted servers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_openai_url")]
    pub openai: String,
    #[serde(default = "default_together_url")]
    pub together: String,
    #[serde(default = "default_anthropic_url")]
    pub anthropic: String,
    #[serde(default = "default_gemini_url")]
    pub gemini: String,
    #[serde(default = "default_ollama_url")]
    pub ollama: String,
    #[serde(default = "default_local_server_url")]
    pub local_server: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            openai: default_openai_url(),
            together: default_together_url(),
            anthropic: default_anthropic_url(),
            gemini: default_gemini_url(),
            ollama: default_ollama_url(),
            local_server: default_local_server_url(),
        }
    }
}

impl EndpointsConfig {
    /// Point every backend at the same base URL (handy for mock servers).
    pub fn all(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            openai: base_url.clone(),
            together: base_url.clone(),
            anthropic: base_url.clone(),
            gemini: base_url.clone(),
            ollama: base_url.clone(),
            local_server: base_url,
        }
    }
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_together_url() -> String {
    "https://api.together.xyz/v1".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_server_url() -> String {
    "http://localhost:8000/v1".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
