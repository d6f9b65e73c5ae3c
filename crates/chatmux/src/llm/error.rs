//! LLM error types.

use thiserror::Error;

use crate::image_codec::EncodeError;

/// Classification of failures coming from a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// A single call failed; eligible for retry.
    Transient,
    /// Every allowed attempt failed.
    Exhausted,
}

/// Errors that can occur when resolving an adapter or generating a response.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Missing credential, unsupported model or invalid settings at construction
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No backend family claims the model identifier
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// Image could not be prepared for transport
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// Response body did not have the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Local inference runtime failed
    #[error("local runtime failed: {0}")]
    Runtime(String),

    /// Retries exhausted; wraps the last failure
    #[error("giving up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<LLMError>,
    },
}

impl LLMError {
    /// Provider-call classification, `None` for construction-time errors.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            LLMError::Request(_)
            | LLMError::Api { .. }
            | LLMError::RateLimit { .. }
            | LLMError::InvalidResponse(_)
            | LLMError::Runtime(_) => Some(ProviderErrorKind::Transient),
            LLMError::Exhausted { .. } => Some(ProviderErrorKind::Exhausted),
            LLMError::Configuration(_)
            | LLMError::UnsupportedModel(_)
            | LLMError::Encode(_) => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, LLMError::Exhausted { .. })
    }
}

/// Turn a non-2xx response into an error; pass successful responses through.
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, LLMError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Err(LLMError::RateLimit { retry_after });
    }
    let message = response.text().await.unwrap_or_default();
    Err(LLMError::Api {
        status: status.as_u16(),
        message,
    })
}
