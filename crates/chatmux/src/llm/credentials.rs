//! Credential intake for cloud backends.

use std::collections::HashMap;

use super::error::LLMError;

/// Lookup of static credentials by variable name.
pub trait CredentialSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Fetch a mandatory credential or fail with a configuration error.
pub(crate) fn require(source: &dyn CredentialSource, name: &str) -> Result<String, LLMError> {
    source
        .get(name)
        .ok_or_else(|| LLMError::Configuration(format!("{name} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_lookup() {
        let creds = StaticCredentials::new().with("OPENAI_API_KEY", "sk-test");
        assert_eq!(creds.get("OPENAI_API_KEY").as_deref(), Some("sk-test"));
        assert_eq!(creds.get("ANTHROPIC_API_KEY"), None);
    }

    #[test]
    fn require_reports_missing_variable() {
        let err = require(&StaticCredentials::new(), "GEMINI_API_KEY").unwrap_err();
        match err {
            LLMError::Configuration(message) => assert!(message.contains("GEMINI_API_KEY")),
            other => panic!("expected Configuration, got {other:?}"),
        }
    }
}
