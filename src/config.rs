//! Client configuration

use std::time::Duration;

use crate::error::SonarError;

/// Base URL for the Perplexity API
pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// Default request timeout
///
/// Model responses can take minutes for research-heavy prompts, so the
/// bound is generous. No additional deadline is layered on top of this.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for [`SonarClient`](crate::SonarClient)
///
/// The API key, base endpoint, and default model are read-only once the
/// client is constructed.
#[derive(Debug, Clone)]
pub struct SonarConfig {
    /// Perplexity API key
    pub api_key: String,
    /// Default model override; when unset, call sites pick a per-mode default
    pub model: Option<String>,
    /// API base URL (without trailing slash)
    pub base_url: String,
    /// HTTP request timeout
    pub timeout: Duration,
}

impl SonarConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a config from the `PERPLEXITY_API_KEY` environment variable
    pub fn from_env() -> Result<Self, SonarError> {
        let api_key = std::env::var("PERPLEXITY_API_KEY")
            .map_err(|_| SonarError::config("PERPLEXITY_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut url = base_url.into();
        while url.ends_with('/') {
            url.pop();
        }
        self.base_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let config = SonarConfig::new("key").with_base_url("http://localhost:8080/");
        assert_eq!(config.base_url, "http://localhost:8080");
    }
}
