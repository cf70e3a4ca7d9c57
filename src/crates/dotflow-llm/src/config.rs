//! Provider connection configuration.

use dotflow_core::llm::ModelError;

/// Connection settings for a remote provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key; empty for providers that need none.
    pub api_key: String,
    /// Base URL of the provider API.
    pub base_url: String,
}

impl ProviderConfig {
    /// Create a config from explicit values.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Read the API key from `env_var`, keeping the given base URL.
    ///
    /// Keys never appear in logs, checkpoints, or error messages; only the
    /// variable name is named on failure.
    pub fn from_env(env_var: &str, base_url: &str) -> Result<Self, ModelError> {
        let api_key = std::env::var(env_var)
            .map_err(|_| ModelError::Auth(format!("environment variable {} is not set", env_var)))?;
        Ok(Self::new(api_key, base_url))
    }

    /// A config for a local provider with no credentials.
    pub fn local(base_url: &str) -> Self {
        Self::new("", base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let config = ProviderConfig::new("k", "http://host:1234/");
        assert_eq!(config.base_url, "http://host:1234");
    }

    #[test]
    fn test_from_env_missing_names_variable_only() {
        let err = ProviderConfig::from_env("DOTFLOW_TEST_NO_SUCH_KEY", "http://x").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("DOTFLOW_TEST_NO_SUCH_KEY"));
    }
}
