//! Name-routed client construction.
//!
//! Model specs are `provider:model`, e.g. `anthropic:claude-sonnet-4-5`,
//! `openai:gpt-4o`, or `ollama:llama3`. The factory reads credentials from
//! the environment, wraps every client in the retry policy, and hands back
//! the bare model id for requests.

use std::sync::Arc;

use dotflow_core::llm::{ModelClient, ModelError};

use crate::anthropic::AnthropicClient;
use crate::config::ProviderConfig;
use crate::ollama::{OllamaClient, DEFAULT_BASE_URL as OLLAMA_BASE_URL};
use crate::openai::OpenAiClient;
use crate::retry::RetryingClient;

/// Split a `provider:model` spec; a bare model defaults to `anthropic`.
pub fn parse_model_spec(spec: &str) -> (&str, &str) {
    match spec.split_once(':') {
        Some((provider, model)) if !provider.is_empty() => (provider, model),
        _ => ("anthropic", spec),
    }
}

/// Build a retry-wrapped client for a model spec.
///
/// Returns the client and the bare model id to put in requests.
pub fn client_for_spec(spec: &str) -> Result<(Arc<dyn ModelClient>, String), ModelError> {
    let (provider, model) = parse_model_spec(spec);
    if model.is_empty() {
        return Err(ModelError::InvalidRequest(format!(
            "model spec '{}' names no model",
            spec
        )));
    }

    let client: Arc<dyn ModelClient> = match provider {
        "anthropic" => Arc::new(RetryingClient::new(AnthropicClient::new(
            ProviderConfig::from_env("ANTHROPIC_API_KEY", "https://api.anthropic.com")?,
        ))),
        "openai" => Arc::new(RetryingClient::new(OpenAiClient::new(
            ProviderConfig::from_env("OPENAI_API_KEY", "https://api.openai.com/v1")?,
        ))),
        "ollama" => Arc::new(RetryingClient::new(OllamaClient::new(
            ProviderConfig::local(OLLAMA_BASE_URL),
        ))),
        other => return Err(ModelError::UnknownProvider(other.to_string())),
    };
    Ok((client, model.to_string()))
}
