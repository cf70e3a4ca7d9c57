//! # dotflow-llm
//!
//! Provider adapters behind the core [`dotflow_core::llm::ModelClient`]
//! trait, a retry wrapper with exponential backoff and jitter, and a
//! name-routed factory turning `provider:model` specs into clients.
//!
//! Remote providers (Anthropic, OpenAI) read their keys from the process
//! environment; the local Ollama adapter needs none. The core runtime
//! never links this crate; only the binary wires it in.

pub mod anthropic;
pub mod config;
pub mod factory;
pub mod ollama;
pub mod openai;
pub mod retry;
mod util;

pub use anthropic::AnthropicClient;
pub use config::ProviderConfig;
pub use factory::{client_for_spec, parse_model_spec};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use retry::{RetryPolicy, RetryingClient};
