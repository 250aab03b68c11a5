//! Content engine: the opaque text-generation collaborator.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core

mod rig_engine;

pub use rig_engine::RigEngine;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::config::{EngineConfig, LlmBackend};
use crate::error::EngineError;

/// Produces a post from a prompt.
#[async_trait]
pub trait ContentEngine: Send + Sync {
    fn model_name(&self) -> &str;

    /// Raw generation. Callers run the result through [`validate_output`].
    async fn generate(&self, prompt: &str) -> Result<String, EngineError>;
}

/// Create a content engine from configuration.
pub fn create_engine(config: &EngineConfig) -> Result<Arc<dyn ContentEngine>, EngineError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_engine(config),
        LlmBackend::OpenAi => create_openai_engine(config),
    }
}

fn create_anthropic_engine(config: &EngineConfig) -> Result<Arc<dyn ContentEngine>, EngineError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            EngineError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, "Using Anthropic content engine");
    Ok(Arc::new(RigEngine::new(model, "anthropic", &config.model, config.max_tokens)))
}

fn create_openai_engine(config: &EngineConfig) -> Result<Arc<dyn ContentEngine>, EngineError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            EngineError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, "Using OpenAI content engine");
    Ok(Arc::new(RigEngine::new(model, "openai", &config.model, config.max_tokens)))
}

/// Accept engine output only if it is a usable post.
///
/// Trims whitespace and a single pair of wrapping quotes. Empty or shorter
/// than `min_len` characters is a failure, never valid content.
pub fn validate_output(raw: &str, min_len: usize) -> Result<String, EngineError> {
    let mut text = raw.trim();
    for (open, close) in [('"', '"'), ('\u{201C}', '\u{201D}')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
            break;
        }
    }

    if text.is_empty() {
        return Err(EngineError::EmptyOutput);
    }
    let len = text.chars().count();
    if len < min_len {
        return Err(EngineError::TooShort { len, min: min_len });
    }
    Ok(text.to_string())
}
