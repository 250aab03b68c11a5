//! rig-core backed content engine.

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt};

use super::ContentEngine;
use crate::error::EngineError;

const PREAMBLE: &str = "You write LinkedIn posts in the client's established voice. \
Return only the post text, with no preamble, headings or surrounding quotes.";

/// Bridges a rig `CompletionModel` to [`ContentEngine`].
pub struct RigEngine<M> {
    model: M,
    provider: &'static str,
    model_name: String,
    max_tokens: u64,
}

impl<M> RigEngine<M> {
    pub fn new(model: M, provider: &'static str, model_name: &str, max_tokens: u64) -> Self {
        Self {
            model,
            provider,
            model_name: model_name.to_string(),
            max_tokens,
        }
    }
}

#[async_trait]
impl<M> ContentEngine for RigEngine<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, prompt: &str) -> Result<String, EngineError> {
        let agent = AgentBuilder::new(self.model.clone())
            .preamble(PREAMBLE)
            .max_tokens(self.max_tokens)
            .build();

        tracing::debug!(provider = self.provider, model = %self.model_name, prompt_len = prompt.len(), "Calling content engine");
        agent
            .prompt(prompt)
            .await
            .map_err(|e| EngineError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })
    }
}
