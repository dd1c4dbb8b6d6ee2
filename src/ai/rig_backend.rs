use super::AiBackend;
use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt};
use tracing::{debug, info};

pub struct RigBackend<C: CompletionClient> {
    client: C,
    model: String,
    max_tokens: u64,
}

impl<C: CompletionClient> RigBackend<C> {
    pub fn new(config: &Config, client: C) -> Self {
        info!(
            "AI backend initialized (provider: {}, model: {})",
            config.api_provider, config.model
        );
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl<C> AiBackend for RigBackend<C>
where
    C: CompletionClient + Send + Sync,
    C::CompletionModel: 'static,
{
    async fn generate(&self, prompt: &str) -> Result<String> {
        let agent = self
            .client
            .agent(&self.model)
            .max_tokens(self.max_tokens)
            .build();

        let response = agent.prompt(prompt).await?.to_string();
        debug!("AI backend returned {} chars", response.len());
        Ok(response)
    }
}
