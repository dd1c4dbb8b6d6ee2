use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use rig::providers::{anthropic, gemini, openai};
use rig_backend::RigBackend;
use std::sync::Arc;

mod rig_backend;

/// Single-shot text completion. Each call is independent: no conversation
/// history is carried between calls.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub fn create_backend(config: &Config) -> Result<Arc<dyn AiBackend>> {
    match config.api_provider.as_str() {
        "openai" => {
            let client: openai::CompletionsClient = openai::CompletionsClient::builder()
                .api_key(&config.api_key)
                .base_url(&config.api_url)
                .build()?;
            Ok(Arc::new(RigBackend::new(config, client)))
        }
        "gemini" => {
            let client = gemini::Client::new(&config.api_key)?;
            Ok(Arc::new(RigBackend::new(config, client)))
        }
        _ => {
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&config.api_key)
                .base_url(&config.api_url)
                .build()?;
            Ok(Arc::new(RigBackend::new(config, client)))
        }
    }
}
