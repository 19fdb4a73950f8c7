pub mod pricing;
pub mod providers;
pub mod refiner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::Result;

pub use refiner::{RefineOutput, TextRefiner};

/// Text generation provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    OpenAI,
    LMStudio,
}

/// Chat message for LLM communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One generation call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object body
    pub json_response: bool,
}

/// Generated text plus the usage the provider reported for it
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Trait for text generation providers
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// Model identifier, used for price lookup
    fn model(&self) -> &str;
}

/// Create a generator based on configuration
pub fn create_generator(config: &LlmConfig) -> Result<Box<dyn TextGenerator>> {
    let provider = providers::OpenAiCompatibleProvider::new(config.clone())?;
    Ok(Box::new(provider))
}
