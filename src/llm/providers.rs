use super::{ChatMessage, Completion, CompletionRequest, LlmProvider, TextGenerator};
use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const LMSTUDIO_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Chat completions client for OpenAI and servers speaking the same protocol (LMStudio)
pub struct OpenAiCompatibleProvider {
    config: LlmConfig,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.provider == LlmProvider::OpenAI && config.api_key.is_none() {
            return Err(PipelineError::Config("OpenAI API key required".into()));
        }

        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            match config.provider {
                LlmProvider::OpenAI => OPENAI_ENDPOINT,
                LlmProvider::LMStudio => LMSTUDIO_ENDPOINT,
            }
            .to_string()
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, endpoint, client })
    }

    fn build_request(&self, request: CompletionRequest) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user_text,
                },
            ],
            max_tokens: request.max_tokens.min(self.config.max_tokens),
            temperature: self.config.temperature,
            response_format: request
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let body = self.build_request(request);

        debug!("Sending request to {:?} at {}", self.config.provider, self.endpoint);

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::TransientProvider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::TransientProvider(format!(
                "{:?} API error {}: {}",
                self.config.provider, status, text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::StructuralParse(e.to_string()))?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::StructuralParse("response carried no choices".into()))?;

        let (input_tokens, output_tokens) = chat
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text,
            input_tokens,
            output_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> LlmConfig {
        LlmConfig {
            provider: LlmProvider::LMStudio,
            endpoint: None,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_openai_requires_api_key() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        assert!(OpenAiCompatibleProvider::new(config).is_err());
    }

    #[test]
    fn test_lmstudio_default_endpoint() {
        let provider = OpenAiCompatibleProvider::new(local_config()).unwrap();
        assert_eq!(provider.endpoint, LMSTUDIO_ENDPOINT);
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_default_config_resolves_endpoint_per_provider() {
        let local = LlmConfig {
            provider: LlmProvider::LMStudio,
            ..LlmConfig::default()
        };
        assert_eq!(OpenAiCompatibleProvider::new(local).unwrap().endpoint, LMSTUDIO_ENDPOINT);

        let hosted = LlmConfig {
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        assert_eq!(OpenAiCompatibleProvider::new(hosted).unwrap().endpoint, OPENAI_ENDPOINT);
    }

    #[test]
    fn test_request_shape() {
        let provider = OpenAiCompatibleProvider::new(local_config()).unwrap();
        let request = provider.build_request(CompletionRequest {
            system_prompt: "sys".into(),
            user_text: "hello".into(),
            max_tokens: 1_000_000,
            json_response: true,
        });

        assert_eq!(request.max_tokens, 4000);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_plain_request_omits_response_format() {
        let provider = OpenAiCompatibleProvider::new(local_config()).unwrap();
        let request = provider.build_request(CompletionRequest {
            system_prompt: "sys".into(),
            user_text: "hello".into(),
            max_tokens: 10,
            json_response: false,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("response_format").is_none());
    }
}
