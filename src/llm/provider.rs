use async_trait::async_trait;
use std::time::Duration;

use crate::llm::chat_completions::ChatCompletionsAdapter;
use crate::types::{AppError, AppResult, LLMProvider, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;

    /// Model identifiers advertised by the endpoint, used as a connectivity check
    async fn list_models(&self) -> AppResult<Vec<String>> {
        Err(AppError::ProviderUnavailable(
            "Model listing not supported by this adapter".to_string(),
        ))
    }
}

/// Connection settings for an LLM provider
#[derive(Debug, Clone)]
pub struct LLMProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl LLMProviderConfig {
    pub fn from_config(config: &crate::config::LLMConfig) -> Self {
        Self {
            name: config.provider.clone(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
}

impl LLM {
    pub fn new(provider: LLMProviderConfig) -> AppResult<Self> {
        let kind = LLMProvider::from_id(&provider.name).ok_or_else(|| {
            AppError::Config(format!("Unsupported provider: {}", provider.name))
        })?;

        // DeepSeek and OpenAI share the chat-completions wire format, only the base URL differs
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| kind.default_base_url().to_string());
        let adapter = ChatCompletionsAdapter::new(&provider.api_key, base_url, provider.timeout)?;

        Ok(Self {
            adapter: Box::new(adapter),
            provider_name: kind.to_string(),
        })
    }

    /// Wrap an already-built adapter
    pub fn from_adapter(provider_name: impl Into<String>, adapter: Box<dyn LLMAdapter>) -> Self {
        Self {
            adapter,
            provider_name: provider_name.into(),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }

    pub async fn list_models(&self) -> AppResult<Vec<String>> {
        self.adapter.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_config_error() {
        let result = LLM::new(LLMProviderConfig {
            name: "mystery".to_string(),
            api_key: "key".to_string(),
            base_url: None,
            timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_known_provider_builds() {
        let llm = LLM::new(LLMProviderConfig {
            name: "DeepSeek".to_string(),
            api_key: "key".to_string(),
            base_url: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(llm.provider_name(), "deepseek");
    }
}
