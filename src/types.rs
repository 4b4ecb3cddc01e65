// Type definitions shared by the LLM layer and the agent pipeline

use crate::config::ModelConfig;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LLMProvider {
    DeepSeek,
    OpenAI,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::OpenAI => write!(f, "openai"),
        }
    }
}

impl LLMProvider {
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "deepseek" => Some(LLMProvider::DeepSeek),
            "openai" => Some(LLMProvider::OpenAI),
            _ => None,
        }
    }

    /// Default chat-completions base URL for the provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LLMProvider::DeepSeek => "https://api.deepseek.com/v1",
            LLMProvider::OpenAI => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<LLMMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub system_instruction: Option<String>,
}

impl LLMRequest {
    /// Build a request carrying every sampling parameter from `model_config`
    pub fn with_model_config(
        provider: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<LLMMessage>,
        model_config: &ModelConfig,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            messages,
            max_tokens: Some(model_config.max_tokens),
            temperature: Some(model_config.temperature),
            top_p: Some(model_config.top_p),
            frequency_penalty: Some(model_config.frequency_penalty),
            presence_penalty: Some(model_config.presence_penalty),
            system_instruction: None,
        }
    }

    pub fn system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LLMMessage {
    pub role: String, // "user", "assistant", "system"
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Embedding or chat endpoint unreachable or returned a non-success status
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Endpoint answered with an unexpected shape or an empty body
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Knowledge store is empty")]
    EmptyCorpus,

    /// Turn or interaction cap reached
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_id() {
        assert_eq!(LLMProvider::from_id("deepseek"), Some(LLMProvider::DeepSeek));
        assert_eq!(LLMProvider::from_id("OpenAI"), Some(LLMProvider::OpenAI));
        assert_eq!(LLMProvider::from_id("anthropic"), None);
    }

    #[test]
    fn test_request_carries_model_config() {
        let model = ModelConfig::default();
        let request = LLMRequest::with_model_config(
            "deepseek",
            "deepseek-chat",
            vec![LLMMessage::user("hi")],
            &model,
        )
        .system("be brief");

        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.max_tokens, Some(1024));
        assert_eq!(request.system_instruction.as_deref(), Some("be brief"));
    }
}
