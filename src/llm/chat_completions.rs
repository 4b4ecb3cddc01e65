// Chat-completions adapter for OpenAI-compatible endpoints (DeepSeek, OpenAI)
// Request:  POST {base}/chat/completions
// Response: {"choices": [{"message": {"content": "..."}}], "usage": {...}}

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct ChatCompletionsAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a LLMMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    stream: bool,
}

// Response types
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl ChatCompletionsAdapter {
    pub fn new(api_key: &str, base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// The system instruction travels as a leading system message
    fn build_messages(request: &LLMRequest) -> Vec<LLMMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_instruction {
            messages.push(LLMMessage::system(system.clone()));
        }
        messages.extend(request.messages.iter().cloned());
        messages
    }

    async fn error_from_response(response: reqwest::Response) -> AppError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();

        if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
            return AppError::ProviderUnavailable(format!(
                "API error ({}): {}",
                status, error_response.error.message
            ));
        }

        AppError::ProviderUnavailable(format!("API error ({}): {}", status, error_text))
    }
}

#[async_trait]
impl LLMAdapter for ChatCompletionsAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let messages = Self::build_messages(request);
        let body = ChatRequest {
            model: &request.model,
            messages: messages.iter().collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            stream: false,
        };

        debug!(model = %request.model, message_count = messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Chat request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::MalformedResponse(format!("Failed to parse chat response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::MalformedResponse("Response contained no choices".to_string()))?;

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".to_string()),
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn list_models(&self) -> AppResult<Vec<String>> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Model listing failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let models: ModelList = response
            .json()
            .await
            .map_err(|e| AppError::MalformedResponse(format!("Failed to parse model list: {}", e)))?;

        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}
